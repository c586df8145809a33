use std::process::ExitCode;

use clap::Parser;

use vmhealth::{
    init_telemetry, install_interrupt_handler, load_config, ArmClient, Cli, ConsolePrompt, Credential, Result,
    Session,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn run() -> Result<()> {
    // Load config + init logs
    let cfg = load_config()?;
    init_telemetry(&cfg)?;

    let cli = Cli::parse();
    let subscription = cfg.resolve_subscription(cli.subscription.as_deref())?;
    let credential = Credential::from_env();
    tracing::info!(version = VERSION, subscription = %subscription, auth = credential.describe(), "vmhealth starting");

    let api = ArmClient::new(&cfg.azure, subscription, credential)?;
    let interrupted = install_interrupt_handler();
    let mut prompt = ConsolePrompt::new(interrupted.clone());
    let session = Session::new(&api, &mut prompt, interrupted);
    cli.run(&cfg, session)
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "vmhealth failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
