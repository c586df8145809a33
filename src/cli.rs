use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::error::Result;
use crate::inventory::FilterCriteria;
use crate::script::Payload;
use crate::session::{CheckProfile, Outcome, Session};

// CLI definition
#[derive(Parser, Debug)]
#[command(name = "vmhealth", author, version, about = "Windows service health checks on Azure VMs via Run Command")]
pub struct Cli {
    /// Subscription to search (overrides config and AZURE_SUBSCRIPTION_ID)
    #[arg(long, global = true)]
    pub subscription: Option<String>,

    /// Required tag, repeatable
    #[arg(long = "tag", value_name = "KEY=VALUE", value_parser = parse_tag, global = true)]
    pub tags: Vec<(String, String)>,

    /// Substring the VM's Name tag must contain (case-insensitive)
    #[arg(long, global = true)]
    pub name_contains: Option<String>,

    /// Skip the final confirmation before running commands
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the VMs matching the filter
    List,

    /// Check services on a single VM
    Check {
        /// Service to check, repeatable; prompted for when omitted
        #[arg(long = "service")]
        services: Vec<String>,
    },

    // Services plus process and system snapshot; "all" VMs allowed
    Monitor {
        #[arg(long = "service")]
        services: Vec<String>,

        /// Process image name to report on, repeatable
        #[arg(long = "process")]
        processes: Vec<String>,

        /// Leave out the CPU/memory snapshot
        #[arg(long)]
        no_system: bool,
    },
}

fn parse_tag(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

fn or_configured(given: &[String], configured: &[String]) -> Vec<String> {
    if given.is_empty() { configured.to_vec() } else { given.to_vec() }
}

impl Cli {
    pub fn criteria(&self, cfg: &Config) -> FilterCriteria {
        cfg.criteria(&self.tags, self.name_contains.as_deref())
    }

    /// Variant for the chosen command; `None` for discovery-only commands.
    pub fn profile(&self, cfg: &Config) -> Option<CheckProfile> {
        match &self.command {
            Command::List => None,
            Command::Check { services } => Some(CheckProfile {
                allow_all: false,
                payload: Payload::services(or_configured(services, &cfg.check.services)),
            }),
            Command::Monitor { services, processes, no_system } => Some(CheckProfile {
                allow_all: true,
                payload: Payload {
                    services: or_configured(services, &cfg.monitor.services),
                    processes: or_configured(processes, &cfg.monitor.processes),
                    system_snapshot: !no_system,
                },
            }),
        }
    }

    pub fn run(self, cfg: &Config, session: Session<'_>) -> Result<()> {
        let criteria = self.criteria(cfg);
        let mut session = session.assume_yes(self.yes);
        let Some(profile) = self.profile(cfg) else {
            let count = session.list(&criteria)?;
            tracing::info!(count, "listed vms");
            return Ok(());
        };

        match session.run(&criteria, &profile)? {
            Outcome::Completed { succeeded, failed } => {
                tracing::info!(succeeded, failed, "health check finished");
                println!("Health check completed.");
            }
            Outcome::NoTargets => tracing::info!("no matching vms"),
            Outcome::Cancelled => println!("Goodbye!"),
        }
        Ok(())
    }
}
