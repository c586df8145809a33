// Service health checks for Windows VMs in an Azure subscription.
pub mod auth;
pub mod check;
pub mod cli;
pub mod compute;
pub mod config;
pub mod error;
pub mod inventory;
pub mod prompt;
pub mod report;
pub mod script;
pub mod select;
pub mod session;
pub mod telemetry;

pub use auth::Credential;
pub use check::{parse_output, run_health_check, HealthCheckRequest, HealthCheckResult};
pub use cli::Cli;
pub use compute::{ArmClient, ComputeApi};
pub use config::{load_config, Config};
pub use error::{CloudError, CloudErrorKind, Error, Result};
pub use inventory::{FilterCriteria, VmDescriptor};
pub use prompt::{install_interrupt_handler, ConsolePrompt, Prompt};
pub use session::{CheckProfile, Outcome, Session};
pub use telemetry::init_telemetry;
