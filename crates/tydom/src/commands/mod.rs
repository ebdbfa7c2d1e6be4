//! Command dispatch: bridges CLI args -> gateway requests -> output formatting.

pub mod config_cmd;
pub mod devices;
pub mod info;
pub mod probe;
pub mod scenarios;
pub mod send;
pub mod util;
pub mod watch;

use std::sync::Arc;

use tydom_core::{CredentialStore, TydomConfig};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a gateway-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    config: TydomConfig,
    credentials: Arc<dyn CredentialStore>,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Info => info::handle(config, credentials, global).await,
        Command::Devices(args) => devices::handle(config, credentials, args, global).await,
        Command::Scenarios(args) => scenarios::handle(config, credentials, args, global).await,
        Command::Watch(args) => watch::handle(config, credentials, args, global).await,
        Command::Send(args) => send::handle(config, credentials, args, global).await,
        Command::Probe => probe::handle(config, credentials, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Ok(()),
    }
}
