//! Connection resolution check.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use tydom_core::{ConnectionState, CredentialStore, Tydom, TydomCommand, TydomConfig};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output::Printer;

use super::util;

#[derive(Debug, Serialize)]
struct ProbeReport {
    mode: String,
    host: String,
    ping_ms: u128,
}

fn detail(out: &Printer, report: &ProbeReport) -> String {
    out.fields(&[
        ("Mode", out.accent(&report.mode)),
        ("Host", report.host.clone()),
        ("Ping", format!("{} ms", report.ping_ms)),
    ])
}

pub async fn handle(
    config: TydomConfig,
    credentials: Arc<dyn CredentialStore>,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let timeout = util::request_timeout(global);

    let report = Tydom::oneshot(config, credentials, |tydom| async move {
        let state = tydom.connection_state().borrow().clone();
        let ConnectionState::Connected { mode, host } = state else {
            return Err(CliError::GatewayError {
                message: "connection dropped right after resolving".into(),
            });
        };

        let started = Instant::now();
        tydom.request(TydomCommand::ping(), timeout).await?;
        Ok(ProbeReport {
            mode: mode.to_string(),
            host,
            ping_ms: started.elapsed().as_millis(),
        })
    })
    .await?;

    let out = Printer::new(global);
    let rendered = out.single(
        &report,
        |r| detail(&out, r),
        |r| r.host.clone(),
    );
    out.print(&rendered);
    Ok(())
}
