//! Live message stream.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;

use tydom_core::{
    ConnectionState, CoreError, CredentialStore, Tydom, TydomConfig, TydomDevice, TydomMessage,
};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::error::CliError;
use crate::output::Printer;

use super::util;

fn device_line(device: &TydomDevice) -> String {
    let values: Vec<String> = device
        .data
        .iter()
        .map(|(name, value)| format!("{name}={}", util::format_value(value)))
        .collect();
    format!("{} [{}] {}", device.name, device.unique_id, values.join(" "))
}

fn summary(message: &TydomMessage) -> String {
    match message {
        TydomMessage::GatewayInfo { info, .. } => info
            .get("productName")
            .map(util::format_value)
            .unwrap_or_default(),
        TydomMessage::Devices { devices, .. } => devices
            .iter()
            .map(device_line)
            .collect::<Vec<_>>()
            .join("; "),
        TydomMessage::Scenarios { scenarios, .. } => format!("{} scenarios", scenarios.len()),
        TydomMessage::Groups { groups, .. } => format!("{} groups", groups.len()),
        TydomMessage::Moments { moments, .. } => format!("{} moments", moments.len()),
        TydomMessage::Areas { areas, .. } => format!("{} areas", areas.len()),
        TydomMessage::Raw(raw) => raw
            .parse_error
            .clone()
            .or_else(|| raw.uri_origin.clone())
            .unwrap_or_default(),
    }
}

fn render(out: &Printer, message: &TydomMessage) -> String {
    out.event(&util::message_json(message), || {
        let stamp = chrono::Local::now().format("%H:%M:%S").to_string();
        format!(
            "{} {:<12} {:<14} {}",
            out.label(&stamp),
            out.accent(message.kind()),
            message.transaction_id().unwrap_or("-"),
            summary(message)
        )
    })
}

pub async fn handle(
    mut config: TydomConfig,
    credentials: Arc<dyn CredentialStore>,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    if args.no_polling {
        config.polling.enabled = false;
    }

    let tydom = Tydom::with_credential_store(config, credentials);
    let mut messages = tydom.message_stream();
    tydom.connect().await?;

    let mut state = tydom.connection_state();
    let out = Printer::new(global);
    let stop = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(stop);

    let mut lost = false;
    loop {
        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => break,
            () = &mut stop => break,
            changed = state.changed() => {
                let down = changed.is_err()
                    || matches!(
                        *state.borrow(),
                        ConnectionState::Disconnected | ConnectionState::Failed { .. }
                    );
                if down {
                    lost = true;
                    break;
                }
            }
            message = messages.next() => {
                let Some(message) = message else { break };
                if !args.raw && matches!(message.as_ref(), TydomMessage::Raw(_)) {
                    continue;
                }
                out.print(&render(&out, &message));
            }
        }
    }

    tydom.disconnect().await;
    if lost {
        return Err(CoreError::ControllerDisconnected.into());
    }
    Ok(())
}
