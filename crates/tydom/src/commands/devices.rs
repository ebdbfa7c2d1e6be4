//! Device command handlers.

use std::sync::Arc;

use tabled::Tabled;

use tydom_core::{CredentialStore, DeviceKind, Tydom, TydomCommand, TydomConfig, TydomDevice};

use crate::cli::{DevicesArgs, DevicesCommand, GlobalOpts};
use crate::error::CliError;
use crate::output::Printer;

use super::util;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Usage")]
    usage: String,
    #[tabled(rename = "Summary")]
    summary: String,
}

/// The reading most people care about for each kind of device.
fn headline_keys(kind: DeviceKind) -> &'static [&'static str] {
    match kind {
        DeviceKind::Shutter | DeviceKind::Window | DeviceKind::GarageDoor | DeviceKind::Gate => {
            &["position", "level", "openState"]
        }
        DeviceKind::Door => &["openState", "intrusionDetect"],
        DeviceKind::Light => &["level", "onFavPos"],
        DeviceKind::Climate => &["temperature", "setpoint", "hvacMode", "authorization"],
        DeviceKind::Energy => &["energyInstantTotElec", "energyIndexECSWatt"],
        DeviceKind::Alarm => &["alarmState", "alarmMode"],
        DeviceKind::Smoke => &["techSmokeDefect", "battDefect"],
        DeviceKind::Weather | DeviceKind::Other => &[],
    }
}

fn summary(device: &TydomDevice) -> String {
    let keys = headline_keys(device.kind);
    let picked: Vec<String> = keys
        .iter()
        .filter_map(|key| {
            device
                .data
                .get(*key)
                .map(|value| format!("{key}={}", util::format_value(value)))
        })
        .collect();
    if picked.is_empty() {
        format!("{} values", device.data.len())
    } else {
        picked.join(" ")
    }
}

impl From<&TydomDevice> for DeviceRow {
    fn from(d: &TydomDevice) -> Self {
        Self {
            id: d.unique_id.clone(),
            name: d.name.clone(),
            kind: d.kind.to_string(),
            usage: d.usage.clone(),
            summary: summary(d),
        }
    }
}

fn detail(out: &Printer, d: &TydomDevice) -> String {
    let mut text = out.fields(&[
        ("ID", d.unique_id.clone()),
        ("Name", out.accent(&d.name)),
        ("Kind", d.kind.to_string()),
        ("Usage", d.usage.clone()),
        ("Device", format!("{}/{}", d.id, d.endpoint_id)),
    ]);
    if !d.data.is_empty() {
        let readings: Vec<(&str, String)> = d
            .data
            .iter()
            .map(|(name, value)| (name.as_str(), util::format_value(value)))
            .collect();
        text.push_str("\n\n");
        text.push_str(&out.fields(&readings));
    }
    text
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    config: TydomConfig,
    credentials: Arc<dyn CredentialStore>,
    args: DevicesArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let timeout = util::request_timeout(global);
    let out = Printer::new(global);

    match args.command {
        DevicesCommand::List => {
            let devices = Tydom::oneshot(config, credentials, |tydom| async move {
                util::load_devices(&tydom, timeout).await
            })
            .await?;
            let rendered = out.list(
                &devices,
                |d| DeviceRow::from(d),
                |d| d.unique_id.clone(),
            );
            out.print(&rendered);
            Ok(())
        }

        DevicesCommand::Get { device } => {
            let devices = Tydom::oneshot(config, credentials, |tydom| async move {
                util::load_devices(&tydom, timeout).await
            })
            .await?;
            let found = util::resolve_device(&devices, &device)?;
            let rendered = out.single(
                found,
                |d| detail(&out, d),
                |d| d.unique_id.clone(),
            );
            out.print(&rendered);
            Ok(())
        }

        DevicesCommand::Set {
            device,
            name,
            value,
        } => {
            let value = util::parse_value(&value);
            let target = Tydom::oneshot(config, credentials, |tydom| async move {
                let devices = util::load_devices(&tydom, timeout).await?;
                let found = util::resolve_device(&devices, &device)?.clone();
                tydom
                    .send(TydomCommand::put_device_data(
                        found.id,
                        found.endpoint_id,
                        &name,
                        value,
                    ))
                    .await?;
                Ok::<_, CliError>(found)
            })
            .await?;
            if !global.quiet {
                eprintln!("Sent to {} ({})", target.name, target.unique_id);
            }
            Ok(())
        }

        DevicesCommand::Alarm {
            device,
            action,
            pin,
            zones,
        } => {
            let entries = Tydom::oneshot(config, credentials, |tydom| async move {
                let devices = util::load_devices(&tydom, timeout).await?;
                let found = util::resolve_device(&devices, &device)?;
                let zones = (!zones.is_empty()).then_some(zones.as_slice());
                let command = TydomCommand::alarm(
                    found.id,
                    found.endpoint_id,
                    &action.to_ascii_uppercase(),
                    pin.as_deref(),
                    zones,
                );
                Ok::<_, CliError>(tydom.send_and_wait_reply(command, timeout).await?)
            })
            .await?;
            let rendered = out.single(
                &entries,
                |entries| {
                    entries
                        .iter()
                        .map(util::format_value)
                        .collect::<Vec<_>>()
                        .join("\n")
                },
                |entries| entries.len().to_string(),
            );
            out.print(&rendered);
            Ok(())
        }
    }
}
