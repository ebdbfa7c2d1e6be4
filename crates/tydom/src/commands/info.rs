//! Gateway information.

use std::sync::Arc;

use serde_json::Value;

use tydom_core::{CredentialStore, Tydom, TydomCommand, TydomConfig, TydomMessage};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output::Printer;

use super::util;

fn detail(out: &Printer, info: &Value) -> String {
    let Some(fields) = info.as_object() else {
        return util::format_value(info);
    };
    let fields: Vec<(&str, String)> = fields
        .iter()
        .map(|(key, value)| (key.as_str(), util::format_value(value)))
        .collect();
    out.fields(&fields)
}

pub async fn handle(
    config: TydomConfig,
    credentials: Arc<dyn CredentialStore>,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let timeout = util::request_timeout(global);
    let reply = Tydom::oneshot(config, credentials, |tydom| async move {
        tydom.request(TydomCommand::info(), timeout).await
    })
    .await?;

    let TydomMessage::GatewayInfo { info, .. } = reply.as_ref() else {
        return Err(CliError::UnexpectedReply {
            expected: "gateway_info".into(),
            actual: reply.kind().into(),
        });
    };

    let out = Printer::new(global);
    let rendered = out.single(
        info,
        |info| detail(&out, info),
        |info| {
            info.get("mac")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        },
    );
    out.print(&rendered);
    Ok(())
}
