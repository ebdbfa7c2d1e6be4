//! Raw request passthrough.

use std::sync::Arc;

use tydom_core::{CredentialStore, Method, Tydom, TydomCommand, TydomConfig};

use crate::cli::{GlobalOpts, HttpMethod, SendArgs};
use crate::error::CliError;
use crate::output::{self, Printer};

use super::util;

impl From<HttpMethod> for Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Self::Get,
            HttpMethod::Put => Self::Put,
            HttpMethod::Post => Self::Post,
            HttpMethod::Delete => Self::Delete,
        }
    }
}

pub async fn handle(
    config: TydomConfig,
    credentials: Arc<dyn CredentialStore>,
    args: SendArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    if let Some(ref body) = args.body {
        serde_json::from_str::<serde_json::Value>(body)?;
    }
    if !args.path.starts_with('/') {
        return Err(CliError::Validation {
            field: "path".into(),
            reason: format!("'{}' must start with '/'", args.path),
        });
    }

    let command = TydomCommand::new(args.method.into(), args.path, args.body);
    let timeout = util::request_timeout(global);
    let no_wait = args.no_wait;

    let reply = Tydom::oneshot(config, credentials, |tydom| async move {
        if no_wait {
            tydom.send(command).await.map(|_| None)
        } else {
            tydom.request(command, timeout).await.map(Some)
        }
    })
    .await?;

    if let Some(message) = reply {
        let json = util::message_json(&message);
        let out = Printer::new(global);
        let rendered = out.single(
            &json,
            output::pretty_json,
            |json| json["kind"].as_str().unwrap_or_default().to_owned(),
        );
        out.print(&rendered);
    }
    Ok(())
}
