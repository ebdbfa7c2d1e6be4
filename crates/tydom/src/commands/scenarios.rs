//! Scenario command handlers.

use std::sync::Arc;

use tabled::Tabled;

use tydom_core::{CredentialStore, Tydom, TydomCommand, TydomConfig, TydomScenario};

use crate::cli::{GlobalOpts, ScenariosArgs, ScenariosCommand};
use crate::error::CliError;
use crate::output::Printer;

use super::util;

#[derive(Tabled)]
struct ScenarioRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    scenario_type: String,
    #[tabled(rename = "Picto")]
    picto: String,
}

impl From<&TydomScenario> for ScenarioRow {
    fn from(s: &TydomScenario) -> Self {
        Self {
            id: s.id,
            name: s.name.clone(),
            scenario_type: s.scenario_type.clone(),
            picto: s.picto.clone(),
        }
    }
}

pub async fn handle(
    config: TydomConfig,
    credentials: Arc<dyn CredentialStore>,
    args: ScenariosArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let timeout = util::request_timeout(global);

    match args.command {
        ScenariosCommand::List => {
            let scenarios = Tydom::oneshot(config, credentials, |tydom| async move {
                util::load_scenarios(&tydom, timeout).await
            })
            .await?;
            let out = Printer::new(global);
            let rendered = out.list(
                &scenarios,
                |s| ScenarioRow::from(s),
                |s| s.id.to_string(),
            );
            out.print(&rendered);
            Ok(())
        }

        ScenariosCommand::Run { scenario } => {
            let ran = Tydom::oneshot(config, credentials, |tydom| async move {
                let scenarios = util::load_scenarios(&tydom, timeout).await?;
                let found = util::resolve_scenario(&scenarios, &scenario)?.clone();
                tydom
                    .request(TydomCommand::activate_scenario(found.id), timeout)
                    .await?;
                Ok::<_, CliError>(found)
            })
            .await?;
            if !global.quiet {
                eprintln!("Scenario '{}' activated", ran.name);
            }
            Ok(())
        }
    }
}
