// ── Background schedulers ──
//
// Independent periodic loops that send commands on their own: cdata
// polling, post-command polling, and the command reply accumulator they
// feed. Every loop is gated by the shared activity flag and treats sends
// as best-effort: a failed send is logged and the loop carries on.

mod poll;
mod post_command;
mod replies;

use std::future::Future;

use tydom_api::{TydomCommand, TydomConnection};

use crate::error::CoreError;

pub use poll::PollScheduler;
pub use post_command::PostCommandPolling;
pub use replies::ReplyAccumulator;

/// Anything commands can be sent through.
pub trait CommandSink: Send + Sync + 'static {
    fn send_command(&self, command: &TydomCommand) -> impl Future<Output = Result<(), CoreError>> + Send;
}

impl CommandSink for TydomConnection {
    async fn send_command(&self, command: &TydomCommand) -> Result<(), CoreError> {
        TydomConnection::send_command(self, command).await.map_err(CoreError::from)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records every command instead of sending it. Commands whose path
    /// is marked failing are still recorded, then rejected.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        sent: Mutex<Vec<TydomCommand>>,
        failing: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        pub(crate) fn failing_on(paths: &[&str]) -> Self {
            Self {
                sent: Mutex::default(),
                failing: Mutex::new(paths.iter().map(|p| (*p).to_owned()).collect()),
            }
        }

        pub(crate) fn paths(&self) -> Vec<String> {
            self.sent
                .lock()
                .map(|sent| sent.iter().map(|c| c.path.clone()).collect())
                .unwrap_or_default()
        }

        pub(crate) fn clear(&self) {
            if let Ok(mut sent) = self.sent.lock() {
                sent.clear();
            }
        }
    }

    impl CommandSink for RecordingSink {
        async fn send_command(&self, command: &TydomCommand) -> Result<(), CoreError> {
            if let Ok(mut sent) = self.sent.lock() {
                sent.push(command.clone());
            }
            let fails = self
                .failing
                .lock()
                .map(|failing| failing.contains(&command.path))
                .unwrap_or(false);
            if fails {
                return Err(CoreError::ControllerDisconnected);
            }
            Ok(())
        }
    }
}
