// ── Effect executor ──
//
// One task drains the effect queue in FIFO order, so the commands one
// message asks for go out in the order they were asked for. The inbound
// pipeline only enqueues and never waits on a send.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use tydom_api::{ActivityFlag, TydomCommand};

use crate::message::TydomMessageEffect;
use crate::schedule::{CommandSink, PollScheduler, ReplyAccumulator};

/// Everything the executor acts on.
pub struct EffectContext<S> {
    pub sink: Arc<S>,
    pub polls: Arc<PollScheduler<S>>,
    pub replies: Arc<ReplyAccumulator>,
    pub activity: ActivityFlag,
    pub last_pong: Arc<watch::Sender<Option<DateTime<Utc>>>>,
    pub polling_enabled: bool,
    /// Replaces the interval requested by `SchedulePoll`.
    pub poll_interval: Option<Duration>,
}

/// Handle for enqueuing effects. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EffectExecutor {
    tx: mpsc::UnboundedSender<TydomMessageEffect>,
}

impl EffectExecutor {
    /// Spawn the executor task.
    pub fn spawn<S: CommandSink>(
        context: EffectContext<S>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(executor_task(context, rx, cancel));
        (Self { tx }, handle)
    }

    /// Queue effects behind everything already queued.
    pub fn enqueue(&self, effects: impl IntoIterator<Item = TydomMessageEffect>) {
        for effect in effects {
            if self.tx.send(effect).is_err() {
                debug!("effect executor stopped, dropping effect");
                return;
            }
        }
    }
}

async fn executor_task<S: CommandSink>(
    context: EffectContext<S>,
    mut rx: mpsc::UnboundedReceiver<TydomMessageEffect>,
    cancel: CancellationToken,
) {
    loop {
        let effect = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            effect = rx.recv() => match effect {
                Some(effect) => effect,
                None => break,
            },
        };
        execute(&context, effect).await;
    }
    debug!("effect executor exiting");
}

async fn execute<S: CommandSink>(context: &EffectContext<S>, effect: TydomMessageEffect) {
    match effect {
        TydomMessageEffect::SendCommands(commands) => {
            for command in &commands {
                send_best_effort(context, command).await;
            }
        }
        TydomMessageEffect::SchedulePoll { urls, interval } => {
            if !context.polling_enabled || urls.is_empty() {
                trace!("polling disabled or nothing to poll");
                return;
            }
            let interval = context.poll_interval.unwrap_or(interval);
            let added = context.polls.schedule(&urls, interval);

            // First reading now rather than one interval from now.
            if context.activity.is_active() {
                for url in added {
                    send_best_effort(context, &TydomCommand::get(url)).await;
                }
            }
        }
        TydomMessageEffect::RefreshAll => {
            send_best_effort(context, &TydomCommand::refresh_all()).await;
            context.polls.poll_once_scheduled().await;
        }
        TydomMessageEffect::PongReceived => {
            context.last_pong.send_replace(Some(Utc::now()));
        }
        TydomMessageEffect::CdataReplyChunk(chunk) => context.replies.push(chunk),
    }
}

async fn send_best_effort<S: CommandSink>(context: &EffectContext<S>, command: &TydomCommand) {
    if let Err(e) = context.sink.send_command(command).await {
        warn!(command = %command, error = %e, "command send failed");
    }
}
