use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use tydom_api::{ActivityFlag, TydomCommand};

use super::CommandSink;
use crate::cache::SuppressionQuery;
use crate::config::PostCommandPollingConfig;
use crate::message::unique_id;

struct PollEntry {
    unique_id: String,
    generation: u64,
    cancel: CancellationToken,
}

/// Short-lived polling of one endpoint after a write to it.
///
/// Shutters and similar devices report intermediate states for a few
/// seconds after a command. While an entry exists, broadcast updates for
/// its endpoint are suppressed and the endpoint is read directly instead.
/// At most one entry exists per device: starting another endpoint of the
/// same device replaces the previous one.
pub struct PostCommandPolling<S> {
    sink: Arc<S>,
    activity: ActivityFlag,
    config: PostCommandPollingConfig,
    entries: Arc<DashMap<i64, PollEntry>>,
    generation: AtomicU64,
    cancel: CancellationToken,
}

impl<S: CommandSink> PostCommandPolling<S> {
    pub fn new(sink: Arc<S>, activity: ActivityFlag, config: PostCommandPollingConfig) -> Self {
        Self {
            sink,
            activity,
            config,
            entries: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }

    /// Start polling `device_id`/`endpoint_id`, replacing any entry for the
    /// same device.
    pub fn start(&self, device_id: i64, endpoint_id: i64) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = self.cancel.child_token();
        let uid = unique_id(device_id, endpoint_id);

        if let Some(previous) = self.entries.insert(
            device_id,
            PollEntry {
                unique_id: uid.clone(),
                generation,
                cancel: token.clone(),
            },
        ) {
            trace!(unique_id = %previous.unique_id, "replacing post-command polling");
            previous.cancel.cancel();
        }

        debug!(unique_id = %uid, "post-command polling started");
        tokio::spawn(post_command_loop(
            Arc::clone(&self.sink),
            Arc::clone(&self.entries),
            self.activity.clone(),
            self.config.clone(),
            Target {
                device_id,
                endpoint_id,
                generation,
            },
            token,
        ));
    }

    /// Stop polling one device. Returns `false` if nothing was running.
    pub fn stop(&self, device_id: i64) -> bool {
        match self.entries.remove(&device_id) {
            Some((_, entry)) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        for entry in self.entries.iter() {
            entry.value().cancel.cancel();
        }
        self.entries.clear();
    }

    pub fn active_targets(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.iter().map(|e| e.unique_id.clone()).collect();
        ids.sort();
        ids
    }
}

impl<S: Send + Sync> SuppressionQuery for PostCommandPolling<S> {
    fn is_suppressed(&self, unique_id: &str) -> bool {
        self.entries.iter().any(|e| e.unique_id == unique_id)
    }
}

impl<S> Drop for PostCommandPolling<S> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Debug, Clone, Copy)]
struct Target {
    device_id: i64,
    endpoint_id: i64,
    generation: u64,
}

async fn post_command_loop<S: CommandSink>(
    sink: Arc<S>,
    entries: Arc<DashMap<i64, PollEntry>>,
    activity: ActivityFlag,
    config: PostCommandPollingConfig,
    target: Target,
    cancel: CancellationToken,
) {
    let deadline = Instant::now() + config.duration;
    let command_path = TydomCommand::device_data(target.device_id, target.endpoint_id).path;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            () = tokio::time::sleep(config.interval) => {}
        }

        if Instant::now() >= deadline {
            break;
        }
        if !activity.is_active() {
            continue;
        }

        if let Err(e) = sink.send_command(&TydomCommand::get(command_path.as_str())).await {
            warn!(path = %command_path, error = %e, "post-command poll failed");
        }
    }

    // A newer start for the same device owns the slot now.
    entries.remove_if(&target.device_id, |_, entry| entry.generation == target.generation);
    trace!(device_id = target.device_id, "post-command polling expired");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::testing::RecordingSink;

    fn polling() -> (Arc<RecordingSink>, PostCommandPolling<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let polling = PostCommandPolling::new(
            Arc::clone(&sink),
            ActivityFlag::new(true),
            PostCommandPollingConfig {
                interval: Duration::from_secs(1),
                duration: Duration::from_secs(10),
            },
        );
        (sink, polling)
    }

    #[tokio::test(start_paused = true)]
    async fn new_endpoint_of_same_device_replaces_previous() {
        let (sink, polling) = polling();

        polling.start(7, 1);
        polling.start(7, 2);
        assert!(!polling.is_suppressed("1_7"));
        assert!(polling.is_suppressed("2_7"));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let paths = sink.paths();
        assert_eq!(paths.len(), 3);
        assert!(paths.iter().all(|p| p == "/devices/7/endpoints/2/data"));
    }

    #[tokio::test(start_paused = true)]
    async fn other_devices_poll_independently() {
        let (sink, polling) = polling();
        polling.start(1, 1);
        polling.start(2, 1);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let mut paths = sink.paths();
        paths.sort();
        assert_eq!(
            paths,
            vec!["/devices/1/endpoints/1/data".to_owned(), "/devices/2/endpoints/1/data".to_owned()]
        );
        assert_eq!(polling.active_targets(), vec!["1_1".to_owned(), "1_2".to_owned()]);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_duration() {
        let (sink, polling) = polling();
        polling.start(3, 4);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(!polling.is_suppressed("4_3"));
        assert!(polling.active_targets().is_empty());
        assert_eq!(sink.paths().len(), 9);

        sink.clear();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(sink.paths().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_sends_keep_polling_until_deadline() {
        let sink = Arc::new(RecordingSink::failing_on(&["/devices/3/endpoints/4/data"]));
        let polling = PostCommandPolling::new(
            Arc::clone(&sink),
            ActivityFlag::new(true),
            PostCommandPollingConfig {
                interval: Duration::from_secs(1),
                duration: Duration::from_secs(10),
            },
        );
        polling.start(3, 4);

        tokio::time::sleep(Duration::from_millis(5500)).await;
        assert_eq!(sink.paths().len(), 5);
        assert!(polling.is_suppressed("4_3"));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(sink.paths().len(), 9);
        assert!(!polling.is_suppressed("4_3"));
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_stop_cancels_immediately() {
        let (sink, polling) = polling();
        polling.start(3, 4);
        assert!(polling.stop(3));
        assert!(!polling.stop(3));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(sink.paths().is_empty());
        assert!(!polling.is_suppressed("4_3"));
    }

    #[tokio::test(start_paused = true)]
    async fn replaced_loop_does_not_remove_successor() {
        let (_sink, polling) = polling();
        polling.start(9, 1);
        tokio::time::sleep(Duration::from_secs(8)).await;
        polling.start(9, 1);

        // The first loop's deadline passes; the second entry must survive.
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(polling.is_suppressed("1_9"));
    }
}
