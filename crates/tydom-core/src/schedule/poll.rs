use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use tydom_api::{ActivityFlag, TydomCommand};

use super::CommandSink;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PollKey {
    url: String,
    interval: Duration,
}

/// Periodic `GET`s of cdata URLs, one loop per `(url, interval)` pair.
pub struct PollScheduler<S> {
    sink: Arc<S>,
    activity: ActivityFlag,
    entries: DashMap<PollKey, CancellationToken>,
    cancel: CancellationToken,
}

impl<S: CommandSink> PollScheduler<S> {
    pub fn new(sink: Arc<S>, activity: ActivityFlag) -> Self {
        Self {
            sink,
            activity,
            entries: DashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Start a loop for every URL not already polled at `interval`.
    ///
    /// Returns the URLs that were newly scheduled.
    pub fn schedule(&self, urls: &[String], interval: Duration) -> Vec<String> {
        let mut added = Vec::new();

        for url in urls {
            let key = PollKey {
                url: url.clone(),
                interval,
            };
            if let Entry::Vacant(slot) = self.entries.entry(key) {
                let token = self.cancel.child_token();
                tokio::spawn(poll_loop(
                    Arc::clone(&self.sink),
                    url.clone(),
                    interval,
                    self.activity.clone(),
                    token.clone(),
                ));
                slot.insert(token);
                added.push(url.clone());
            }
        }

        if !added.is_empty() {
            debug!(count = added.len(), ?interval, "scheduled cdata polls");
        }
        added
    }

    /// Stop one loop. Returns `false` if it was not scheduled.
    pub fn unschedule(&self, url: &str, interval: Duration) -> bool {
        let key = PollKey {
            url: url.to_owned(),
            interval,
        };
        match self.entries.remove(&key) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Distinct URLs currently scheduled, sorted.
    pub fn scheduled_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.entries.iter().map(|e| e.key().url.clone()).collect();
        urls.sort();
        urls.dedup();
        urls
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fire every scheduled URL once, now. Skipped while inactive.
    pub async fn poll_once_scheduled(&self) {
        if !self.activity.is_active() {
            trace!("inactive, skipping off-cycle poll");
            return;
        }
        for url in self.scheduled_urls() {
            if let Err(e) = self.sink.send_command(&TydomCommand::get(url.as_str())).await {
                warn!(url = %url, error = %e, "off-cycle poll failed");
            }
        }
    }

    /// Cancel every loop.
    pub fn stop_all(&self) {
        for entry in &self.entries {
            entry.value().cancel();
        }
        self.entries.clear();
    }
}

impl<S> Drop for PollScheduler<S> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn poll_loop<S: CommandSink>(
    sink: Arc<S>,
    url: String,
    interval: Duration,
    activity: ActivityFlag,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }

        if !activity.is_active() {
            trace!(url = %url, "inactive, skipping poll");
            continue;
        }

        if let Err(e) = sink.send_command(&TydomCommand::get(url.as_str())).await {
            warn!(url = %url, error = %e, "scheduled poll failed");
        }
    }
}
