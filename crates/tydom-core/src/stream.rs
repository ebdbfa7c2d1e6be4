// ── Message stream ──
//
// `Stream` view of the controller's message broadcast.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

use crate::message::TydomMessage;

/// Hydrated messages as they arrive.
///
/// A subscriber that falls behind the broadcast buffer skips the missed
/// messages (with a warning) instead of ending the stream.
pub struct MessageStream {
    inner: BroadcastStream<Arc<TydomMessage>>,
}

impl MessageStream {
    pub(crate) fn new(receiver: broadcast::Receiver<Arc<TydomMessage>>) -> Self {
        Self {
            inner: BroadcastStream::new(receiver),
        }
    }
}

impl Stream for MessageStream {
    type Item = Arc<TydomMessage>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(message))) => return Poll::Ready(Some(message)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    warn!(skipped, "message subscriber lagged");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
