//! Subscriber side of a sampled property.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Stream of property updates. Dropping it ends the sampling task.
pub struct PropertyStream<T> {
    name: String,
    inner: ReceiverStream<T>,
}

impl<T> PropertyStream<T> {
    pub(super) fn new(name: String, rx: mpsc::Receiver<T>) -> Self {
        Self {
            name,
            inner: ReceiverStream::new(rx),
        }
    }

    /// Name of the subscribed property.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Stream for PropertyStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl<T> std::fmt::Debug for PropertyStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyStream")
            .field("name", &self.name)
            .finish()
    }
}
