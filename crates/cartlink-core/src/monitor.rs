//! Per-channel notification monitors.
//!
//! A [`ChannelMonitor`] owns one subscription on a connected device. Its
//! background task decodes every payload in arrival order and hands the
//! result upward through an [`OnReading`] callback; it never touches session
//! state. Empty notifications are recorded but not forwarded, so they leave
//! the channel's previous reading in place.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, warn};
use uuid::Uuid;

use cartlink_types::decode::try_decode;
use cartlink_types::{ChannelKind, ChannelReading, DecodeError, ReadingValue};

use crate::error::{Error, Result};
use crate::sink::{SharedSink, record_contained};
use crate::transport::{NotificationStream, SharedLink};

/// Callback receiving each decoded reading.
pub type OnReading = Arc<dyn Fn(ChannelReading) + Send + Sync>;

/// A running subscription on one channel.
pub struct ChannelMonitor {
    channel: ChannelKind,
    characteristic: Uuid,
    link: SharedLink,
    cancel: CancellationToken,
    done: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ChannelMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelMonitor")
            .field("channel", &self.channel)
            .field("characteristic", &self.characteristic)
            .field("running", &self.is_running())
            .finish()
    }
}

impl ChannelMonitor {
    /// Subscribe to `characteristic` on `link` and start forwarding readings.
    ///
    /// Fails with [`Error::SubscriptionFailed`] if the subscription cannot be
    /// enabled; the caller decides whether that is fatal.
    pub async fn start(
        link: SharedLink,
        channel: ChannelKind,
        characteristic: Uuid,
        on_reading: OnReading,
        sink: Option<SharedSink>,
    ) -> Result<Self> {
        let stream = link
            .subscribe(characteristic)
            .await
            .map_err(|e| Error::subscription_failed(channel, e.to_string()))?;
        debug!(channel = %channel, %characteristic, "Subscribed");

        let cancel = CancellationToken::new();
        let done = CancellationToken::new();
        let handle = tokio::spawn(run(
            stream,
            channel,
            on_reading,
            sink,
            cancel.clone(),
            done.clone(),
        ));

        Ok(Self {
            channel,
            characteristic,
            link,
            cancel,
            done,
            handle: Some(handle),
        })
    }

    /// The monitored channel.
    pub fn channel(&self) -> ChannelKind {
        self.channel
    }

    /// Whether the forwarding task is still alive.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Resolves once the forwarding task has exited, whether it was stopped
    /// or its notification stream ended.
    pub fn finished(&self) -> WaitForCancellationFutureOwned {
        self.done.clone().cancelled_owned()
    }

    /// Stop forwarding and unsubscribe.
    ///
    /// No reading is delivered once this returns. The unsubscribe request is
    /// best effort: if the link already dropped, or the request does not
    /// complete within `unsubscribe_timeout`, the monitor counts as stopped.
    pub async fn stop(mut self, unsubscribe_timeout: Duration) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            warn!(channel = %self.channel, error = %e, "Monitor task ended abnormally");
        }

        match tokio::time::timeout(unsubscribe_timeout, self.link.unsubscribe(self.characteristic)).await {
            Ok(Ok(())) => debug!(channel = %self.channel, "Unsubscribed"),
            Ok(Err(e)) => debug!(channel = %self.channel, error = %e, "Unsubscribe failed, treating as stopped"),
            Err(_) => debug!(channel = %self.channel, "Unsubscribe timed out, treating as stopped"),
        }
    }
}

impl Drop for ChannelMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    mut stream: NotificationStream,
    channel: ChannelKind,
    on_reading: OnReading,
    sink: Option<SharedSink>,
    cancel: CancellationToken,
    done: CancellationToken,
) {
    let _done = done.drop_guard();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            payload = stream.next() => {
                let Some(payload) = payload else {
                    debug!(channel = %channel, "Notification stream ended");
                    break;
                };

                let decoded = try_decode(&payload);
                let value = match &decoded {
                    Ok(v) => ReadingValue::Value(*v),
                    Err(e) => {
                        debug!(channel = %channel, reason = %e, "Payload skipped");
                        ReadingValue::Unavailable
                    }
                };

                if let Some(sink) = &sink {
                    record_contained(sink.as_ref(), channel, &payload, value);
                }
                // An empty notification carries no sample; the last reading stands.
                if matches!(decoded, Err(DecodeError::Empty)) {
                    continue;
                }
                on_reading(ChannelReading::new(channel, value));
            }
        }
    }
}
