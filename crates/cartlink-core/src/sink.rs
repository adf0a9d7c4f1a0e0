//! Pass-through persistence hook.
//!
//! A [`RecordSink`] receives every raw notification along with its decoded
//! value. Sinks are fire-and-forget: an error or even a panic inside a sink
//! is logged and otherwise ignored.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::warn;

use cartlink_types::{ChannelKind, ReadingValue};

/// Receiver of raw telemetry rows, such as a local table or CSV writer.
pub trait RecordSink: Send + Sync {
    /// Record one notification.
    fn record(&self, channel: ChannelKind, raw: &[u8], value: ReadingValue) -> std::io::Result<()>;
}

/// Shared handle to a sink.
pub type SharedSink = Arc<dyn RecordSink>;

/// Hand a notification to `sink`, containing any failure.
pub(crate) fn record_contained(sink: &dyn RecordSink, channel: ChannelKind, raw: &[u8], value: ReadingValue) {
    match catch_unwind(AssertUnwindSafe(|| sink.record(channel, raw, value))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(channel = %channel, error = %e, "Record sink failed"),
        Err(_) => warn!(channel = %channel, "Record sink panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    impl RecordSink for Failing {
        fn record(&self, _: ChannelKind, _: &[u8], _: ReadingValue) -> std::io::Result<()> {
            Err(std::io::Error::other("disk full"))
        }
    }

    struct Panicking;

    impl RecordSink for Panicking {
        fn record(&self, _: ChannelKind, _: &[u8], _: ReadingValue) -> std::io::Result<()> {
            panic!("sink bug");
        }
    }

    #[test]
    fn test_failures_are_contained() {
        record_contained(&Failing, ChannelKind::Speed, b"1", ReadingValue::Value(1.0));
        record_contained(&Panicking, ChannelKind::Speed, b"1", ReadingValue::Value(1.0));
    }
}
