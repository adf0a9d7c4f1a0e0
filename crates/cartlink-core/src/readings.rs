//! Latest-value store for the three telemetry channels.
//!
//! Channel monitors publish into a single [`ReadingBoard`]; the presentation
//! layer observes it through a `watch` receiver. Each connect attempt opens a
//! new epoch, and publishes tagged with an older epoch are dropped, so a
//! monitor that is still winding down after a disconnect cannot resurrect a
//! value.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

use cartlink_types::{ChannelKind, ChannelReading, ReadingValue};

/// Snapshot of the latest reading on every channel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Readings {
    /// Latest speed reading.
    pub speed: Option<ChannelReading>,
    /// Latest range reading.
    pub range: Option<ChannelReading>,
    /// Latest battery reading.
    pub battery: Option<ChannelReading>,
}

impl Readings {
    /// Latest reading on `channel`, if any arrived in this session.
    pub fn reading(&self, channel: ChannelKind) -> Option<&ChannelReading> {
        match channel {
            ChannelKind::Speed => self.speed.as_ref(),
            ChannelKind::Range => self.range.as_ref(),
            ChannelKind::Battery => self.battery.as_ref(),
        }
    }

    /// Value on `channel`; `Unavailable` until a valid payload arrives.
    pub fn value(&self, channel: ChannelKind) -> ReadingValue {
        self.reading(channel)
            .map(|r| r.value)
            .unwrap_or(ReadingValue::Unavailable)
    }

    /// Speed value.
    pub fn speed(&self) -> ReadingValue {
        self.value(ChannelKind::Speed)
    }

    /// Range value.
    pub fn range(&self) -> ReadingValue {
        self.value(ChannelKind::Range)
    }

    /// Battery value.
    pub fn battery(&self) -> ReadingValue {
        self.value(ChannelKind::Battery)
    }

    fn slot_mut(&mut self, channel: ChannelKind) -> &mut Option<ChannelReading> {
        match channel {
            ChannelKind::Speed => &mut self.speed,
            ChannelKind::Range => &mut self.range,
            ChannelKind::Battery => &mut self.battery,
        }
    }
}

/// Single owner of the latest readings.
#[derive(Debug)]
pub struct ReadingBoard {
    epoch: AtomicU64,
    readings: watch::Sender<Readings>,
}

impl Default for ReadingBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadingBoard {
    /// Create an empty board at epoch 0.
    pub fn new() -> Self {
        let (readings, _) = watch::channel(Readings::default());
        Self {
            epoch: AtomicU64::new(0),
            readings,
        }
    }

    /// Current epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Clear every channel and open a new epoch. Returns the new epoch.
    pub fn reset(&self) -> u64 {
        // Bump first: a publish racing with this call either lands before the
        // clear or sees the new epoch and is dropped.
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.readings.send_if_modified(|readings| {
            let changed = *readings != Readings::default();
            *readings = Readings::default();
            changed
        });
        epoch
    }

    /// Store `reading` if `epoch` is still current.
    ///
    /// Returns `false` when the publish was stale and ignored.
    pub fn publish(&self, epoch: u64, reading: ChannelReading) -> bool {
        let mut accepted = false;
        self.readings.send_if_modified(|readings| {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return false;
            }
            *readings.slot_mut(reading.channel) = Some(reading);
            accepted = true;
            true
        });
        accepted
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Readings {
        *self.readings.borrow()
    }

    /// Receiver notified on every accepted change.
    pub fn subscribe(&self) -> watch::Receiver<Readings> {
        self.readings.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_board_is_unavailable() {
        let board = ReadingBoard::new();
        let readings = board.snapshot();
        for channel in ChannelKind::ALL {
            assert_eq!(readings.value(channel), ReadingValue::Unavailable);
        }
    }

    #[test]
    fn test_publish_keeps_latest_per_channel() {
        let board = ReadingBoard::new();
        let epoch = board.reset();

        assert!(board.publish(epoch, ChannelReading::new(ChannelKind::Speed, ReadingValue::Value(5.0))));
        assert!(board.publish(epoch, ChannelReading::new(ChannelKind::Speed, ReadingValue::Value(7.3))));
        assert!(board.publish(epoch, ChannelReading::new(ChannelKind::Battery, ReadingValue::Unavailable)));

        let readings = board.snapshot();
        assert_eq!(readings.speed(), ReadingValue::Value(7.3));
        assert_eq!(readings.range(), ReadingValue::Unavailable);
        assert!(readings.battery.is_some());
        assert_eq!(readings.battery(), ReadingValue::Unavailable);
    }

    #[test]
    fn test_stale_epoch_is_ignored() {
        let board = ReadingBoard::new();
        let old = board.reset();
        let new = board.reset();
        assert_ne!(old, new);

        assert!(!board.publish(old, ChannelReading::new(ChannelKind::Range, ReadingValue::Value(12.0))));
        assert_eq!(board.snapshot(), Readings::default());
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let board = ReadingBoard::new();
        let mut rx = board.subscribe();
        let epoch = board.reset();

        board.publish(epoch, ChannelReading::new(ChannelKind::Range, ReadingValue::Value(31.5)));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().range(), ReadingValue::Value(31.5));

        board.reset();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Readings::default());
    }
}
