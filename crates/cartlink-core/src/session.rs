//! The connection session.
//!
//! A [`ConnectionSession`] owns at most one link at a time. A connect attempt
//! races the transport's connect + capability discovery against a
//! [`ConnectTimer`]; exactly one side wins and the other is dropped. Each
//! attempt gets a generation number, and every write after an `.await`
//! checks it, so a [`disconnect`](ConnectionSession::disconnect) that lands
//! mid-attempt always leaves the session `Idle` with nothing running.
//!
//! Once connected, the link is supervised: when every monitor's stream has
//! ended, or the link reports itself down, the session ends with status
//! `Failed`.
//!
//! # Example
//!
//! ```ignore
//! let session = ConnectionSession::new(transport, SessionConfig::default(), events, None);
//! match session.connect(device).await {
//!     Ok(connection) => println!("connected, degraded: {:?}", connection.degraded),
//!     Err(Error::ConnectTimeout { .. }) => println!("timed out"),
//!     Err(e) => println!("failed: {e}"),
//! }
//! session.disconnect().await;
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, info, warn};

use cartlink_types::{ChannelKind, ChannelReading, DeviceDescriptor};

use crate::config::SessionConfig;
use crate::error::{ConnectionFailureReason, Error, Result};
use crate::events::{EventDispatcher, SessionEvent};
use crate::monitor::{ChannelMonitor, OnReading};
use crate::readings::{ReadingBoard, Readings};
use crate::sink::SharedSink;
use crate::timer::ConnectTimer;
use crate::transport::{SharedLink, Transport};
use crate::util::duration_millis;

/// Lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No link and no attempt in flight.
    Idle,
    /// A connect attempt is racing its timer.
    Connecting,
    /// The link is up.
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
        })
    }
}

/// Status shown to the presentation layer.
///
/// `TimedOut` and `Failed` describe how the last attempt ended; the session
/// itself is idle in both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Nothing happening.
    #[default]
    Idle,
    /// A connect attempt is in flight.
    Connecting,
    /// The link is up.
    Connected,
    /// The last attempt lost the race against its timer.
    TimedOut,
    /// The last attempt failed before its timer fired.
    Failed,
}

impl SessionStatus {
    /// The lifecycle state behind this status.
    pub fn state(&self) -> SessionState {
        match self {
            SessionStatus::Connecting => SessionState::Connecting,
            SessionStatus::Connected => SessionState::Connected,
            SessionStatus::Idle | SessionStatus::TimedOut | SessionStatus::Failed => SessionState::Idle,
        }
    }

    /// Whether the last attempt timed out.
    pub fn timed_out(&self) -> bool {
        matches!(self, SessionStatus::TimedOut)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionStatus::Idle => "Idle",
            SessionStatus::Connecting => "Connecting",
            SessionStatus::Connected => "Connected",
            SessionStatus::TimedOut => "Timed out",
            SessionStatus::Failed => "Failed",
        })
    }
}

/// How a [`ConnectionSession::disconnect`] call went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// The session was already idle; nothing was done.
    AlreadyIdle,
    /// A connect attempt was abandoned before any link existed.
    AttemptCancelled,
    /// The device acknowledged the teardown.
    Acknowledged,
    /// The teardown failed or timed out. Local state is idle regardless.
    Unacknowledged,
}

/// A successfully established session.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    /// The connected device.
    pub device: DeviceDescriptor,
    /// Channels whose subscription failed.
    pub degraded: Vec<ChannelKind>,
}

/// Who won the connect race.
enum Race {
    Cancelled,
    TimedOut,
    Finished(Result<SharedLink>),
}

#[derive(Default)]
struct Inner {
    generation: u64,
    device: Option<DeviceDescriptor>,
    link: Option<SharedLink>,
    monitors: Vec<ChannelMonitor>,
    timer: Option<ConnectTimer>,
    attempt: Option<CancellationToken>,
    degraded: Vec<ChannelKind>,
}

/// Owner of the single active connection.
pub struct ConnectionSession {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    inner: Arc<Mutex<Inner>>,
    status: Arc<watch::Sender<SessionStatus>>,
    board: Arc<ReadingBoard>,
    events: EventDispatcher,
    sink: Option<SharedSink>,
}

impl fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("status", &self.status())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ConnectionSession {
    /// Create an idle session.
    pub fn new(
        transport: Arc<dyn Transport>,
        config: SessionConfig,
        events: EventDispatcher,
        sink: Option<SharedSink>,
    ) -> Self {
        let (status, _) = watch::channel(SessionStatus::Idle);
        Self {
            transport,
            config,
            inner: Arc::new(Mutex::new(Inner::default())),
            status: Arc::new(status),
            board: Arc::new(ReadingBoard::new()),
            events,
            sink,
        }
    }

    /// The session's configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Connect to `device`, racing the configured connect timeout.
    ///
    /// Returns once exactly one of these has happened:
    /// - the link came up: the session is `Connected` and one monitor per
    ///   channel is running (channels that failed to subscribe are listed in
    ///   [`Connection::degraded`])
    /// - the timer fired first: [`Error::ConnectTimeout`], status `TimedOut`
    /// - the connect sequence failed first: [`Error::ConnectFailed`], status
    ///   `Failed`
    ///
    /// Rejected with [`Error::SessionBusy`] unless the session is idle, and
    /// returns [`Error::Cancelled`] if [`disconnect`](Self::disconnect)
    /// interrupts the attempt.
    #[tracing::instrument(level = "info", skip_all, fields(device_id = %device.id))]
    pub async fn connect(&self, device: DeviceDescriptor) -> Result<Connection> {
        let (generation, epoch, timer, cancel) = {
            let mut inner = self.inner.lock().await;
            let state = self.state();
            if state != SessionState::Idle {
                warn!(%state, "Connect rejected, session busy");
                return Err(Error::SessionBusy { state });
            }

            inner.generation += 1;
            let timer = ConnectTimer::arm(self.config.connect_timeout);
            let cancel = CancellationToken::new();
            inner.device = Some(device.clone());
            inner.timer = Some(timer.clone());
            inner.attempt = Some(cancel.clone());
            inner.degraded.clear();
            let epoch = self.board.reset();
            self.status.send_replace(SessionStatus::Connecting);
            (inner.generation, epoch, timer, cancel)
        };

        info!(name = device.display_name(), timeout = ?timer.duration(), "Connecting");
        self.events.send(SessionEvent::Connecting {
            device: device.clone(),
        });

        // Holds the link once the transport has connected, so a lost race can
        // still release it while capability discovery is in flight.
        let mut pending = OnceCell::new();
        let race = tokio::select! {
            biased;
            _ = cancel.cancelled() => Race::Cancelled,
            result = self.establish(&device, &pending) => Race::Finished(result),
            _ = timer.expired() => Race::TimedOut,
        };

        if matches!(race, Race::Cancelled | Race::TimedOut)
            && let Some(link) = pending.take()
        {
            self.release(link);
        }

        match race {
            Race::Cancelled => {
                debug!("Connect attempt cancelled");
                Err(Error::Cancelled)
            }
            Race::TimedOut => self.finish_timed_out(generation, &device).await,
            Race::Finished(Err(e)) => self.finish_failed(generation, &device, e).await,
            Race::Finished(Ok(link)) => self.finish_connected(generation, epoch, device, link).await,
        }
    }

    /// Connect and discover capabilities. The link is parked in `pending` as
    /// soon as it exists.
    async fn establish(&self, device: &DeviceDescriptor, pending: &OnceCell<SharedLink>) -> Result<SharedLink> {
        let link = self
            .transport
            .connect(device)
            .await
            .map_err(|e| e.into_connect_failure(&device.id))?;
        let _ = pending.set(link.clone());

        if let Err(e) = link.discover_capabilities().await {
            self.release(link);
            return Err(e.into_connect_failure(&device.id));
        }
        Ok(link)
    }

    async fn finish_timed_out(&self, generation: u64, device: &DeviceDescriptor) -> Result<Connection> {
        {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation {
                return Err(Error::Cancelled);
            }
            inner.timer = None;
            inner.attempt = None;
            inner.device = None;
            self.board.reset();
            self.status.send_replace(SessionStatus::TimedOut);
        }

        let timeout = self.config.connect_timeout;
        warn!(?timeout, "Connect timed out");
        self.events.send(SessionEvent::ConnectTimedOut {
            device_id: device.id.clone(),
            timeout_ms: duration_millis(timeout),
        });
        Err(Error::connect_timeout(&device.id, timeout))
    }

    async fn finish_failed(&self, generation: u64, device: &DeviceDescriptor, error: Error) -> Result<Connection> {
        {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation {
                return Err(Error::Cancelled);
            }
            if let Some(timer) = inner.timer.take() {
                timer.cancel();
            }
            inner.attempt = None;
            inner.device = None;
            self.board.reset();
            self.status.send_replace(SessionStatus::Failed);
        }

        warn!(error = %error, "Connect failed");
        self.events.send(SessionEvent::ConnectFailed {
            device_id: device.id.clone(),
            reason: error.to_string(),
        });
        Err(error)
    }

    async fn finish_connected(
        &self,
        generation: u64,
        epoch: u64,
        device: DeviceDescriptor,
        link: SharedLink,
    ) -> Result<Connection> {
        {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation {
                drop(inner);
                self.release(link);
                return Err(Error::Cancelled);
            }
            if let Some(timer) = inner.timer.take() {
                timer.cancel();
            }
            inner.attempt = None;
            inner.link = Some(link.clone());
            self.status.send_replace(SessionStatus::Connected);
        }
        info!("Connected");

        let mut monitors = Vec::with_capacity(ChannelKind::ALL.len());
        let mut degraded = Vec::new();
        for channel in ChannelKind::ALL {
            let characteristic = self.config.channels.characteristic(channel);
            match ChannelMonitor::start(
                link.clone(),
                channel,
                characteristic,
                self.on_reading(epoch),
                self.sink.clone(),
            )
            .await
            {
                Ok(monitor) => monitors.push(monitor),
                Err(e) => {
                    warn!(channel = %channel, error = %e, "Channel degraded");
                    degraded.push(channel);
                    self.events.send(SessionEvent::SubscriptionFailed {
                        device_id: device.id.clone(),
                        channel,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let finished: Vec<_> = monitors.iter().map(ChannelMonitor::finished).collect();
        let stale = {
            let mut inner = self.inner.lock().await;
            if inner.generation == generation {
                inner.monitors = monitors;
                inner.degraded = degraded.clone();
                None
            } else {
                Some(monitors)
            }
        };
        if let Some(monitors) = stale {
            self.stop_monitors(monitors).await;
            return Err(Error::Cancelled);
        }
        self.supervise(generation, device.id.clone(), link, finished);

        self.events.send(SessionEvent::Connected {
            device_id: device.id.clone(),
            degraded: degraded.clone(),
        });
        Ok(Connection { device, degraded })
    }

    fn on_reading(&self, epoch: u64) -> OnReading {
        let board = self.board.clone();
        let events = self.events.clone();
        Arc::new(move |reading: ChannelReading| {
            if board.publish(epoch, reading) {
                events.send(SessionEvent::Reading { reading });
            }
        })
    }

    /// Best-effort teardown of a link nobody will own.
    fn release(&self, link: SharedLink) {
        let timeout = self.config.teardown_timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, link.disconnect()).await {
                Ok(Ok(())) => debug!(device_id = link.device_id(), "Released orphaned link"),
                Ok(Err(e)) => debug!(device_id = link.device_id(), error = %e, "Orphaned link teardown failed"),
                Err(_) => debug!(device_id = link.device_id(), "Orphaned link teardown timed out"),
            }
        });
    }

    async fn stop_monitors(&self, monitors: Vec<ChannelMonitor>) {
        stop_monitors(monitors, self.config.unsubscribe_timeout).await;
    }

    /// Watch an established link until it is lost or the session moves on.
    ///
    /// A lost link ends the session the way a failed attempt does: the
    /// session is left idle with status `Failed`, and a new `connect()` is
    /// accepted.
    fn supervise(
        &self,
        generation: u64,
        device_id: String,
        link: SharedLink,
        finished: Vec<WaitForCancellationFutureOwned>,
    ) {
        let inner = self.inner.clone();
        let status = self.status.clone();
        let board = self.board.clone();
        let events = self.events.clone();
        let unsubscribe_timeout = self.config.unsubscribe_timeout;
        let teardown_timeout = self.config.teardown_timeout;

        tokio::spawn(async move {
            if !wait_for_link_loss(&link, finished, &inner, generation).await {
                return;
            }

            let (monitors, link) = {
                let mut inner = inner.lock().await;
                if inner.generation != generation {
                    return;
                }
                inner.generation += 1;
                inner.degraded.clear();
                inner.device = None;
                let monitors = std::mem::take(&mut inner.monitors);
                let link = inner.link.take();
                board.reset();
                status.send_replace(SessionStatus::Failed);
                (monitors, link)
            };
            warn!(%device_id, "Link lost");

            stop_monitors(monitors, unsubscribe_timeout).await;
            let teardown = match link {
                Some(link) => tear_down(&link, teardown_timeout).await,
                None => Teardown::AttemptCancelled,
            };

            let error = Error::connect_failed(&device_id, ConnectionFailureReason::LinkLost);
            events.send(SessionEvent::ConnectFailed {
                device_id: device_id.clone(),
                reason: error.to_string(),
            });
            events.send(SessionEvent::Disconnected {
                device_id,
                acknowledged: teardown == Teardown::Acknowledged,
            });
        });
    }

    /// End the session.
    ///
    /// Local state becomes `Idle` before anything is awaited: the timer is
    /// cancelled, any in-flight attempt is abandoned, readings are cleared
    /// and no further reading is delivered. Monitors are then stopped and the
    /// link teardown is requested, bounded by the configured timeouts.
    /// Idempotent.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn disconnect(&self) -> Teardown {
        let (device, link, monitors) = {
            let mut inner = self.inner.lock().await;
            if self.state() == SessionState::Idle {
                debug!("Already idle");
                return Teardown::AlreadyIdle;
            }

            inner.generation += 1;
            if let Some(timer) = inner.timer.take() {
                timer.cancel();
            }
            if let Some(attempt) = inner.attempt.take() {
                attempt.cancel();
            }
            inner.degraded.clear();
            let monitors = std::mem::take(&mut inner.monitors);
            let device = inner.device.take();
            let link = inner.link.take();
            self.board.reset();
            self.status.send_replace(SessionStatus::Idle);
            (device, link, monitors)
        };

        self.stop_monitors(monitors).await;

        let teardown = match &link {
            None => Teardown::AttemptCancelled,
            Some(link) => tear_down(link, self.config.teardown_timeout).await,
        };

        let device_id = device
            .map(|d| d.id)
            .or_else(|| link.as_ref().map(|l| l.device_id().to_string()))
            .unwrap_or_default();
        info!(%device_id, ?teardown, "Disconnected");
        self.events.send(SessionEvent::Disconnected {
            device_id,
            acknowledged: teardown == Teardown::Acknowledged,
        });
        teardown
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.status().state()
    }

    /// Whether the last attempt timed out.
    pub fn timed_out(&self) -> bool {
        self.status().timed_out()
    }

    /// Receiver notified on every status change.
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Latest readings.
    pub fn readings(&self) -> Readings {
        self.board.snapshot()
    }

    /// Receiver notified on every accepted reading.
    pub fn subscribe_readings(&self) -> watch::Receiver<Readings> {
        self.board.subscribe()
    }

    /// The device being connected to or connected.
    pub async fn device(&self) -> Option<DeviceDescriptor> {
        self.inner.lock().await.device.clone()
    }

    /// Channels whose subscription failed in the current session.
    pub async fn degraded_channels(&self) -> Vec<ChannelKind> {
        self.inner.lock().await.degraded.clone()
    }

    /// Number of running channel monitors.
    pub async fn monitor_count(&self) -> usize {
        self.inner.lock().await.monitors.len()
    }

    /// Whether a connect timer is armed.
    pub async fn timer_armed(&self) -> bool {
        self.inner.lock().await.timer.is_some()
    }
}

/// How often an established link is asked whether it is still up.
const LINK_CHECK_INTERVAL: Duration = Duration::from_secs(1);

async fn stop_monitors(monitors: Vec<ChannelMonitor>, unsubscribe_timeout: Duration) {
    futures::future::join_all(monitors.into_iter().map(|m| m.stop(unsubscribe_timeout))).await;
}

/// Request link teardown, bounded by `timeout`.
async fn tear_down(link: &SharedLink, timeout: Duration) -> Teardown {
    match tokio::time::timeout(timeout, link.disconnect()).await {
        Ok(Ok(())) => Teardown::Acknowledged,
        Ok(Err(e)) => {
            warn!(error = %e, "Link teardown failed");
            Teardown::Unacknowledged
        }
        Err(_) => {
            warn!(?timeout, "Link teardown not acknowledged");
            Teardown::Unacknowledged
        }
    }
}

/// Resolves to `true` once every monitor has ended or the link reports
/// itself down, or to `false` as soon as generation `generation` is over.
async fn wait_for_link_loss(
    link: &SharedLink,
    finished: Vec<WaitForCancellationFutureOwned>,
    inner: &Mutex<Inner>,
    generation: u64,
) -> bool {
    let all_ended = async move {
        if finished.is_empty() {
            std::future::pending::<()>().await;
        }
        futures::future::join_all(finished).await;
    };
    tokio::pin!(all_ended);

    let mut checks = tokio::time::interval(LINK_CHECK_INTERVAL);
    checks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = &mut all_ended => return true,
            _ = checks.tick() => {
                if inner.lock().await.generation != generation {
                    return false;
                }
                if !link.is_connected().await {
                    return true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockTransport, TeardownBehavior};
    use cartlink_types::{ReadingValue, uuids};

    fn session(transport: &MockTransport) -> Arc<ConnectionSession> {
        Arc::new(ConnectionSession::new(
            Arc::new(transport.clone()),
            SessionConfig::default(),
            EventDispatcher::new(32),
            None,
        ))
    }

    fn cart() -> DeviceDescriptor {
        DeviceDescriptor::new("AA:BB:CC:DD:EE:FF").with_name("CART-42")
    }

    #[test]
    fn test_status_maps_to_state() {
        assert_eq!(SessionStatus::TimedOut.state(), SessionState::Idle);
        assert_eq!(SessionStatus::Failed.state(), SessionState::Idle);
        assert_eq!(SessionStatus::Connecting.state(), SessionState::Connecting);
        assert!(SessionStatus::TimedOut.timed_out());
        assert!(!SessionStatus::Failed.timed_out());
        assert_eq!(SessionState::Connected.to_string(), "connected");
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_just_before_deadline_connects() {
        let transport = MockTransport::new();
        transport.set_connect_latency(Duration::from_millis(14_999));
        let session = session(&transport);

        let connection = session.connect(cart()).await.unwrap();
        assert!(connection.degraded.is_empty());
        assert_eq!(session.status(), SessionStatus::Connected);
        assert!(!session.timed_out());
        assert!(!session.timer_armed().await);
        assert_eq!(session.monitor_count().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_first_times_out_and_late_confirmation_is_ignored() {
        let transport = MockTransport::new();
        transport.set_connect_latency(Duration::from_secs(20));
        let session = session(&transport);
        let mut events = session.events.subscribe();

        let err = session.connect(cart()).await.unwrap_err();
        assert!(matches!(err, Error::ConnectTimeout { .. }));
        assert_eq!(session.status(), SessionStatus::TimedOut);
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.device().await.is_none());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(session.status(), SessionStatus::TimedOut);
        assert_eq!(session.monitor_count().await, 0);
        assert_eq!(transport.active_subscriptions().await, 0);

        assert!(matches!(events.recv().await.unwrap(), SessionEvent::Connecting { .. }));
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::ConnectTimedOut { timeout_ms: 15_000, .. }
        ));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_discovery_counts_against_the_timer() {
        let transport = MockTransport::new();
        transport.set_connect_latency(Duration::from_secs(10));
        transport.set_discover_latency(Duration::from_secs(10));
        let session = session(&transport);

        assert!(matches!(
            session.connect(cart()).await,
            Err(Error::ConnectTimeout { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_during_discovery_releases_link() {
        let transport = MockTransport::new();
        transport.set_connect_latency(Duration::from_secs(10));
        transport.set_discover_latency(Duration::from_secs(10));
        let session = session(&transport);

        let err = session.connect(cart()).await.unwrap_err();
        assert!(matches!(err, Error::ConnectTimeout { .. }));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(transport.disconnect_count(), 1);
        assert!(!transport.is_link_up());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.disconnect_count(), 1);
        assert_eq!(session.status(), SessionStatus::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_during_discovery_releases_link() {
        let transport = MockTransport::new();
        transport.set_connect_latency(Duration::from_secs(1));
        transport.set_discover_latency(Duration::from_secs(10));
        let session = session(&transport);

        let attempt = tokio::spawn({
            let session = session.clone();
            async move { session.connect(cart()).await }
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(transport.is_link_up());

        assert_eq!(session.disconnect().await, Teardown::AttemptCancelled);
        assert!(matches!(attempt.await.unwrap(), Err(Error::Cancelled)));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(transport.disconnect_count(), 1);
        assert!(!transport.is_link_up());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_while_monitors_start() {
        let transport = MockTransport::new();
        transport.set_subscribe_latency(Duration::from_secs(1));
        transport.set_teardown(TeardownBehavior::Hang).await;
        let session = session(&transport);

        let attempt = tokio::spawn({
            let session = session.clone();
            async move { session.connect(cart()).await }
        });
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(session.status(), SessionStatus::Connected);

        assert_eq!(session.disconnect().await, Teardown::Unacknowledged);
        assert!(matches!(attempt.await.unwrap(), Err(Error::Cancelled)));

        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(session.monitor_count().await, 0);
        assert_eq!(transport.active_subscriptions().await, 0);
        assert_eq!(transport.unsubscribe_count(), 3);
        assert_eq!(session.readings(), Readings::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_fails_session() {
        let transport = MockTransport::new();
        let session = session(&transport);
        session.connect(cart()).await.unwrap();
        let mut status = session.subscribe_status();
        let mut events = session.events.subscribe();

        transport.drop_link().await;
        tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| *s == SessionStatus::Failed),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.monitor_count().await, 0);
        assert!(session.device().await.is_none());

        let mut lost = Vec::new();
        while lost.len() < 2 {
            match tokio::time::timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap() {
                e @ (SessionEvent::ConnectFailed { .. } | SessionEvent::Disconnected { .. }) => lost.push(e),
                _ => {}
            }
        }
        assert!(matches!(lost[0], SessionEvent::ConnectFailed { .. }));
        assert!(matches!(lost[1], SessionEvent::Disconnected { .. }));

        session.connect(cart()).await.unwrap();
        assert_eq!(session.status(), SessionStatus::Connected);
        assert_eq!(session.monitor_count().await, 3);
        assert_eq!(transport.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_detected_without_monitors() {
        let transport = MockTransport::new();
        for characteristic in [uuids::SPEED, uuids::RANGE, uuids::BATTERY] {
            transport.fail_subscribe(characteristic).await;
        }
        let session = session(&transport);
        let connection = session.connect(cart()).await.unwrap();
        assert_eq!(connection.degraded.len(), 3);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(session.status(), SessionStatus::Connected);

        transport.drop_link().await;
        let mut status = session.subscribe_status();
        tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| *s == SessionStatus::Failed),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(session.degraded_channels().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_before_timer() {
        let transport = MockTransport::new();
        transport.set_connect_latency(Duration::from_secs(2));
        transport.fail_connect(ConnectionFailureReason::Rejected).await;
        let session = session(&transport);

        let start = tokio::time::Instant::now();
        let err = session.connect(cart()).await.unwrap_err();
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert!(matches!(err, Error::ConnectFailed { .. }));
        assert_eq!(session.status(), SessionStatus::Failed);
        assert!(!session.timed_out());
        assert!(!session.timer_armed().await);
    }

    #[tokio::test]
    async fn test_discovery_failure_releases_link() {
        let transport = MockTransport::new();
        transport.set_fail_discovery(true);
        let session = session(&transport);

        let err = session.connect(cart()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::ConnectFailed {
                reason: ConnectionFailureReason::CapabilityDiscovery(_),
                ..
            }
        ));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(transport.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_while_connected_is_rejected() {
        let transport = MockTransport::new();
        let session = session(&transport);
        session.connect(cart()).await.unwrap();

        let err = session.connect(DeviceDescriptor::new("other")).await.unwrap_err();
        assert!(matches!(
            err,
            Error::SessionBusy {
                state: SessionState::Connected
            }
        ));
        assert_eq!(session.status(), SessionStatus::Connected);
        assert_eq!(session.device().await.unwrap().id, cart().id);
        assert_eq!(session.monitor_count().await, 3);
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_while_connecting_is_rejected() {
        let transport = MockTransport::new();
        transport.set_connect_latency(Duration::from_secs(3));
        let session = session(&transport);

        let first = tokio::spawn({
            let session = session.clone();
            async move { session.connect(cart()).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(session.state(), SessionState::Connecting);

        let err = session.connect(cart()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::SessionBusy {
                state: SessionState::Connecting
            }
        ));

        assert!(first.await.unwrap().is_ok());
        assert_eq!(session.status(), SessionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_while_connecting_abandons_attempt() {
        let transport = MockTransport::new();
        transport.set_connect_latency(Duration::from_secs(5));
        let session = session(&transport);

        let attempt = tokio::spawn({
            let session = session.clone();
            async move { session.connect(cart()).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(session.disconnect().await, Teardown::AttemptCancelled);
        assert!(matches!(attempt.await.unwrap(), Err(Error::Cancelled)));
        assert_eq!(session.status(), SessionStatus::Idle);
        assert!(!session.timer_armed().await);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(session.status(), SessionStatus::Idle);
        assert!(!session.timed_out());
    }

    #[tokio::test]
    async fn test_degraded_channel_does_not_fail_session() {
        let transport = MockTransport::new();
        transport.fail_subscribe(uuids::BATTERY).await;
        let session = session(&transport);

        let connection = session.connect(cart()).await.unwrap();
        assert_eq!(connection.degraded, vec![ChannelKind::Battery]);
        assert_eq!(session.degraded_channels().await, vec![ChannelKind::Battery]);
        assert_eq!(session.monitor_count().await, 2);
        assert_eq!(session.status(), SessionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_with_hanging_teardown() {
        let transport = MockTransport::new();
        transport.set_teardown(TeardownBehavior::Hang).await;
        let session = session(&transport);
        session.connect(cart()).await.unwrap();

        let start = tokio::time::Instant::now();
        assert_eq!(session.disconnect().await, Teardown::Unacknowledged);
        assert_eq!(start.elapsed(), session.config().teardown_timeout);
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(session.monitor_count().await, 0);
        assert!(session.device().await.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_with_failing_teardown() {
        let transport = MockTransport::new();
        transport.set_teardown(TeardownBehavior::Fail).await;
        let session = session(&transport);
        session.connect(cart()).await.unwrap();

        assert_eq!(session.disconnect().await, Teardown::Unacknowledged);
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(session.disconnect().await, Teardown::AlreadyIdle);
    }

    #[tokio::test]
    async fn test_readings_cleared_and_stopped_on_disconnect() {
        let transport = MockTransport::new();
        let session = session(&transport);
        session.connect(cart()).await.unwrap();

        let mut readings = session.subscribe_readings();
        transport.notify(uuids::SPEED, b"7.3").await;
        readings
            .wait_for(|r| r.speed() == ReadingValue::Value(7.3))
            .await
            .unwrap();

        assert_eq!(session.disconnect().await, Teardown::Acknowledged);
        assert_eq!(session.readings(), Readings::default());
        assert!(!transport.notify(uuids::SPEED, b"9.9").await);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(session.readings(), Readings::default());
    }

    #[tokio::test]
    async fn test_reconnect_after_failure() {
        let transport = MockTransport::new();
        transport.fail_connect(ConnectionFailureReason::LinkLost).await;
        let session = session(&transport);
        assert!(session.connect(cart()).await.is_err());

        transport.clear_connect_failure().await;
        session.connect(cart()).await.unwrap();
        assert_eq!(session.status(), SessionStatus::Connected);
    }
}
