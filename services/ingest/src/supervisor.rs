//! Feed supervisor: owns the upstream connection and drives every frame
//! through decoding and persistence.
//!
//! The supervisor is a state machine over [`Phase`]:
//!
//! ```text
//! Connecting --connected+subscribed--> Streaming --closed/error--> Backoff
//!     ^                                                               |
//!     +----------------------------delay------------------------------+
//!
//! any phase --shutdown--> ShuttingDown
//! ```
//!
//! A [`Session`] holds the live connection and a fresh decoder; it is built on
//! every successful connect and dropped when the connection ends. Reconnects
//! never give up. Frames are handled one at a time in arrival order and the
//! shutdown token is only checked between frames, so a strike that is being
//! stored always finishes.

use backoff::backoff::{Backoff, Constant};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use strike_pipeline::{IngestionDelta, StrikeDecoder, StrikeSink};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::feed_client::{FeedConnection, FeedConnector};

/// Named supervisor states, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Connecting,
    Streaming,
    Backoff,
    ShuttingDown,
}

/// Supervisor state, carrying the live session while streaming.
pub enum Phase {
    Connecting,
    Streaming(Session),
    Backoff,
    ShuttingDown,
}

impl Phase {
    pub fn state(&self) -> FeedState {
        match self {
            Phase::Connecting => FeedState::Connecting,
            Phase::Streaming(_) => FeedState::Streaming,
            Phase::Backoff => FeedState::Backoff,
            Phase::ShuttingDown => FeedState::ShuttingDown,
        }
    }
}

/// One connection's worth of state.
pub struct Session {
    connection: Box<dyn FeedConnection>,
    decoder: StrikeDecoder,
    stored: u64,
    failed: u64,
}

impl Session {
    fn new(connection: Box<dyn FeedConnection>) -> Self {
        Self {
            connection,
            decoder: StrikeDecoder::new(),
            stored: 0,
            failed: 0,
        }
    }

    fn frames(&self) -> u64 {
        self.stored + self.failed
    }

    fn log_stats(&self, message: &'static str) {
        let stats = self.decoder.stats();

        info!(
            frames = stats.frames,
            decoded = stats.decoded,
            rejected = stats.rejected,
            stored = self.stored,
            failed = self.failed,
            success_rate = format!("{:.1}", stats.success_rate()),
            "{}",
            message
        );
    }
}

/// Lifetime counters across all sessions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestTotals {
    pub received: u64,
    pub stored: u64,
    pub failed: u64,
    pub sessions: u64,
    pub reconnects: u64,
}

/// Supervisor tuning, taken from [`FeedConfig`].
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub subscribe_message: String,
    pub reconnect_delay: Duration,
    pub stats_log_interval: u64,
}

impl From<&FeedConfig> for SupervisorConfig {
    fn from(config: &FeedConfig) -> Self {
        Self {
            subscribe_message: config.subscribe_message.clone(),
            reconnect_delay: config.reconnect_delay(),
            stats_log_interval: config.stats_log_interval.max(1),
        }
    }
}

pub struct FeedSupervisor<C> {
    connector: C,
    sink: Arc<dyn StrikeSink>,
    config: SupervisorConfig,
    shutdown: CancellationToken,
    backoff: Constant,
    totals: IngestTotals,
}

impl<C: FeedConnector> FeedSupervisor<C> {
    pub fn new(
        connector: C,
        sink: Arc<dyn StrikeSink>,
        config: SupervisorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let backoff = Constant::new(config.reconnect_delay);
        Self {
            connector,
            sink,
            config,
            shutdown,
            backoff,
            totals: IngestTotals::default(),
        }
    }

    pub fn totals(&self) -> IngestTotals {
        self.totals
    }

    /// Run until the shutdown token fires.
    pub async fn run(mut self) -> IngestTotals {
        let mut phase = Phase::Connecting;

        while phase.state() != FeedState::ShuttingDown {
            phase = self.step(phase).await;
        }

        let totals = self.totals;
        info!(
            received = totals.received,
            stored = totals.stored,
            failed = totals.failed,
            sessions = totals.sessions,
            reconnects = totals.reconnects,
            "Ingest supervisor stopped"
        );
        totals
    }

    /// Perform one transition.
    pub async fn step(&mut self, phase: Phase) -> Phase {
        let next = match phase {
            Phase::Connecting => self.connect().await,
            Phase::Streaming(session) => self.stream(session).await,
            Phase::Backoff => self.wait().await,
            Phase::ShuttingDown => Phase::ShuttingDown,
        };

        debug!(state = ?next.state(), "Feed supervisor transition");
        next
    }

    async fn connect(&mut self) -> Phase {
        let connected = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Phase::ShuttingDown,
            result = self.connector.connect() => result,
        };

        let mut connection = match connected {
            Ok(connection) => connection,
            Err(e) => {
                warn!(error = %e, "Feed connection failed");
                return Phase::Backoff;
            }
        };

        if let Err(e) = connection.subscribe(&self.config.subscribe_message).await {
            warn!(error = %e, "Feed subscription failed");
            connection.close().await;
            return Phase::Backoff;
        }

        self.totals.sessions += 1;
        metrics::gauge!("ingest.feed.connected").set(1.0);
        info!(session = self.totals.sessions, "Subscribed to strike feed");

        Phase::Streaming(Session::new(connection))
    }

    async fn stream(&mut self, mut session: Session) -> Phase {
        loop {
            let frame = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    session.connection.close().await;
                    session.log_stats("Feed session closed for shutdown");
                    metrics::gauge!("ingest.feed.connected").set(0.0);
                    return Phase::ShuttingDown;
                }
                frame = session.connection.next_frame() => frame,
            };

            match frame {
                Ok(Some(frame)) => self.handle_frame(&mut session, &frame).await,
                Ok(None) => {
                    info!("Feed connection closed by peer");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Feed transport error");
                    break;
                }
            }
        }

        session.log_stats("Feed session ended");
        metrics::gauge!("ingest.feed.connected").set(0.0);
        Phase::Backoff
    }

    async fn wait(&mut self) -> Phase {
        self.totals.reconnects += 1;
        metrics::counter!("ingest.feed.reconnects").increment(1);

        let delay = self
            .backoff
            .next_backoff()
            .unwrap_or(self.config.reconnect_delay);
        info!(delay_ms = delay.as_millis() as u64, "Reconnecting to strike feed");

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Phase::ShuttingDown,
            _ = tokio::time::sleep(delay) => Phase::Connecting,
        }
    }

    async fn handle_frame(&mut self, session: &mut Session, frame: &Bytes) {
        metrics::counter!("ingest.frames.received").increment(1);

        let delta = match session.decoder.decode(frame) {
            Ok(strike) => match self.sink.insert_strike(&strike).await {
                Ok(_) => IngestionDelta::stored(),
                Err(e) => {
                    warn!(error = %e, time = strike.time, "Failed to store strike");
                    IngestionDelta::failed()
                }
            },
            Err(_) => IngestionDelta::failed(),
        };

        if let Err(e) = self.sink.record_ingestion(delta).await {
            warn!(error = %e, "Failed to update ingestion stats");
        }

        self.totals.received += 1;
        if delta.stored > 0 {
            session.stored += 1;
            self.totals.stored += 1;
            metrics::counter!("ingest.frames.stored").increment(1);
        } else {
            session.failed += 1;
            self.totals.failed += 1;
            metrics::counter!("ingest.frames.failed").increment(1);
        }

        if session.frames() % self.config.stats_log_interval == 0 {
            session.log_stats("Feed session stats");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed_client::FeedError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use strike_pipeline::{DecoderStats, NewStrike, StoreError};

    const GOOD: &[u8] = br#"{"time":1700000000123,"lat":45.2,"lon":1604008,"pol":"neg"}"#;
    const NO_TIME: &[u8] = br#"{"lat":45.2,"lon":16.0}"#;
    const BAD_LAT: &[u8] = br#"{"time":1700000000,"lat":95.5,"lon":16.0}"#;

    #[derive(Default)]
    struct MemorySink {
        strikes: Mutex<Vec<NewStrike>>,
        counters: Mutex<IngestionDelta>,
        fail_inserts: bool,
    }

    impl MemorySink {
        fn failing() -> Self {
            Self {
                fail_inserts: true,
                ..Default::default()
            }
        }

        fn counters(&self) -> IngestionDelta {
            *self.counters.lock().unwrap()
        }
    }

    #[async_trait]
    impl StrikeSink for MemorySink {
        async fn insert_strike(&self, strike: &NewStrike) -> Result<i64, StoreError> {
            if self.fail_inserts {
                return Err(StoreError::Query(sqlx::Error::PoolTimedOut));
            }
            let mut strikes = self.strikes.lock().unwrap();
            strikes.push(strike.clone());
            Ok(strikes.len() as i64)
        }

        async fn record_ingestion(&self, delta: IngestionDelta) -> Result<(), StoreError> {
            let mut counters = self.counters.lock().unwrap();
            counters.received += delta.received;
            counters.stored += delta.stored;
            counters.failed += delta.failed;
            Ok(())
        }
    }

    struct ScriptedConnection {
        frames: VecDeque<Result<Bytes, FeedError>>,
        hang_when_empty: bool,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl FeedConnection for ScriptedConnection {
        async fn subscribe(&mut self, _message: &str) -> Result<(), FeedError> {
            Ok(())
        }

        async fn next_frame(&mut self) -> Result<Option<Bytes>, FeedError> {
            match self.frames.pop_front() {
                Some(Ok(frame)) => Ok(Some(frame)),
                Some(Err(e)) => Err(e),
                None if self.hang_when_empty => std::future::pending().await,
                None => Ok(None),
            }
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    type Script = Result<Vec<Result<Bytes, FeedError>>, FeedError>;

    /// Hands out scripted connections; cancels `shutdown` once the script runs out.
    struct ScriptedConnector {
        script: Mutex<VecDeque<Script>>,
        connects: Mutex<u32>,
        shutdown: CancellationToken,
    }

    impl ScriptedConnector {
        fn new(script: Vec<Script>, shutdown: CancellationToken) -> Self {
            Self {
                script: Mutex::new(script.into()),
                connects: Mutex::new(0),
                shutdown,
            }
        }
    }

    #[async_trait]
    impl FeedConnector for ScriptedConnector {
        async fn connect(&self) -> Result<Box<dyn FeedConnection>, FeedError> {
            *self.connects.lock().unwrap() += 1;
            let next = self.script.lock().unwrap().pop_front();

            match next {
                Some(Ok(frames)) => Ok(Box::new(ScriptedConnection {
                    frames: frames.into(),
                    hang_when_empty: false,
                    closed: Arc::new(AtomicBool::new(false)),
                })),
                Some(Err(e)) => Err(e),
                None => {
                    self.shutdown.cancel();
                    Err(FeedError::ConnectionFailed("script exhausted".to_string()))
                }
            }
        }
    }

    fn frame(bytes: &[u8]) -> Result<Bytes, FeedError> {
        Ok(Bytes::copy_from_slice(bytes))
    }

    fn config() -> SupervisorConfig {
        SupervisorConfig {
            subscribe_message: r#"{"a":111}"#.to_string(),
            reconnect_delay: Duration::from_secs(5),
            stats_log_interval: 10,
        }
    }

    fn supervisor(
        script: Vec<Script>,
        sink: Arc<MemorySink>,
    ) -> (FeedSupervisor<ScriptedConnector>, CancellationToken) {
        let shutdown = CancellationToken::new();
        let connector = ScriptedConnector::new(script, shutdown.clone());
        let supervisor = FeedSupervisor::new(connector, sink, config(), shutdown.clone());
        (supervisor, shutdown)
    }

    fn session(frames: Vec<Result<Bytes, FeedError>>, hang: bool) -> (Session, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        let connection = ScriptedConnection {
            frames: frames.into(),
            hang_when_empty: hang,
            closed: closed.clone(),
        };
        (Session::new(Box::new(connection)), closed)
    }

    #[tokio::test]
    async fn test_frame_without_time_counts_as_failed() {
        let sink = Arc::new(MemorySink::default());
        let (mut supervisor, _) = supervisor(vec![], sink.clone());
        let (session, _) = session(vec![frame(NO_TIME)], false);

        let next = supervisor.step(Phase::Streaming(session)).await;

        assert_eq!(next.state(), FeedState::Backoff);
        assert_eq!(
            sink.counters(),
            IngestionDelta {
                received: 1,
                stored: 0,
                failed: 1
            }
        );
        assert!(sink.strikes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stores_valid_frames_and_drops_invalid() {
        let sink = Arc::new(MemorySink::default());
        let (mut supervisor, _) = supervisor(vec![], sink.clone());
        let (session, _) = session(vec![frame(GOOD), frame(BAD_LAT), frame(b"")], false);

        supervisor.step(Phase::Streaming(session)).await;

        let strikes = sink.strikes.lock().unwrap();
        assert_eq!(strikes.len(), 1);
        assert_eq!(strikes[0].lon, 16.04008);
        assert_eq!(strikes[0].pol.as_deref(), Some("neg"));
        assert_eq!(
            sink.counters(),
            IngestionDelta {
                received: 3,
                stored: 1,
                failed: 2
            }
        );
        assert_eq!(supervisor.totals().stored, 1);
    }

    #[tokio::test]
    async fn test_persistence_failure_counts_as_failed() {
        let sink = Arc::new(MemorySink::failing());
        let (mut supervisor, _) = supervisor(vec![], sink.clone());
        let (session, _) = session(vec![frame(GOOD)], false);

        supervisor.step(Phase::Streaming(session)).await;

        assert_eq!(sink.counters(), IngestionDelta::failed());
        assert_eq!(supervisor.totals().failed, 1);
    }

    #[tokio::test]
    async fn test_transport_error_leads_to_backoff() {
        let sink = Arc::new(MemorySink::default());
        let (mut supervisor, _) = supervisor(vec![], sink.clone());
        let (session, _) = session(
            vec![
                frame(GOOD),
                Err(FeedError::Transport("reset".to_string())),
                frame(GOOD),
            ],
            false,
        );

        let next = supervisor.step(Phase::Streaming(session)).await;

        assert_eq!(next.state(), FeedState::Backoff);
        assert_eq!(sink.counters().received, 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_before_next_frame() {
        let sink = Arc::new(MemorySink::default());
        let (mut supervisor, shutdown) = supervisor(vec![], sink.clone());
        let (session, closed) = session(vec![frame(GOOD)], true);

        shutdown.cancel();
        let next = supervisor.step(Phase::Streaming(session)).await;

        assert_eq!(next.state(), FeedState::ShuttingDown);
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(sink.counters().received, 0);
    }

    #[tokio::test]
    async fn test_connect_builds_fresh_session() {
        let sink = Arc::new(MemorySink::default());
        let (mut supervisor, _) = supervisor(vec![Ok(vec![frame(GOOD)])], sink.clone());

        let next = supervisor.step(Phase::Connecting).await;
        assert_eq!(next.state(), FeedState::Streaming);
        if let Phase::Streaming(session) = &next {
            assert_eq!(session.decoder.stats(), DecoderStats::default());
        }
        assert_eq!(supervisor.totals().sessions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_reconnects_until_shutdown() {
        let sink = Arc::new(MemorySink::default());
        let script = vec![
            Err(FeedError::ConnectionFailed("refused".to_string())),
            Ok(vec![frame(GOOD), frame(NO_TIME)]),
        ];
        let (supervisor, _) = supervisor(script, sink.clone());

        let started = tokio::time::Instant::now();
        let totals = supervisor.run().await;
        let elapsed = started.elapsed();

        assert_eq!(
            totals,
            IngestTotals {
                received: 2,
                stored: 1,
                failed: 1,
                sessions: 1,
                reconnects: 3,
            }
        );
        // Two full backoff delays; the third is cut short by shutdown.
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed < Duration::from_secs(15));
        assert_eq!(sink.counters().received, 2);
    }
}
