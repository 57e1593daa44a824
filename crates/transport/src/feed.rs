use std::marker::PhantomData;
use std::sync::Arc;

use rookery_core::ChangeRouter;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, info, warn};

use crate::decoder::decode_frame;
use crate::error::TransportError;
use crate::socket::{FeedConfig, FeedTransport};

/// Liveness of the feed connection as observed by the rest of the app.
///
/// Retry scheduling stays internal; between failed attempts the state
/// reads `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

enum FeedCommand {
    Connect(FeedConfig),
    Disconnect,
    Send(String),
}

/// Owns the one live feed connection, its receive loop, and its retry
/// schedule.
///
/// All socket activity happens inside [`EventFeed::run`]; the public
/// methods only enqueue commands, so callers never block on the network.
/// Each failed connect attempt schedules the next one a fixed delay
/// after the failure, up to a maximum streak of consecutive failures;
/// past that the feed stays down until the next explicit
/// [`EventFeed::connect`]. A successful handshake resets the streak.
pub struct EventFeed<T: FeedTransport> {
    router: Arc<dyn ChangeRouter>,
    commands: mpsc::UnboundedSender<FeedCommand>,
    command_source: Mutex<Option<mpsc::UnboundedReceiver<FeedCommand>>>,
    state: watch::Sender<ConnectionState>,
    _transport: PhantomData<fn() -> T>,
}

impl<T: FeedTransport> EventFeed<T> {
    pub fn new(router: Arc<dyn ChangeRouter>) -> Self {
        let (commands, command_source) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            router,
            commands,
            command_source: Mutex::new(Some(command_source)),
            state,
            _transport: PhantomData,
        }
    }

    /// Ask the run loop to open a session with these parameters.
    ///
    /// Ignored while a session is connecting or connected; during a
    /// retry wait it supersedes the pending attempt and starts a fresh
    /// failure streak.
    pub fn connect(&self, config: FeedConfig) {
        if self.commands.send(FeedCommand::Connect(config)).is_err() {
            warn!("event feed is not running; connect request dropped");
        }
    }

    /// End the current session, if any, and cancel any pending retry.
    ///
    /// Safe to call in any state, any number of times.
    pub fn disconnect(&self) {
        let _ = self.commands.send(FeedCommand::Disconnect);
    }

    /// Queue one text frame for the active connection.
    pub fn send(&self, frame: String) -> Result<(), TransportError> {
        if self.status() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }

        self.commands
            .send(FeedCommand::Send(frame))
            .map_err(|_| TransportError::NotConnected)
    }

    pub fn status(&self) -> ConnectionState {
        *self.state.subscribe().borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Drive the feed until every command handle is gone.
    pub async fn run(self: Arc<Self>) -> Result<(), TransportError> {
        let taken = self.command_source.lock().await.take();
        let Some(mut commands) = taken else {
            debug!("event feed run loop is already active");
            return Ok(());
        };

        loop {
            match commands.recv().await {
                Some(FeedCommand::Connect(config)) => {
                    self.run_session(config, &mut commands).await;
                }
                Some(FeedCommand::Disconnect) => {}
                Some(FeedCommand::Send(_)) => {
                    debug!("dropping outbound frame; feed is not connected");
                }
                None => {
                    debug!("event feed command channel closed");
                    return Ok(());
                }
            }
        }
    }

    /// One session: connect, drive, and retry until told to stop or the
    /// failure streak runs out.
    async fn run_session(
        &self,
        mut config: FeedConfig,
        commands: &mut mpsc::UnboundedReceiver<FeedCommand>,
    ) {
        let mut failed_attempts: u32 = 0;

        loop {
            self.state.send_replace(ConnectionState::Connecting);
            debug!(endpoint = %config.endpoint, "connecting to event feed");

            let outcome = {
                let connect = T::connect(&config);
                tokio::pin!(connect);

                loop {
                    tokio::select! {
                        result = &mut connect => break Some(result),
                        command = commands.recv() => {
                            if !absorb_while_busy(command) {
                                break None;
                            }
                        }
                    }
                }
            };

            let Some(outcome) = outcome else {
                self.state.send_replace(ConnectionState::Disconnected);
                return;
            };

            match outcome {
                Ok(mut socket) => {
                    failed_attempts = 0;
                    self.state.send_replace(ConnectionState::Connected);
                    info!("event feed connected");

                    let failure = self.drive_socket(&mut socket, commands).await;
                    self.state.send_replace(ConnectionState::Disconnected);

                    match failure {
                        Some(error) => warn!(%error, "event feed connection lost"),
                        None => {
                            let _ = socket.close().await;
                            return;
                        }
                    }
                }
                Err(error) => {
                    self.state.send_replace(ConnectionState::Disconnected);
                    failed_attempts += 1;
                    warn!(%error, attempt = failed_attempts, "event feed connect attempt failed");

                    if failed_attempts >= config.max_connect_attempts {
                        warn!(
                            attempts = failed_attempts,
                            "event feed retries exhausted; waiting for an explicit connect"
                        );
                        return;
                    }
                }
            }

            // Next attempt is due a fixed delay after the failure.
            let retry = tokio::time::sleep(config.retry_delay());
            tokio::pin!(retry);

            loop {
                tokio::select! {
                    _ = &mut retry => break,
                    command = commands.recv() => match command {
                        Some(FeedCommand::Connect(fresh)) => {
                            debug!("connect request supersedes pending retry");
                            config = fresh;
                            failed_attempts = 0;
                            break;
                        }
                        Some(FeedCommand::Send(_)) => {
                            debug!("dropping outbound frame; feed is not connected");
                        }
                        Some(FeedCommand::Disconnect) | None => return,
                    },
                }
            }
        }
    }

    /// Pump the connected socket until it fails or a stop is requested.
    ///
    /// Returns the transport failure, or `None` when the session was
    /// ended on purpose. Frames are handled one at a time, so events
    /// reach the router in arrival order.
    async fn drive_socket(
        &self,
        socket: &mut T,
        commands: &mut mpsc::UnboundedReceiver<FeedCommand>,
    ) -> Option<TransportError> {
        loop {
            tokio::select! {
                frame = socket.recv() => match frame {
                    Ok(payload) => match decode_frame(&payload) {
                        Ok(event) => self.router.publish(event),
                        Err(error) => warn!(%error, "dropping undecodable feed frame"),
                    },
                    Err(error) => return Some(error),
                },
                command = commands.recv() => match command {
                    Some(FeedCommand::Send(frame)) => {
                        if let Err(error) = socket.send(frame.as_bytes()).await {
                            return Some(error);
                        }
                    }
                    Some(FeedCommand::Connect(_)) => {
                        debug!("ignoring connect request; event feed is already connected");
                    }
                    Some(FeedCommand::Disconnect) | None => return None,
                },
            }
        }
    }
}

/// Commands that arrive while connecting are absorbed in place; only a
/// stop request interrupts the attempt.
fn absorb_while_busy(command: Option<FeedCommand>) -> bool {
    match command {
        Some(FeedCommand::Connect(_)) => {
            debug!("ignoring connect request; event feed is already connecting");
            true
        }
        Some(FeedCommand::Send(_)) => {
            debug!("dropping outbound frame; feed is not connected");
            true
        }
        Some(FeedCommand::Disconnect) | None => false,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Mutex as StdMutex, OnceLock};
    use std::time::Duration;

    use rookery_core::{BroadcastRouter, ChannelFilter, SyncChannel};
    use tokio::sync::Mutex as AsyncMutex;
    use tokio::time::{Instant, timeout};

    use super::*;

    #[derive(Default)]
    struct TestTransportState {
        connect_outcomes: VecDeque<Result<(), TransportError>>,
        connect_instants: Vec<Instant>,
        recv_script: VecDeque<Result<Vec<u8>, TransportError>>,
        sent_payloads: Vec<String>,
        close_calls: u32,
    }

    fn transport_state() -> &'static StdMutex<TestTransportState> {
        static STATE: OnceLock<StdMutex<TestTransportState>> = OnceLock::new();
        STATE.get_or_init(|| StdMutex::new(TestTransportState::default()))
    }

    fn test_lock() -> &'static AsyncMutex<()> {
        static LOCK: OnceLock<AsyncMutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| AsyncMutex::new(()))
    }

    fn configure_transport(
        connect_outcomes: Vec<Result<(), TransportError>>,
        recv_script: Vec<Result<Vec<u8>, TransportError>>,
    ) {
        let mut state = transport_state()
            .lock()
            .expect("failed to lock transport state");
        *state = TestTransportState::default();
        state.connect_outcomes = connect_outcomes.into_iter().collect();
        state.recv_script = recv_script.into_iter().collect();
    }

    fn connect_instants() -> Vec<Instant> {
        transport_state()
            .lock()
            .expect("failed to lock transport state")
            .connect_instants
            .clone()
    }

    fn connect_calls() -> usize {
        connect_instants().len()
    }

    fn sent_payloads() -> Vec<String> {
        transport_state()
            .lock()
            .expect("failed to lock transport state")
            .sent_payloads
            .clone()
    }

    fn close_calls() -> u32 {
        transport_state()
            .lock()
            .expect("failed to lock transport state")
            .close_calls
    }

    struct TestTransport;

    impl FeedTransport for TestTransport {
        async fn connect(_config: &FeedConfig) -> Result<Self, TransportError> {
            let mut state = transport_state()
                .lock()
                .expect("failed to lock transport state");
            state.connect_instants.push(Instant::now());
            match state.connect_outcomes.pop_front().unwrap_or(Ok(())) {
                Ok(()) => Ok(Self),
                Err(error) => Err(error),
            }
        }

        async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
            let mut state = transport_state()
                .lock()
                .expect("failed to lock transport state");
            state
                .sent_payloads
                .push(String::from_utf8_lossy(data).into_owned());
            Ok(())
        }

        async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
            let next = {
                let mut state = transport_state()
                    .lock()
                    .expect("failed to lock transport state");
                state.recv_script.pop_front()
            };

            match next {
                Some(step) => step,
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            let mut state = transport_state()
                .lock()
                .expect("failed to lock transport state");
            state.close_calls += 1;
            Ok(())
        }
    }

    fn refused() -> Result<(), TransportError> {
        Err(TransportError::WebSocket("connection refused".to_string()))
    }

    fn test_config() -> FeedConfig {
        FeedConfig {
            endpoint: "wss://feed.rookery.test/socket".to_string(),
            session_token: "token-abc".to_string(),
            api_key: "key-123".to_string(),
            max_connect_attempts: 5,
            retry_delay_seconds: 5,
            connect_timeout_seconds: 30,
        }
    }

    fn start_feed() -> (Arc<EventFeed<TestTransport>>, Arc<BroadcastRouter>) {
        let router = Arc::new(BroadcastRouter::default());
        let feed = Arc::new(EventFeed::<TestTransport>::new(router.clone()));
        tokio::spawn(Arc::clone(&feed).run());
        (feed, router)
    }

    async fn wait_for_state(
        status: &mut watch::Receiver<ConnectionState>,
        wanted: ConnectionState,
    ) {
        timeout(
            Duration::from_secs(60),
            status.wait_for(|state| *state == wanted),
        )
        .await
        .expect("timed out waiting for connection state")
        .expect("status channel should stay open");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn delivers_decoded_frames_to_the_router() {
        let _guard = test_lock().lock().await;
        configure_transport(
            vec![Ok(())],
            vec![
                Ok(br#"{"channel": "messages", "status": "create", "conversation_id": 4, "message_id": 9}"#.to_vec()),
                Ok(b"not a change event".to_vec()),
                Ok(br#"{"channel": "news", "status": "create", "entity_id": 3}"#.to_vec()),
            ],
        );

        let (feed, router) = start_feed();
        let mut subscription = router.subscribe(ChannelFilter::All);
        feed.connect(test_config());

        let first = timeout(Duration::from_secs(1), subscription.recv())
            .await
            .expect("timed out waiting for first event")
            .expect("first event should arrive");
        assert_eq!(first.channel, SyncChannel::Messages);
        assert_eq!(first.message_id, Some(9));

        // The garbage frame in between is dropped without ending the session.
        let second = timeout(Duration::from_secs(1), subscription.recv())
            .await
            .expect("timed out waiting for second event")
            .expect("second event should arrive");
        assert_eq!(second.channel, SyncChannel::News);
        assert_eq!(second.entity_id, Some(3));

        assert_eq!(feed.status(), ConnectionState::Connected);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn connect_is_a_noop_while_a_session_is_active() {
        let _guard = test_lock().lock().await;
        configure_transport(vec![Ok(())], Vec::new());

        let (feed, _router) = start_feed();
        let mut status = feed.watch_status();

        feed.connect(test_config());
        wait_for_state(&mut status, ConnectionState::Connected).await;

        feed.connect(test_config());
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(connect_calls(), 1);
        assert_eq!(feed.status(), ConnectionState::Connected);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn send_requires_a_connected_session() {
        let _guard = test_lock().lock().await;
        configure_transport(vec![Ok(())], Vec::new());

        let (feed, _router) = start_feed();
        assert_eq!(
            feed.send("early".to_string()),
            Err(TransportError::NotConnected)
        );

        let mut status = feed.watch_status();
        feed.connect(test_config());
        wait_for_state(&mut status, ConnectionState::Connected).await;

        feed.send("ping".to_string())
            .expect("send should be accepted while connected");

        for _ in 0..50 {
            if !sent_payloads().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(sent_payloads(), vec!["ping".to_string()]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn disconnect_closes_an_active_session() {
        let _guard = test_lock().lock().await;
        configure_transport(vec![Ok(())], Vec::new());

        let (feed, _router) = start_feed();
        let mut status = feed.watch_status();
        feed.connect(test_config());
        wait_for_state(&mut status, ConnectionState::Connected).await;

        feed.disconnect();
        wait_for_state(&mut status, ConnectionState::Disconnected).await;
        assert_eq!(close_calls(), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn gives_up_after_five_spaced_connect_failures() {
        let _guard = test_lock().lock().await;
        configure_transport(
            vec![refused(), refused(), refused(), refused(), refused()],
            Vec::new(),
        );

        let (feed, _router) = start_feed();
        let mut status = feed.watch_status();
        feed.connect(test_config());

        let connected = timeout(
            Duration::from_secs(60),
            status.wait_for(|state| *state == ConnectionState::Connected),
        )
        .await;
        assert!(connected.is_err(), "feed must never reach connected");
        drop(connected);

        let instants = connect_instants();
        assert_eq!(instants.len(), 5);
        for pair in instants.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_secs(5));
        }
        assert_eq!(feed.status(), ConnectionState::Disconnected);

        // Recovery takes an explicit connect request.
        configure_transport(vec![Ok(())], Vec::new());
        feed.connect(test_config());
        wait_for_state(&mut status, ConnectionState::Connected).await;
        assert_eq!(connect_calls(), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn attempt_counter_resets_after_a_successful_connect() {
        let _guard = test_lock().lock().await;
        // One failure, then a connection that drops on its first read,
        // then four more failures before the final success. Only a
        // counter reset on the first success leaves room for the last
        // attempt inside the five-failure budget.
        configure_transport(
            vec![
                refused(),
                Ok(()),
                refused(),
                refused(),
                refused(),
                refused(),
                Ok(()),
            ],
            vec![Err(TransportError::Closed { reason: None })],
        );

        let (feed, _router) = start_feed();
        let mut status = feed.watch_status();
        feed.connect(test_config());

        timeout(
            Duration::from_secs(120),
            status.wait_for(|state| *state == ConnectionState::Connected && connect_calls() == 7),
        )
        .await
        .expect("timed out waiting for the final reconnect")
        .expect("status channel should stay open");

        let instants = connect_instants();
        assert_eq!(instants.len(), 7);
        for pair in instants.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_secs(5));
        }
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn disconnect_cancels_a_pending_retry() {
        let _guard = test_lock().lock().await;
        configure_transport(vec![refused()], Vec::new());

        let (feed, _router) = start_feed();
        feed.connect(test_config());

        for _ in 0..50 {
            if connect_calls() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(connect_calls(), 1);

        feed.disconnect();
        feed.disconnect();

        let mut status = feed.watch_status();
        let connected = timeout(
            Duration::from_secs(60),
            status.wait_for(|state| *state == ConnectionState::Connected),
        )
        .await;
        assert!(connected.is_err(), "cancelled retry must not reconnect");
        assert_eq!(connect_calls(), 1);
        assert_eq!(feed.status(), ConnectionState::Disconnected);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn explicit_connect_supersedes_a_pending_retry() {
        let _guard = test_lock().lock().await;
        configure_transport(vec![refused(), Ok(())], Vec::new());

        let (feed, _router) = start_feed();
        let mut status = feed.watch_status();
        feed.connect(test_config());

        for _ in 0..50 {
            if connect_calls() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(connect_calls(), 1);

        feed.connect(test_config());
        wait_for_state(&mut status, ConnectionState::Connected).await;

        let instants = connect_instants();
        assert_eq!(instants.len(), 2);
        assert_eq!(instants[1] - instants[0], Duration::ZERO);
    }
}
