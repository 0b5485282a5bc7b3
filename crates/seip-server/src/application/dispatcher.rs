//! RequestDispatcher: sends one request to one client and waits for its reply.
//!
//! This is the correlation core of the server.  No request id travels on
//! the wire; a reply belongs to a request purely because it is the next
//! packet the client sends on that connection.  That only works if at most
//! one exchange uses a connection at a time, which is what a *turn* is.
//!
//! # Exchanges and turns
//!
//! An exchange is "send one request, then receive one response".  Before
//! sending, the exchange takes the connection's turn (a lock held until the
//! response has been read), so two callers that target the same client are
//! served one after the other in arrival order, while exchanges with
//! different clients run in parallel.
//!
//! # Two clocks
//!
//! The caller gives a logical budget `T`.  Each receive on the socket has its
//! own timeout, computed as `max(configured socket timeout, T + margin)`, so
//! the socket clock can never fire before the caller's clock.
//!
//! # Timeouts and orphans (for beginners)
//!
//! The exchange runs as its own Tokio task and the caller races that task
//! against a timer of exactly `T`:
//!
//! ```text
//! caller ──spawn──► exchange task: take turn → send → receive → parse
//!    │
//!    └── timeout(T, &mut task)
//!          ├─ task finished first → its result is the caller's result
//!          └─ timer fired first   → caller gets Timeout, task is *orphaned*
//! ```
//!
//! An orphaned task is not aborted.  Aborting it mid-receive could leave
//! half a packet in the stream, and the next exchange would read garbage.
//! Instead its `JoinHandle` goes on a pending list and the task is allowed
//! to finish.  Two things keep orphans cheap:
//!
//! - A cancel flag is raised on timeout.  An orphan that is still queued for
//!   the turn sees it and gives up *before sending*, so a request whose
//!   caller already left never reaches the client.
//! - The pending list is swept of finished tasks on every timeout, and if it
//!   still exceeds its bound the oldest orphans' connections are closed,
//!   which makes them finish promptly with a network error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use seip_core::{FrameError, ReceiveOutcome, RequestCode, RequestMessage, ResponsePacket};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::client_registry::{ClientHandle, ClientId};
use crate::application::errors::ServerError;

// ── Connection abstraction ────────────────────────────────────────────────────

/// A connection that can be borrowed for one request/response turn.
///
/// Implemented by the TCP connection in the infrastructure layer and by
/// scripted fakes in tests.
#[async_trait]
pub trait PacketChannel: Send + Sync + 'static {
    /// Waits for exclusive use of the connection.  Callers are served in
    /// the order they asked.
    async fn turn<'a>(&'a self) -> Box<dyn PacketTurn + Send + 'a>;

    /// Raises the close signal.  Any turn blocked in send or receive wakes
    /// up with an error, and every later send fails.
    fn close(&self);
}

/// Exclusive access to a connection for the duration of one exchange.
#[async_trait]
pub trait PacketTurn: Send {
    /// Sends one framed packet.
    async fn send_packet(&mut self, payload: &[u8]) -> Result<(), FrameError>;

    /// Receives one framed packet, waiting at most `wait` for it to start.
    async fn receive_packet(&mut self, wait: Duration) -> ReceiveOutcome;
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

/// Timing knobs of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Configured socket receive timeout.
    pub socket_timeout: Duration,
    /// Added to the caller budget when computing the exchange socket timeout.
    pub response_margin: Duration,
    /// Maximum number of orphaned exchanges kept on the pending list.
    pub max_pending: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            socket_timeout: Duration::from_millis(5000),
            response_margin: Duration::from_millis(1000),
            max_pending: 64,
        }
    }
}

type ExchangeResult = Result<ResponsePacket, ServerError>;

struct PendingExchange<C> {
    client_id: ClientId,
    handle: Arc<ClientHandle<C>>,
    task: JoinHandle<ExchangeResult>,
}

/// Runs exchanges and keeps track of the ones whose caller timed out.
pub struct RequestDispatcher<C> {
    settings: DispatchSettings,
    pending: Mutex<Vec<PendingExchange<C>>>,
}

impl<C: PacketChannel> RequestDispatcher<C> {
    pub fn new(settings: DispatchSettings) -> Self {
        Self {
            settings,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Socket timeout used for an exchange whose caller budget is `budget`.
    pub fn exchange_timeout(&self, budget: Duration) -> Duration {
        self.settings
            .socket_timeout
            .max(budget.saturating_add(self.settings.response_margin))
    }

    /// Sends `code` with `data` to the client behind `handle` and waits at
    /// most `budget` for its response.
    ///
    /// When `expect_response` is false the exchange still reads one packet,
    /// but a receive that times out is reported as a network error instead
    /// of being retried.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Timeout`] if `budget` elapsed first.
    /// - [`ServerError::Network`] on any send or receive failure.
    /// - [`ServerError::MalformedResponse`] if the reply is not a response packet.
    pub async fn dispatch(
        &self,
        handle: Arc<ClientHandle<C>>,
        code: RequestCode,
        expect_response: bool,
        budget: Duration,
        data: &str,
    ) -> ExchangeResult {
        let message = RequestMessage::new(code, data, duration_millis(budget));
        let payload = message
            .to_json()
            .map_err(|e| ServerError::Network(format!("Failed to encode request: {e}")))?;

        let socket_timeout = self.exchange_timeout(budget);
        if socket_timeout > self.settings.socket_timeout {
            debug!(
                "socket timeout adapted from {:?} to {socket_timeout:?} for client {}",
                self.settings.socket_timeout,
                handle.id()
            );
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let mut task = tokio::spawn(run_exchange(
            Arc::clone(&handle),
            payload,
            code,
            expect_response,
            socket_timeout,
            Arc::clone(&cancelled),
        ));

        match tokio::time::timeout(budget, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(ServerError::Network(format!(
                "Exchange task failed: {join_err}"
            ))),
            Err(_elapsed) => {
                cancelled.store(true, Ordering::Release);
                debug!(
                    "response from client {} to {code} not received within {budget:?}",
                    handle.id()
                );
                self.orphan(PendingExchange {
                    client_id: handle.id(),
                    handle,
                    task,
                })
                .await;
                Err(ServerError::Timeout(budget))
            }
        }
    }

    /// Drops every finished orphan and returns how many are still running.
    pub async fn sweep(&self) -> usize {
        let mut pending = self.pending.lock().await;
        pending.retain(|p| !p.task.is_finished());
        pending.len()
    }

    /// Number of orphans currently on the pending list, finished or not.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    async fn orphan(&self, exchange: PendingExchange<C>) {
        let mut pending = self.pending.lock().await;
        pending.push(exchange);
        pending.retain(|p| !p.task.is_finished());

        if pending.len() > self.settings.max_pending {
            let excess = pending.len() - self.settings.max_pending;
            for stale in pending.drain(..excess) {
                warn!(
                    "pending exchange limit reached; closing connection of client {}",
                    stale.client_id
                );
                stale.handle.connection().close();
            }
        }
        debug!("{} orphaned exchange(s) pending", pending.len());
    }
}

/// Body of one exchange task.
async fn run_exchange<C: PacketChannel>(
    handle: Arc<ClientHandle<C>>,
    payload: Vec<u8>,
    code: RequestCode,
    expect_response: bool,
    socket_timeout: Duration,
    cancelled: Arc<AtomicBool>,
) -> ExchangeResult {
    let mut turn = handle.connection().turn().await;

    if cancelled.load(Ordering::Acquire) {
        debug!("{code} to client {} dropped before sending", handle.id());
        return Err(ServerError::Network(
            "Request cancelled before sending".into(),
        ));
    }

    turn.send_packet(&payload)
        .await
        .map_err(|e| ServerError::Network(format!("Network error on send request: {e}")))?;
    debug!("{code} sent to client {}", handle.id());

    let reply = loop {
        match turn.receive_packet(socket_timeout).await {
            ReceiveOutcome::Packet(bytes) => break bytes,
            ReceiveOutcome::Warning if expect_response => {
                info!(
                    "no response from client {} yet, waiting again",
                    handle.id()
                );
            }
            ReceiveOutcome::Warning | ReceiveOutcome::Error => {
                return Err(ServerError::Network("Network error on receive".into()));
            }
        }
    };

    let response = ResponsePacket::from_json(&reply)
        .map_err(|e| ServerError::MalformedResponse(e.to_string()))?;
    debug!("response from client {}: {response}", handle.id());
    Ok(response)
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Instant;

    use seip_core::{codes, ErrorLayer};
    use tokio::sync::MutexGuard;
    use tokio_test::{assert_err, assert_ok};

    // ── Scripted fake connection ──────────────────────────────────────────────

    #[derive(Default)]
    struct Script {
        /// Replies handed out by successive receives, each after a delay.
        replies: VecDeque<(Duration, ReceiveOutcome)>,
        sent: Vec<Vec<u8>>,
        fail_send: bool,
        waits: Vec<Duration>,
    }

    #[derive(Default)]
    struct ScriptedChannel {
        script: Mutex<Script>,
        closed: AtomicBool,
    }

    impl ScriptedChannel {
        fn replying(replies: Vec<(u64, ReceiveOutcome)>) -> Self {
            let channel = Self::default();
            channel.script.try_lock().unwrap().replies = replies
                .into_iter()
                .map(|(ms, outcome)| (Duration::from_millis(ms), outcome))
                .collect();
            channel
        }
    }

    struct ScriptedTurn<'a> {
        script: MutexGuard<'a, Script>,
        closed: &'a AtomicBool,
    }

    #[async_trait]
    impl PacketChannel for ScriptedChannel {
        async fn turn<'a>(&'a self) -> Box<dyn PacketTurn + Send + 'a> {
            Box::new(ScriptedTurn {
                script: self.script.lock().await,
                closed: &self.closed,
            })
        }

        fn close(&self) {
            self.closed.store(true, Ordering::Release);
        }
    }

    #[async_trait]
    impl<'a> PacketTurn for ScriptedTurn<'a> {
        async fn send_packet(&mut self, payload: &[u8]) -> Result<(), FrameError> {
            if self.script.fail_send || self.closed.load(Ordering::Acquire) {
                return Err(FrameError::Closed);
            }
            self.script.sent.push(payload.to_vec());
            Ok(())
        }

        async fn receive_packet(&mut self, wait: Duration) -> ReceiveOutcome {
            self.script.waits.push(wait);
            match self.script.replies.pop_front() {
                Some((delay, outcome)) => {
                    tokio::time::sleep(delay).await;
                    if self.closed.load(Ordering::Acquire) {
                        ReceiveOutcome::Error
                    } else {
                        outcome
                    }
                }
                None => ReceiveOutcome::Error,
            }
        }
    }

    fn ok_packet() -> ReceiveOutcome {
        ReceiveOutcome::Packet(br#"{"response":"OK"}"#.to_vec())
    }

    fn handle(channel: ScriptedChannel) -> Arc<ClientHandle<ScriptedChannel>> {
        Arc::new(ClientHandle::new(1, "cardA", channel))
    }

    fn dispatcher() -> RequestDispatcher<ScriptedChannel> {
        RequestDispatcher::new(DispatchSettings {
            socket_timeout: Duration::from_millis(500),
            response_margin: Duration::from_millis(1000),
            max_pending: 4,
        })
    }

    const BUDGET: Duration = Duration::from_millis(2000);

    // ── Timeout arithmetic ────────────────────────────────────────────────────

    #[test]
    fn test_exchange_timeout_never_below_budget_plus_margin() {
        let d = dispatcher();
        assert_eq!(d.exchange_timeout(Duration::from_millis(2000)), Duration::from_millis(3000));
    }

    #[test]
    fn test_exchange_timeout_keeps_larger_configured_value() {
        let d = RequestDispatcher::<ScriptedChannel>::new(DispatchSettings {
            socket_timeout: Duration::from_millis(10_000),
            ..DispatchSettings::default()
        });
        assert_eq!(d.exchange_timeout(Duration::from_millis(100)), Duration::from_millis(10_000));
    }

    #[test]
    fn test_exchange_timeout_saturates_for_unbounded_budget() {
        let d = dispatcher();
        assert_eq!(d.exchange_timeout(Duration::MAX), Duration::MAX);
    }

    // ── Exchanges ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_ok_reply_is_returned_and_request_is_well_formed() {
        // Arrange
        let h = handle(ScriptedChannel::replying(vec![(10, ok_packet())]));

        // Act
        let result = dispatcher()
            .dispatch(Arc::clone(&h), RequestCode::PollTypeB, true, BUDGET, "")
            .await;

        // Assert
        let packet = assert_ok!(result);
        assert!(packet.is_ok());
        let script = h.connection().script.lock().await;
        let sent: serde_json::Value = serde_json::from_slice(&script.sent[0]).unwrap();
        assert_eq!(sent["request"], 10);
        assert_eq!(sent["timeout"], 2000);
        assert_eq!(script.waits, vec![Duration::from_millis(3000)]);
    }

    #[tokio::test]
    async fn test_unbounded_budget_waits_for_the_reply() {
        // Arrange: Duration::MAX is how a caller asks to wait indefinitely
        let h = handle(ScriptedChannel::replying(vec![(10, ok_packet())]));

        // Act
        let result = dispatcher()
            .dispatch(Arc::clone(&h), RequestCode::Diag, true, Duration::MAX, "")
            .await;

        // Assert
        let packet = assert_ok!(result);
        assert!(packet.is_ok());
        let script = h.connection().script.lock().await;
        let sent: serde_json::Value = serde_json::from_slice(&script.sent[0]).unwrap();
        assert_eq!(sent["timeout"], u64::MAX);
        assert_eq!(script.waits, vec![Duration::MAX]);
    }

    #[tokio::test]
    async fn test_warning_is_retried_when_response_expected() {
        let h = handle(ScriptedChannel::replying(vec![
            (0, ReceiveOutcome::Warning),
            (0, ReceiveOutcome::Warning),
            (0, ok_packet()),
        ]));

        let result = dispatcher()
            .dispatch(Arc::clone(&h), RequestCode::Diag, true, BUDGET, "")
            .await;

        assert_ok!(result);
        assert_eq!(h.connection().script.lock().await.waits.len(), 3);
    }

    #[tokio::test]
    async fn test_warning_is_a_network_error_when_no_response_expected() {
        let h = handle(ScriptedChannel::replying(vec![
            (0, ReceiveOutcome::Warning),
            (0, ok_packet()),
        ]));

        let result = dispatcher()
            .dispatch(h, RequestCode::Disconnect, false, BUDGET, "")
            .await;

        assert_eq!(result, Err(ServerError::Network("Network error on receive".into())));
    }

    #[tokio::test]
    async fn test_receive_error_is_network_error_not_timeout() {
        let h = handle(ScriptedChannel::replying(vec![(0, ReceiveOutcome::Error)]));

        let err = assert_err!(
            dispatcher()
                .dispatch(h, RequestCode::PollTypeB, true, BUDGET, "")
                .await
        );

        assert_eq!(ResponsePacket::from(err).error_code(ErrorLayer::Server), Some(codes::ERR_NETWORK));
    }

    #[tokio::test]
    async fn test_send_failure_is_network_error() {
        let channel = ScriptedChannel::default();
        channel.script.lock().await.fail_send = true;

        let result = dispatcher()
            .dispatch(handle(channel), RequestCode::Echo, true, BUDGET, "")
            .await;

        assert!(matches!(result, Err(ServerError::Network(_))));
    }

    #[tokio::test]
    async fn test_unparsable_reply_is_malformed_and_not_retried() {
        let h = handle(ScriptedChannel::replying(vec![
            (0, ReceiveOutcome::Packet(b"{not json".to_vec())),
            (0, ok_packet()),
        ]));

        let result = dispatcher()
            .dispatch(Arc::clone(&h), RequestCode::Command, true, BUDGET, "00A40400")
            .await;

        assert!(matches!(result, Err(ServerError::MalformedResponse(_))));
        assert_eq!(h.connection().script.lock().await.replies.len(), 1);
    }

    // ── Timeouts and orphans ──────────────────────────────────────────────────

    #[tokio::test]
    async fn test_slow_client_times_out_no_earlier_than_budget() {
        // Arrange
        let d = dispatcher();
        let h = handle(ScriptedChannel::replying(vec![(400, ok_packet())]));
        let budget = Duration::from_millis(100);

        // Act
        let started = Instant::now();
        let result = d.dispatch(Arc::clone(&h), RequestCode::PollTypeA, true, budget, "").await;
        let elapsed = started.elapsed();

        // Assert
        assert_eq!(result, Err(ServerError::Timeout(budget)));
        assert!(elapsed >= budget, "returned after {elapsed:?}");
        assert!(elapsed < Duration::from_millis(350), "returned after {elapsed:?}");
        assert_eq!(d.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_orphan_completes_and_is_swept() {
        // Arrange
        let d = dispatcher();
        let h = handle(ScriptedChannel::replying(vec![(150, ok_packet()), (0, ok_packet())]));
        let _ = d
            .dispatch(Arc::clone(&h), RequestCode::PollTypeA, true, Duration::from_millis(20), "")
            .await;

        // Act: the orphan consumes its own late reply, then the next call
        // gets a fresh turn
        tokio::time::sleep(Duration::from_millis(250)).await;
        let remaining = d.sweep().await;
        let next = d.dispatch(Arc::clone(&h), RequestCode::Diag, true, BUDGET, "").await;

        // Assert
        assert_eq!(remaining, 0);
        assert_ok!(next);
        assert_eq!(h.connection().script.lock().await.sent.len(), 2);
    }

    #[tokio::test]
    async fn test_request_queued_behind_busy_turn_is_not_sent_after_timeout() {
        // Arrange: the first exchange occupies the turn for 300 ms
        let d = Arc::new(dispatcher());
        let h = handle(ScriptedChannel::replying(vec![(300, ok_packet())]));
        let first = {
            let d = Arc::clone(&d);
            let h = Arc::clone(&h);
            tokio::spawn(async move { d.dispatch(h, RequestCode::Diag, true, BUDGET, "").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Act: the second caller gives up while still queued
        let second = d
            .dispatch(Arc::clone(&h), RequestCode::Echo, true, Duration::from_millis(50), "")
            .await;
        let first = first.await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Assert
        assert!(matches!(second, Err(ServerError::Timeout(_))));
        assert_ok!(first);
        assert_eq!(h.connection().script.lock().await.sent.len(), 1);
        assert_eq!(d.sweep().await, 0);
    }

    #[tokio::test]
    async fn test_pending_limit_closes_oldest_orphan_connections() {
        // Arrange: every client stalls far longer than the caller waits
        let d = dispatcher();
        let handles: Vec<_> = (0..6)
            .map(|_| handle(ScriptedChannel::replying(vec![(5_000, ok_packet())])))
            .collect();

        // Act
        for h in &handles {
            let _ = d
                .dispatch(Arc::clone(h), RequestCode::PollTypeB, true, Duration::from_millis(10), "")
                .await;
        }

        // Assert
        assert_eq!(d.pending_count().await, 4);
        assert!(handles[0].connection().closed.load(Ordering::Acquire));
        assert!(handles[1].connection().closed.load(Ordering::Acquire));
        assert!(!handles[5].connection().closed.load(Ordering::Acquire));
    }
}
