//! WebSocket front end.
//!
//! One task per connection: wait for the `{"userId": ...}` handshake, ask the
//! orchestrator for a trial, then pump frames in both directions until either
//! side finishes. Whatever ends the pump, the session is stopped before the
//! transport is closed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use hippogym_core::HippoError;
use hippogym_core::message::{Handshake, classify};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

use crate::orchestrator::{HippoGym, SessionLink};

/// Default maximum number of concurrent WebSocket connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;

/// Interval of the "still waiting" log line while a client has not sent its
/// handshake yet.
pub const HANDSHAKE_HEARTBEAT: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<TcpStream>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

// ─── Origin validation ───────────────────────────────────────────

/// Check the browser `Origin` header against the allow-list.
///
/// An empty list, a `"*"` entry or an absent header (non-browser client)
/// allows the upgrade. Anything else must match an entry exactly.
fn validate_origin(
    allowed: &[String],
    req: &Request,
    resp: Response,
) -> Result<Response, ErrorResponse> {
    if allowed.is_empty() || allowed.iter().any(|o| o == "*") {
        return Ok(resp);
    }
    let Some(origin) = req.headers().get("origin") else {
        return Ok(resp);
    };
    let origin = origin.to_str().unwrap_or("");
    if allowed.iter().any(|o| o == origin) {
        return Ok(resp);
    }
    tracing::warn!(origin = %origin, "ws: rejected connection from disallowed origin");
    let mut err = ErrorResponse::new(Some("Origin not allowed".into()));
    *err.status_mut() = http::StatusCode::FORBIDDEN;
    Err(err)
}

// ─── Communicator ────────────────────────────────────────────────

pub struct Communicator {
    addr: SocketAddr,
    gym: Arc<HippoGym>,
    cancel: CancellationToken,
    max_connections: usize,
    allowed_origins: Arc<[String]>,
}

impl Communicator {
    pub fn new(addr: SocketAddr, gym: Arc<HippoGym>, cancel: CancellationToken) -> Self {
        Self {
            addr,
            gym,
            cancel,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            allowed_origins: Arc::from(Vec::new()),
        }
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = Arc::from(origins);
        self
    }

    /// Bind and serve until the cancellation token fires.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        tracing::info!(addr = %self.addr, max_connections = self.max_connections, "ws server listening");
        self.serve(listener).await
    }

    /// Bind to the configured address and return the actual local address.
    /// Binding to port 0 picks an ephemeral port.
    pub async fn bind(&self) -> std::io::Result<(TcpListener, SocketAddr)> {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, max_connections = self.max_connections, "ws server bound");
        Ok((listener, local_addr))
    }

    /// Run the accept loop on a pre-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.max_connections));

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::error!(error = %e, "ws: TCP accept failed");
                            continue;
                        }
                    };
                    let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                        tracing::warn!(peer = %peer, max = self.max_connections, "ws: connection limit reached, rejecting");
                        drop(stream);
                        continue;
                    };
                    tracing::debug!(peer = %peer, "ws: TCP connection accepted");
                    let gym = Arc::clone(&self.gym);
                    let cancel = self.cancel.clone();
                    let origins = Arc::clone(&self.allowed_origins);
                    tokio::spawn(async move {
                        let _permit = permit;
                        let check = move |req: &Request, resp: Response| validate_origin(&origins, req, resp);
                        match tokio_tungstenite::accept_hdr_async(stream, check).await {
                            Ok(ws_stream) => {
                                if let Err(e) = handle_client(ws_stream, gym, cancel, peer).await {
                                    tracing::debug!(peer = %peer, error = %e, "ws client handler finished with error");
                                }
                            }
                            Err(e) => {
                                tracing::debug!(peer = %peer, error = %e, "ws handshake failed");
                            }
                        }
                    });
                }
                _ = self.cancel.cancelled() => {
                    tracing::info!("ws server: cancellation requested, shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

// ─── Per-client handler ──────────────────────────────────────────

enum Greeting {
    User(String),
    Rejected,
    Gone,
}

/// Why a session's pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionExit {
    PeerClosed,
    TransportError,
    Done,
    WorkerGone,
    Cancelled,
}

impl SessionExit {
    fn as_str(self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::TransportError => "transport_error",
            Self::Done => "trial_done",
            Self::WorkerGone => "worker_gone",
            Self::Cancelled => "server_shutdown",
        }
    }

    fn transport_usable(self) -> bool {
        !matches!(self, Self::PeerClosed | Self::TransportError)
    }
}

async fn handle_client(
    ws_stream: WsStream,
    gym: Arc<HippoGym>,
    cancel: CancellationToken,
    peer: SocketAddr,
) -> Result<(), WsError> {
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    tracing::debug!(peer = %peer, "ws client connected");

    let user_id = match await_handshake(&mut ws_tx, &mut ws_rx, &cancel, peer).await? {
        Greeting::User(user_id) => user_id,
        Greeting::Rejected | Greeting::Gone => return Ok(()),
    };

    let mut link = match gym.start_trial(&user_id) {
        Ok(link) => link,
        Err(HippoError::DuplicateSession { user_id }) => {
            tracing::warn!(peer = %peer, user_id = %user_id, "rejecting duplicate session");
            close_with(&mut ws_tx, CloseCode::Policy, "session already active").await;
            return Ok(());
        }
        Err(e) => {
            tracing::error!(peer = %peer, user_id = %user_id, error = %e, "trial could not be started");
            close_with(&mut ws_tx, CloseCode::Error, "trial could not be started").await;
            return Ok(());
        }
    };

    let exit = pump(&mut ws_tx, &mut ws_rx, &mut link, &cancel).await;
    gym.stop_trial(&link.user_id);
    tracing::info!(
        peer = %peer,
        user_id = %link.user_id,
        trial_id = %link.trial_id,
        reason = exit.as_str(),
        "session closed"
    );

    if exit.transport_usable() {
        ws_tx.send(Message::Close(None)).await?;
    }
    Ok(())
}

/// Wait for the first text frame and extract the user id from it. No hard
/// timeout; a heartbeat line is logged while waiting.
async fn await_handshake(
    ws_tx: &mut WsSink,
    ws_rx: &mut WsSource,
    cancel: &CancellationToken,
    peer: SocketAddr,
) -> Result<Greeting, WsError> {
    let started = tokio::time::Instant::now();
    let mut heartbeat =
        tokio::time::interval_at(started + HANDSHAKE_HEARTBEAT, HANDSHAKE_HEARTBEAT);

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Ping(data))) => {
                        ws_tx.send(Message::Pong(data)).await?;
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(Greeting::Gone),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e),
                };
                return match Handshake::parse(&text) {
                    Ok((user_id, project_id)) => {
                        tracing::debug!(peer = %peer, user_id = %user_id, project_id = ?project_id, "handshake received");
                        Ok(Greeting::User(user_id))
                    }
                    Err(e) => {
                        tracing::warn!(peer = %peer, error = %e, "handshake rejected");
                        close_with(ws_tx, CloseCode::Policy, "missing userId").await;
                        Ok(Greeting::Rejected)
                    }
                };
            }
            _ = heartbeat.tick() => {
                tracing::debug!(peer = %peer, waited_secs = started.elapsed().as_secs(), "waiting for handshake");
            }
            _ = cancel.cancelled() => return Ok(Greeting::Gone),
        }
    }
}

/// Move frames until the peer leaves, the trial ends or the server stops.
async fn pump(
    ws_tx: &mut WsSink,
    ws_rx: &mut WsSource,
    link: &mut SessionLink,
    cancel: &CancellationToken,
) -> SessionExit {
    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let (kind, frame) = classify(&text);
                    if !link.inbound.send(kind, frame) {
                        tracing::debug!(user_id = %link.user_id, channel = %kind, "worker gone, inbound frame dropped");
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                        tracing::debug!(user_id = %link.user_id, error = %e, "ws write failed");
                        return SessionExit::TransportError;
                    }
                }
                Some(Ok(Message::Close(_))) | None => return SessionExit::PeerClosed,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(user_id = %link.user_id, error = %e, "ws read error, dropping client");
                    return SessionExit::TransportError;
                }
            },
            out = link.outbound.recv() => {
                let Some(out) = out else {
                    return SessionExit::WorkerGone;
                };
                let text = match out.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(user_id = %link.user_id, error = %e, "failed to encode outbound message");
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(Message::Text(text)).await {
                    tracing::debug!(user_id = %link.user_id, error = %e, "ws write failed");
                    return SessionExit::TransportError;
                }
                if out.is_done() {
                    return SessionExit::Done;
                }
            }
            _ = cancel.cancelled() => return SessionExit::Cancelled,
        }
    }
}

async fn close_with(ws_tx: &mut WsSink, code: CloseCode, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    if let Err(e) = ws_tx.send(Message::Close(Some(frame))).await {
        tracing::debug!(error = %e, "failed to send close frame");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hippogym_core::trial_config::TrialConfig;

    use crate::experiments::BuiltinExperiments;
    use crate::recorder::RecordingConfig;

    fn request(origin: Option<&str>) -> Request {
        let mut builder = http::Request::builder().uri("/");
        if let Some(origin) = origin {
            builder = builder.header("Origin", origin);
        }
        builder.body(()).unwrap()
    }

    fn allowed(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_allow_list_accepts_everything() {
        assert!(validate_origin(&[], &request(Some("https://evil.example")), Response::new(())).is_ok());
    }

    #[test]
    fn listed_origin_is_accepted() {
        let list = allowed(&["https://lab.example"]);
        assert!(validate_origin(&list, &request(Some("https://lab.example")), Response::new(())).is_ok());
    }

    #[test]
    fn unlisted_origin_is_forbidden() {
        let list = allowed(&["https://lab.example"]);
        let err = validate_origin(&list, &request(Some("https://evil.example")), Response::new(()))
            .unwrap_err();
        assert_eq!(err.status(), http::StatusCode::FORBIDDEN);
    }

    #[test]
    fn missing_origin_header_is_accepted() {
        let list = allowed(&["https://lab.example"]);
        assert!(validate_origin(&list, &request(None), Response::new(())).is_ok());
    }

    #[test]
    fn wildcard_accepts_everything() {
        let list = allowed(&["*"]);
        assert!(validate_origin(&list, &request(Some("http://x")), Response::new(())).is_ok());
    }

    #[test]
    fn only_clean_exits_send_a_close_frame() {
        assert!(SessionExit::Done.transport_usable());
        assert!(SessionExit::Cancelled.transport_usable());
        assert!(!SessionExit::PeerClosed.transport_usable());
        assert!(!SessionExit::TransportError.transport_usable());
    }

    #[tokio::test]
    async fn cancel_token_stops_server() {
        let gym = HippoGym::new(
            TrialConfig::from(crate::config::default_trial()),
            Arc::new(BuiltinExperiments),
            RecordingConfig::default(),
        )
        .unwrap();
        let cancel = CancellationToken::new();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = Communicator::new(addr, Arc::new(gym), cancel.clone());

        let handle = tokio::spawn(async move { server.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(result.is_ok(), "server should have stopped within timeout");
        assert!(result.unwrap().unwrap().is_ok());
    }
}
