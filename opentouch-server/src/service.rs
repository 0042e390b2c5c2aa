//! WebSocket transport in front of the [`SessionHub`].
//!
//! Requests that are not WebSocket upgrades are answered by
//! [`crate::http`] on the same port.
//!
//! One task per connection reads client messages; a writer task owns the
//! socket's send half and drains both the frame channel fed by the
//! broadcaster and a control channel (probes, latency replies); a probe
//! task emits `ping` messages on a fixed interval.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};
use tracing::{debug, info, warn};

use opentouch_core::{
    ClientMessage, ConnectedInfo, ServerMessage, SessionHub, SessionId, StreamError,
};

use crate::http::{self, Route};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;
type BoxError = Box<dyn std::error::Error + Send + Sync>;

// ── WsServer ─────────────────────────────────────────────────────

/// Accepts WebSocket clients and maps their traffic onto a [`SessionHub`].
pub struct WsServer {
    hub: Arc<SessionHub>,
    probe_interval: Duration,
    running: Arc<AtomicBool>,
}

impl WsServer {
    pub fn new(hub: Arc<SessionHub>, probe_interval: Duration) -> Self {
        Self {
            hub,
            probe_interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Obtain a handle that can be used to stop the server from
    /// another task.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Accept clients on `listener` until stopped.
    pub async fn run(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error>> {
        self.running.store(true, Ordering::SeqCst);
        info!("listening on {}", listener.local_addr()?);

        while self.running.load(Ordering::SeqCst) {
            let accept = tokio::select! {
                result = listener.accept() => result,
                _ = Self::wait_for_stop(&self.running) => break,
            };

            let (stream, peer) = match accept {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept error: {e}");
                    continue;
                }
            };

            let _ = stream.set_nodelay(true);
            let hub = Arc::clone(&self.hub);
            let probe_interval = self.probe_interval;
            tokio::spawn(handle_connection(stream, peer, hub, probe_interval));
        }

        self.running.store(false, Ordering::SeqCst);
        info!("server stopped");
        Ok(())
    }

    /// Signal the server to stop accepting.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Async helper: resolves when `running` becomes false.
    async fn wait_for_stop(running: &Arc<AtomicBool>) {
        loop {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

// ── Per-connection ───────────────────────────────────────────────

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Arc<SessionHub>,
    probe_interval: Duration,
) {
    let head = match http::peek_head(&stream).await {
        Ok(Some(head)) => head,
        Ok(None) => {
            debug!(%peer, "connection closed before a request");
            return;
        }
        Err(e) => {
            debug!(%peer, "reading request failed: {e}");
            return;
        }
    };

    let route = Route::of(&head);
    if route != Route::WebSocket {
        debug!(%peer, method = %head.method, path = %head.path, ?route, "http request");
        if let Err(e) = http::respond(stream, &head, route, hub.session_count()).await {
            debug!(%peer, "http response failed: {e}");
        }
        return;
    }

    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(%peer, "WebSocket handshake failed: {e}");
            return;
        }
    };
    let (mut ws_tx, ws_rx) = ws.split();

    let id = hub.next_session_id();
    let (frame_tx, frame_rx) = mpsc::channel(1);
    let connected = blocking(&hub, move |hub| hub.connect(id, frame_tx)).await;
    let info = match connected.and_then(|r| r) {
        Ok(info) => info,
        Err(e) => {
            warn!(%peer, "rejecting client: {e}");
            let _ = ws_tx.send(Message::Close(None)).await;
            return;
        }
    };

    info!(%peer, session = id, "session started");
    if let Err(e) = serve(&hub, id, info, ws_tx, ws_rx, frame_rx, probe_interval).await {
        debug!(session = id, "session ended with error: {e}");
    }

    if let Err(e) = blocking(&hub, move |hub| hub.disconnect(id)).await {
        warn!(session = id, "disconnect failed: {e}");
    }
    info!(%peer, session = id, "session ended");
}

async fn serve(
    hub: &Arc<SessionHub>,
    id: SessionId,
    info: ConnectedInfo,
    mut ws_tx: WsSink,
    mut ws_rx: WsSource,
    frames: mpsc::Receiver<Bytes>,
    probe_interval: Duration,
) -> Result<(), BoxError> {
    ws_tx
        .send(Message::Text(info.to_message().to_json()?))
        .await?;

    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(ws_tx, frames, control_rx));
    let prober = tokio::spawn(probe_loop(
        Arc::clone(hub),
        id,
        probe_interval,
        control_tx.clone(),
    ));

    let result = async {
        while let Some(msg) = ws_rx.next().await {
            match msg? {
                Message::Text(text) => {
                    handle_client_message(hub, id, &text, &control_tx).await?;
                }
                Message::Close(_) => break,
                Message::Binary(data) => {
                    debug!(session = id, bytes = data.len(), "unexpected binary message");
                }
                // Protocol pings are answered by tungstenite.
                _ => {}
            }
            if writer.is_finished() {
                break;
            }
        }
        Ok::<(), BoxError>(())
    }
    .await;

    prober.abort();
    writer.abort();
    result
}

async fn handle_client_message(
    hub: &Arc<SessionHub>,
    id: SessionId,
    text: &str,
    control: &mpsc::UnboundedSender<ServerMessage>,
) -> Result<(), StreamError> {
    let msg = match ClientMessage::from_json(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(session = id, "ignoring malformed message: {e}");
            return Ok(());
        }
    };

    match msg {
        ClientMessage::Viewport(viewport) => hub.set_viewport(id, viewport)?,
        ClientMessage::Input(event) => {
            blocking(hub, move |hub| hub.input(id, &event)).await??;
        }
        ClientMessage::Pong { ts } => {
            if let Some(report) = hub.pong(id, ts) {
                control
                    .send(report.to_message())
                    .map_err(|_| StreamError::ChannelClosed)?;
            }
        }
    }
    Ok(())
}

async fn write_loop(
    mut ws_tx: WsSink,
    mut frames: mpsc::Receiver<Bytes>,
    mut control: mpsc::UnboundedReceiver<ServerMessage>,
) {
    loop {
        let msg = tokio::select! {
            biased;
            Some(ctl) = control.recv() => match ctl.to_json() {
                Ok(text) => Message::Text(text),
                Err(e) => {
                    warn!("failed to encode control message: {e}");
                    continue;
                }
            },
            Some(frame) = frames.recv() => Message::Binary(frame.to_vec()),
            else => break,
        };

        if let Err(e) = ws_tx.send(msg).await {
            debug!("write failed: {e}");
            break;
        }
    }
}

async fn probe_loop(
    hub: Arc<SessionHub>,
    id: SessionId,
    interval: Duration,
    control: mpsc::UnboundedSender<ServerMessage>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(ts) = hub.begin_probe(id) else {
            break;
        };
        if control.send(ServerMessage::Ping { ts }).is_err() {
            break;
        }
    }
}

/// Run a potentially blocking hub operation off the async workers.
async fn blocking<T, F>(hub: &Arc<SessionHub>, f: F) -> Result<T, StreamError>
where
    T: Send + 'static,
    F: FnOnce(&SessionHub) -> T + Send + 'static,
{
    let hub = Arc::clone(hub);
    tokio::task::spawn_blocking(move || f(&hub))
        .await
        .map_err(|e| StreamError::Other(format!("blocking task failed: {e}")))
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use opentouch_core::{HubConfig, InputInjector, JpegEncoder, SourceFactory};
    use tokio::runtime::Handle;

    use super::*;

    fn idle_hub() -> Arc<SessionHub> {
        let factory: SourceFactory =
            Arc::new(|| Err(StreamError::CaptureInit("no display in tests".into())));
        SessionHub::new(
            HubConfig::default(),
            factory,
            Arc::new(JpegEncoder::new()),
            Arc::new(InputInjector::new()),
            Handle::current(),
        )
    }

    #[tokio::test]
    async fn server_creates_stopped() {
        let server = WsServer::new(idle_hub(), Duration::from_secs(1));
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn stop_handle_ends_run() {
        let server = Arc::new(WsServer::new(idle_hub(), Duration::from_secs(1)));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let runner = Arc::clone(&server);
        let task = tokio::spawn(async move { runner.run(listener).await.is_ok() });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(server.is_running());
        server.stop_handle().store(false, Ordering::SeqCst);

        let ok = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(ok);
        assert!(!server.is_running());
    }
}
