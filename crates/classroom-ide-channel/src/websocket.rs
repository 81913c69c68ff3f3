//! Reconnecting WebSocket transport.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle, time::Instant};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message,
};

use crate::{
    ChannelOptions, ReconnectPolicy, TransportError,
    transport::{Connector, EventReceiver, Transport, TransportEvent},
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Control {
    Reconnect,
    Close,
}

/// How a connected session ended.
enum Ended {
    /// Peer closed or the socket failed.
    Dropped,
    /// Reconnect requested locally.
    Reconnect,
    /// Closed for good.
    Closed,
}

/// Opens [`WsTransport`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, url: &str, options: &ChannelOptions) -> (Arc<dyn Transport>, EventReceiver) {
        let policy = options.reconnect.clone();
        let max_jitter = u64::try_from(policy.max_jitter().as_millis()).unwrap_or(u64::MAX);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter));

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(run(
            url.to_string(),
            policy,
            jitter,
            Arc::clone(&open),
            outbound_rx,
            control_rx,
            event_tx,
        ));

        let transport = WsTransport {
            outbound_tx,
            control_tx,
            open,
            task,
        };
        (Arc::new(transport), event_rx)
    }
}

/// Handle to a connection task.
///
/// Frames queued while the socket is down are rejected; frames queued just
/// before a disconnect are discarded rather than replayed.
pub struct WsTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    control_tx: mpsc::UnboundedSender<Control>,
    open: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Transport for WsTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send_text(&self, text: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        self.outbound_tx
            .send(text)
            .map_err(|_| TransportError::Stopped)
    }

    fn reconnect(&self) {
        let _ = self.control_tx.send(Control::Reconnect);
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.control_tx.send(Control::Close);
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    url: String,
    policy: ReconnectPolicy,
    jitter: Duration,
    open: Arc<AtomicBool>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let mut retries: u32 = 0;

    loop {
        if retries > 0 {
            if !policy.allows_retry(retries) {
                tracing::warn!(%url, retries, "Giving up reconnecting");
                break;
            }
            let delay = policy.delay(retries, jitter);
            tracing::debug!(%url, retries, ?delay, "Reconnecting");
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                control = control_rx.recv() => match control {
                    Some(Control::Reconnect) => retries = 0,
                    Some(Control::Close) | None => break,
                },
            }
        }

        let attempt = tokio::select! {
            attempt = tokio::time::timeout(policy.connection_timeout(), connect_async(url.as_str())) => attempt,
            control = control_rx.recv() => match control {
                Some(Control::Reconnect) => {
                    retries = 0;
                    continue;
                }
                Some(Control::Close) | None => break,
            },
        };

        let socket = match attempt {
            Ok(Ok((socket, _))) => socket,
            Ok(Err(e)) => {
                if !emit(&events, TransportEvent::Error(e.to_string()))
                    || !emit(&events, TransportEvent::Close)
                {
                    break;
                }
                retries = retries.saturating_add(1);
                continue;
            }
            Err(_) => {
                tracing::debug!(%url, "Connection attempt timed out");
                if !emit(&events, TransportEvent::Error("timeout".to_string()))
                    || !emit(&events, TransportEvent::Close)
                {
                    break;
                }
                retries = retries.saturating_add(1);
                continue;
            }
        };

        open.store(true, Ordering::SeqCst);
        tracing::info!(%url, "WebSocket connected");
        if !emit(&events, TransportEvent::Open) {
            break;
        }
        let connected_at = Instant::now();

        let ended = pump(socket, &mut outbound_rx, &mut control_rx, &events).await;

        open.store(false, Ordering::SeqCst);
        while outbound_rx.try_recv().is_ok() {}
        tracing::info!(%url, "WebSocket disconnected");
        if !emit(&events, TransportEvent::Close) {
            break;
        }

        match ended {
            Ended::Closed => break,
            Ended::Reconnect => retries = 0,
            Ended::Dropped if connected_at.elapsed() >= policy.min_uptime() => retries = 1,
            Ended::Dropped => retries = retries.saturating_add(1),
        }
    }

    open.store(false, Ordering::SeqCst);
}

/// Returns false once the event receiver is gone.
fn emit(events: &mpsc::UnboundedSender<TransportEvent>, event: TransportEvent) -> bool {
    events.send(event).is_ok()
}

async fn pump(
    socket: Socket,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    control_rx: &mut mpsc::UnboundedReceiver<Control>,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> Ended {
    let (mut sink, mut source) = socket.split();

    loop {
        tokio::select! {
            frame = outbound_rx.recv() => {
                let Some(text) = frame else {
                    let _ = sink.close().await;
                    return Ended::Closed;
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                    return Ended::Dropped;
                }
            }
            control = control_rx.recv() => {
                let _ = sink.close().await;
                return match control {
                    Some(Control::Reconnect) => Ended::Reconnect,
                    Some(Control::Close) | None => Ended::Closed,
                };
            }
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if !emit(events, TransportEvent::Message(text)) {
                        return Ended::Closed;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        if !emit(events, TransportEvent::Message(text)) {
                            return Ended::Closed;
                        }
                    }
                    Err(e) => tracing::warn!("Dropping non UTF-8 binary frame: {e}"),
                },
                Some(Ok(Message::Close(_))) | None => return Ended::Dropped,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                    return Ended::Dropped;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    use super::*;

    /// Serves one connection per entry of `holds`, closing each after its
    /// hold time. Reports when each connection was accepted and closed.
    async fn serve(holds: Vec<Duration>) -> (String, mpsc::UnboundedReceiver<(Instant, Instant)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            for hold in holds {
                let (stream, _) = listener.accept().await.unwrap();
                let mut ws = accept_async(stream).await.unwrap();
                let accepted = Instant::now();
                tokio::time::sleep(hold).await;
                let closing = Instant::now();
                let _ = ws.close(None).await;
                let _ = tx.send((accepted, closing));
            }
        });
        (url, rx)
    }

    fn backoff_options(min_uptime_ms: u64) -> ChannelOptions {
        let mut options = ChannelOptions::default();
        options.reconnect.min_reconnection_delay_ms = 100;
        options.reconnect.reconnection_delay_grow_factor = 2.0;
        options.reconnect.reconnection_jitter_ms = 0;
        options.reconnect.max_reconnection_delay_ms = 10_000;
        options.reconnect.min_uptime_ms = min_uptime_ms;
        options
    }

    #[tokio::test]
    async fn backoff_grows_until_a_connection_outlives_min_uptime() {
        let brief = Duration::ZERO;
        let (url, mut sessions) =
            serve(vec![brief, brief, brief, Duration::from_millis(300), brief]).await;
        let (transport, mut events) = WsConnector.connect(&url, &backoff_options(200));

        let mut spans = Vec::new();
        for _ in 0..5 {
            spans.push(sessions.recv().await.unwrap());
        }
        // Time from the server closing connection `i` to accepting `i + 1`.
        let gap = |i: usize| spans[i + 1].0.duration_since(spans[i].1);

        assert!(gap(0) >= Duration::from_millis(100), "{:?}", gap(0));
        assert!(gap(1) >= Duration::from_millis(200), "{:?}", gap(1));
        assert!(gap(2) >= Duration::from_millis(400), "{:?}", gap(2));
        // Connection 3 stayed up past min_uptime, so the next delay is the
        // first one again instead of 800ms.
        assert!(gap(3) < Duration::from_millis(500), "{:?}", gap(3));

        assert_eq!(events.recv().await, Some(TransportEvent::Open));
        assert_eq!(events.recv().await, Some(TransportEvent::Close));
        drop(transport);
    }

    #[tokio::test]
    async fn open_socket_carries_frames_both_ways() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.send(Message::Text(r#"{"type":"auth_required"}"#.into()))
                .await
                .unwrap();
            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => return text,
                    Some(Ok(_)) => {}
                    other => panic!("unexpected {other:?}"),
                }
            }
        });

        let (transport, mut events) = WsConnector.connect(&url, &ChannelOptions::default());
        assert_eq!(events.recv().await, Some(TransportEvent::Open));
        assert!(transport.is_open());
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Message(r#"{"type":"auth_required"}"#.into()))
        );

        transport.send_text("hello".into()).unwrap();
        assert_eq!(server.await.unwrap(), "hello");

        transport.close();
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn unreachable_server_reports_error_then_close() {
        let mut options = ChannelOptions::default();
        options.reconnect.max_retries = Some(1);
        options.reconnect.connection_timeout_ms = 500;
        // Port 9 (discard) is closed on test hosts.
        let (transport, mut events) = WsConnector.connect("ws://127.0.0.1:9/ws", &options);

        assert!(!transport.is_open());
        assert!(matches!(
            transport.send_text("x".into()),
            Err(TransportError::NotOpen)
        ));
        assert!(matches!(events.recv().await, Some(TransportEvent::Error(_))));
        assert_eq!(events.recv().await, Some(TransportEvent::Close));
        // max_retries = 1 stops after the first failure.
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn close_stops_the_task() {
        let mut options = ChannelOptions::default();
        options.reconnect.min_reconnection_delay_ms = 60_000;
        let (transport, mut events) = WsConnector.connect("ws://127.0.0.1:9/ws", &options);
        assert!(matches!(events.recv().await, Some(TransportEvent::Error(_))));
        assert_eq!(events.recv().await, Some(TransportEvent::Close));
        transport.close();
        assert_eq!(events.recv().await, None);
    }
}
