//! Multiplexed request/response channel over one reconnecting connection.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use classroom_ide_core::{Identity, Role};
use serde_json::Value;
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    ChannelConfig, ChannelOptions, LocationOverride, SendError,
    protocol::{
        CommandMessage, CorrelationId, Handshake, InboundMessage, authenticate_frame,
        get_project_frame,
    },
    subscription::{ResponseCallback, Subscription},
    transport::{Connector, EventReceiver, Transport, TransportEvent},
};

/// Highest auto-assigned correlation id; the counter wraps back to 1 after it.
pub const MAX_CORRELATION_ID: u64 = 10_000;

/// Passive observer of every forwarded inbound message.
pub type MessageHandler = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

struct State {
    config: ChannelConfig,
    identity: Option<Identity>,
    transport: Option<Arc<dyn Transport>>,
    pump: Option<JoinHandle<()>>,
    /// Bumped whenever the event pump is detached.
    generation: u64,
    connected: bool,
    authenticated: bool,
    next_id: u64,
    pending: HashMap<CorrelationId, Subscription>,
    handlers: Vec<MessageHandler>,
}

/// One logical endpoint.
///
/// All state sits behind one mutex that is never held across an `.await`
/// or while user callbacks run, so each inbound message is processed as a
/// single atomic step and callbacks may call back into the channel.
pub struct Channel {
    key: String,
    connector: Arc<dyn Connector>,
    state: Mutex<State>,
    connected_tx: watch::Sender<bool>,
}

impl Channel {
    /// Create an unconnected channel.
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        config: ChannelConfig,
        connector: Arc<dyn Connector>,
        identity: Option<Identity>,
    ) -> Arc<Self> {
        let (connected_tx, _) = watch::channel(false);
        Arc::new(Self {
            key: key.into(),
            connector,
            state: Mutex::new(State {
                config,
                identity,
                transport: None,
                pump: None,
                generation: 0,
                connected: false,
                authenticated: false,
                next_id: 1,
                pending: HashMap::new(),
                handlers: Vec::new(),
            }),
            connected_tx,
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// (Re)establish the connection.
    ///
    /// Overrides are merged into the stored configuration. Any existing
    /// connection is closed first, which settles its pending subscriptions.
    /// Must be called from within a Tokio runtime.
    pub fn init(
        self: &Arc<Self>,
        location: Option<LocationOverride>,
        options: Option<ChannelOptions>,
    ) {
        if self.state().transport.is_some() {
            self.close();
        }

        let mut state = self.state();
        if let Some(location) = location {
            state.config.location.merge(location);
        }
        if let Some(options) = options {
            state.config.options = options;
        }
        let url = state.config.location.url();
        tracing::info!(channel = %self.key, %url, "Websocket init");

        let (transport, events) = self.connector.connect(&url, &state.config.options);
        state.transport = Some(transport);
        state.generation += 1;
        state.pump = Some(self.spawn_pump(events, state.generation));
    }

    fn spawn_pump(self: &Arc<Self>, mut events: EventReceiver, generation: u64) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(channel) = weak.upgrade() else { break };
                if channel.state().generation != generation {
                    break;
                }
                channel.handle_event(event);
            }
        })
    }

    /// Process one transport event.
    ///
    /// Called by the event pump; exposed so front ends with their own event
    /// loop (and tests) can feed events directly.
    pub fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Close => {
                {
                    let mut state = self.state();
                    state.connected = false;
                    state.authenticated = false;
                }
                self.connected_tx.send_replace(false);
                tracing::info!(channel = %self.key, "Websocket onclose event");
            }
            TransportEvent::Error(error) => {
                self.state().connected = false;
                self.connected_tx.send_replace(false);
                tracing::warn!(channel = %self.key, %error, "Websocket onerror event");
            }
            TransportEvent::Message(text) => {
                if self.state().config.options.debug {
                    tracing::debug!(channel = %self.key, frame = %text, "Websocket onmessage");
                }
                match InboundMessage::parse(&text) {
                    Ok(message) => self.handle_message(message),
                    Err(e) => tracing::warn!(channel = %self.key, "Dropping malformed frame: {e}"),
                }
            }
        }
    }

    fn on_open(&self) {
        {
            let mut state = self.state();
            state.connected = true;
            state.authenticated = false;

            let credential = state
                .identity
                .as_ref()
                .filter(|id| id.is_complete())
                .map(|id| id.session_id.clone());
            match (credential, state.transport.as_ref()) {
                (Some(session_id), Some(transport)) => {
                    let frame = authenticate_frame(&session_id).to_string();
                    if let Err(e) = transport.send_text(frame) {
                        tracing::error!(channel = %self.key, "Failed to send authentication: {e}");
                    } else {
                        tracing::info!(channel = %self.key, "Sent authentication");
                    }
                }
                _ => tracing::info!(
                    channel = %self.key,
                    "No session found, connected without authentication"
                ),
            }
        }
        self.connected_tx.send_replace(true);
    }

    /// Route one inbound message: handshake, correlated callback, handlers.
    pub fn handle_message(&self, message: InboundMessage) {
        let (callback, handlers) = {
            let mut state = self.state();

            match message.handshake() {
                Some(Handshake::AuthRequired) => {
                    tracing::info!(channel = %self.key, "Authentication required by server");
                    return;
                }
                Some(Handshake::NotAuthenticated) => {
                    state.authenticated = false;
                    tracing::warn!(channel = %self.key, "Not authenticated, waiting for authentication");
                    return;
                }
                Some(Handshake::AuthSuccess { username, role }) => {
                    state.authenticated = true;
                    let project = home_project(state.identity.as_ref(), username, role);
                    tracing::info!(channel = %self.key, %project, "Authentication successful");
                    if let Some(transport) = state.transport.as_ref() {
                        if let Err(e) = transport.send_text(get_project_frame(&project).to_string()) {
                            tracing::error!(channel = %self.key, "Failed to request project: {e}");
                        }
                    }
                }
                None => {}
            }

            let mut callback: Option<ResponseCallback> = None;
            if let Some(id) = message.id.as_ref() {
                if let Some(subscription) = state.pending.get_mut(id) {
                    let delivery = subscription.consume();
                    callback = delivery.callback;
                    if delivery.exhausted {
                        state.pending.remove(id);
                    }
                }
            }
            (callback, state.handlers.clone())
        };

        if let Some(callback) = callback {
            callback(&message);
        }
        for handler in &handlers {
            handler(&message);
        }
    }

    /// Send a command.
    ///
    /// Without `id` the channel counter supplies one. The counter advances
    /// only when the assigned id is the counter's current value and wraps to
    /// 1 after [`MAX_CORRELATION_ID`]. The subscription is registered before
    /// the frame leaves.
    ///
    /// # Errors
    /// Returns error if the channel is not initialized or not open.
    pub fn send_command(
        &self,
        id: Option<CorrelationId>,
        cmd: &str,
        data: Value,
        subscription: Option<Subscription>,
    ) -> Result<CorrelationId, SendError> {
        let mut state = self.state();
        let Some(transport) = state.transport.clone() else {
            tracing::error!(channel = %self.key, cmd, "Websocket is not init");
            return Err(SendError::NotInitialized);
        };
        if !transport.is_open() {
            tracing::error!(channel = %self.key, cmd, "Websocket readyState is not open");
            return Err(SendError::NotOpen);
        }

        let current = CorrelationId::Seq(state.next_id);
        let id = id.unwrap_or_else(|| current.clone());
        if id == current {
            state.next_id += 1;
            if state.next_id > MAX_CORRELATION_ID {
                state.next_id = 1;
            }
        }

        let frame = serde_json::to_string(&CommandMessage::new(id.clone(), cmd, data))?;
        if let Some(subscription) = subscription {
            state.pending.insert(id.clone(), subscription);
        }
        if state.config.options.debug {
            tracing::debug!(channel = %self.key, %frame, "Websocket send");
        }

        if let Err(e) = transport.send_text(frame) {
            state.pending.remove(&id);
            tracing::error!(channel = %self.key, cmd, "Websocket send failed: {e}");
            return Err(e.into());
        }
        Ok(id)
    }

    /// Register a passive handler. Registering the same handler twice is a no-op.
    ///
    /// Returns whether the handler was added.
    pub fn add_message_handler(&self, handler: MessageHandler) -> bool {
        let mut state = self.state();
        if state.handlers.iter().any(|h| same_handler(h, &handler)) {
            return false;
        }
        state.handlers.push(handler);
        true
    }

    /// Remove a previously registered handler.
    pub fn remove_message_handler(&self, handler: &MessageHandler) -> bool {
        let mut state = self.state();
        let before = state.handlers.len();
        state.handlers.retain(|h| !same_handler(h, handler));
        state.handlers.len() != before
    }

    /// Close the connection.
    ///
    /// The event pump is detached before the transport closes, then every
    /// subscription with invocations left is fired once with the
    /// channel-closed code and all subscriptions are dropped.
    pub fn close(&self) {
        let (transport, settled) = {
            let mut state = self.state();
            if let Some(pump) = state.pump.take() {
                pump.abort();
            }
            state.generation += 1;
            state.connected = false;
            state.authenticated = false;
            let settled: Vec<(CorrelationId, ResponseCallback)> = state
                .pending
                .drain()
                .filter_map(|(id, sub)| sub.close_callback().map(|cb| (id, cb)))
                .collect();
            (state.transport.take(), settled)
        };

        if let Some(transport) = transport {
            transport.close();
            tracing::info!(channel = %self.key, "Websocket closed");
        }
        self.connected_tx.send_replace(false);

        for (id, callback) in settled {
            callback(&InboundMessage::channel_closed(id));
        }
    }

    /// Ask the transport to reconnect. Returns false when not initialized.
    pub fn reconnect(&self) -> bool {
        let transport = self.state().transport.clone();
        transport.is_some_and(|t| {
            t.reconnect();
            true
        })
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state().authenticated
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state().transport.is_some()
    }

    /// Receiver tracking the `connected` flag.
    #[must_use]
    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.connected_tx.subscribe()
    }

    /// Number of subscriptions awaiting responses.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state().pending.len()
    }

    /// Id the counter will assign next.
    #[must_use]
    pub fn next_correlation_id(&self) -> u64 {
        self.state().next_id
    }

    #[must_use]
    pub fn config(&self) -> ChannelConfig {
        self.state().config.clone()
    }

    /// Replace the identity presented on the next connection.
    pub fn set_identity(&self, identity: Option<Identity>) {
        self.state().identity = identity;
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(pump) = state.pump.take() {
            pump.abort();
        }
        if let Some(transport) = state.transport.take() {
            transport.close();
        }
    }
}

fn same_handler(a: &MessageHandler, b: &MessageHandler) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

/// Project requested after authentication; frame values win over the
/// injected identity.
fn home_project(identity: Option<&Identity>, username: Option<String>, role: Option<String>) -> String {
    let mut merged = identity
        .cloned()
        .unwrap_or_else(|| Identity::new("", "", Role::Other(String::new())));
    if let Some(username) = username {
        merged.username = username;
    }
    if let Some(role) = role {
        merged.role = Role::from(role.as_str());
    }
    merged.home_project()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::{
        CHANNEL_CLOSED_CODE, InvocationLimit,
        transport::testing::{MockConnector, MockTransport},
    };

    fn open_channel(identity: Option<Identity>) -> (Arc<Channel>, Arc<MockConnector>, Arc<MockTransport>) {
        let connector = Arc::new(MockConnector::default());
        let channel = Channel::new("default", ChannelConfig::default(), connector.clone(), identity);
        channel.init(None, None);
        let transport = connector.last();
        transport.open.store(true, Ordering::SeqCst);
        channel.handle_event(TransportEvent::Open);
        (channel, connector, transport)
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&InboundMessage) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move |_: &InboundMessage| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn response(id: u64, code: i64) -> InboundMessage {
        InboundMessage::parse(&json!({"id": id, "code": code, "data": {}}).to_string()).unwrap()
    }

    #[tokio::test]
    async fn send_fails_fast_when_not_ready() {
        let connector = Arc::new(MockConnector::default());
        let channel = Channel::new("default", ChannelConfig::default(), connector.clone(), None);
        let err = channel.send_command(None, "x", Value::Null, None).unwrap_err();
        assert_eq!(err.code(), -1);

        channel.init(None, None);
        let err = channel.send_command(None, "x", Value::Null, None).unwrap_err();
        assert_eq!(err.code(), -2);
        assert_eq!(channel.next_correlation_id(), 1);
    }

    #[tokio::test]
    async fn auto_ids_are_unique_and_wrap_after_ceiling() {
        let (channel, _, _) = open_channel(None);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..MAX_CORRELATION_ID {
            let id = channel.send_command(None, "ping", Value::Null, None).unwrap();
            assert!(seen.insert(id));
        }
        assert_eq!(channel.next_correlation_id(), 1);
        let id = channel.send_command(None, "ping", Value::Null, None).unwrap();
        assert_eq!(id, CorrelationId::Seq(1));
    }

    #[tokio::test]
    async fn pinned_ids_do_not_advance_counter() {
        let (channel, _, transport) = open_channel(None);
        let id = channel
            .send_command(Some("repl-1".into()), "start_python_repl", json!({"projectName": "p"}), None)
            .unwrap();
        assert_eq!(id, CorrelationId::Named("repl-1".into()));
        assert_eq!(channel.next_correlation_id(), 1);

        let id = channel.send_command(Some(CorrelationId::Seq(1)), "x", Value::Null, None).unwrap();
        assert_eq!(id, CorrelationId::Seq(1));
        assert_eq!(channel.next_correlation_id(), 2);

        let frames = transport.sent_json();
        assert_eq!(frames[0]["cmd"], "start_python_repl");
        assert_eq!(frames[0]["data"]["projectName"], "p");
    }

    #[tokio::test]
    async fn one_shot_subscription_fires_once_and_is_removed() {
        let (channel, _, _) = open_channel(None);
        let (count, cb) = counter();
        channel
            .send_command(None, "ide_get_file", Value::Null, Some(Subscription::once(cb)))
            .unwrap();
        assert_eq!(channel.pending_count(), 1);

        channel.handle_message(response(1, 0));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(channel.pending_count(), 0);

        channel.handle_message(response(1, 0));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn limited_and_unlimited_subscriptions() {
        let (channel, _, _) = open_channel(None);
        let (limited, cb) = counter();
        channel
            .send_command(None, "run", Value::Null, Some(Subscription::times(2, cb)))
            .unwrap();
        let (unlimited, cb) = counter();
        channel
            .send_command(None, "run", Value::Null, Some(Subscription::unlimited(cb)))
            .unwrap();

        for _ in 0..5 {
            channel.handle_message(response(1, 0));
            channel.handle_message(response(2, 0));
        }
        assert_eq!(limited.load(Ordering::SeqCst), 2);
        assert_eq!(unlimited.load(Ordering::SeqCst), 5);
        assert_eq!(channel.pending_count(), 1);
    }

    #[tokio::test]
    async fn handlers_see_every_message_once_per_registration() {
        let (channel, _, _) = open_channel(None);
        let (count, cb) = counter();
        let handler: MessageHandler = Arc::new(cb);
        assert!(channel.add_message_handler(Arc::clone(&handler)));
        assert!(!channel.add_message_handler(Arc::clone(&handler)));

        let (matched, cb) = counter();
        channel
            .send_command(None, "x", Value::Null, Some(Subscription::once(cb)))
            .unwrap();
        channel.handle_message(response(1, 0));
        channel.handle_message(response(99, 0));

        assert_eq!(matched.load(Ordering::SeqCst), 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        assert!(channel.remove_message_handler(&handler));
        channel.handle_message(response(99, 0));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn close_settles_every_live_subscription_once() {
        let (channel, _, transport) = open_channel(None);
        let codes = Arc::new(Mutex::new(Vec::new()));
        for limit in [
            InvocationLimit::Times(1),
            InvocationLimit::Times(3),
            InvocationLimit::Unlimited,
            InvocationLimit::Times(0),
        ] {
            let codes = Arc::clone(&codes);
            channel
                .send_command(
                    None,
                    "x",
                    Value::Null,
                    Some(Subscription::new(limit, move |m| {
                        codes.lock().unwrap().push(m.code);
                    })),
                )
                .unwrap();
        }

        channel.close();
        let codes = codes.lock().unwrap();
        assert_eq!(codes.len(), 3);
        assert!(codes.iter().all(|c| *c == Some(CHANNEL_CLOSED_CODE)));
        assert_eq!(channel.pending_count(), 0);
        assert!(transport.closed.load(Ordering::SeqCst));
        assert!(!channel.is_connected());
        assert!(!channel.is_initialized());
    }

    #[tokio::test]
    async fn callbacks_may_send_from_inside_delivery() {
        let (channel, _, transport) = open_channel(None);
        let inner = Arc::clone(&channel);
        channel
            .send_command(
                None,
                "first",
                Value::Null,
                Some(Subscription::once(move |_| {
                    inner.send_command(None, "second", Value::Null, None).unwrap();
                })),
            )
            .unwrap();
        channel.handle_message(response(1, 0));
        let cmds: Vec<_> = transport.sent_json().into_iter().map(|f| f["cmd"].clone()).collect();
        assert_eq!(cmds, [json!("first"), json!("second")]);
    }

    #[tokio::test]
    async fn open_authenticates_with_identity() {
        let identity = Identity::new("sess-42", "sz3991", Role::Student);
        let (channel, _, transport) = open_channel(Some(identity));
        assert!(channel.is_connected());
        let frames = transport.sent_json();
        assert_eq!(frames[0], json!({"cmd": "authenticate", "session_id": "sess-42"}));

        let (count, cb) = counter();
        channel.add_message_handler(Arc::new(cb));

        channel.handle_message(InboundMessage::parse(r#"{"type":"auth_required"}"#).unwrap());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        channel.handle_message(
            InboundMessage::parse(r#"{"type":"auth_success","username":"sz3991","role":"student"}"#)
                .unwrap(),
        );
        assert!(channel.is_authenticated());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(
            transport.sent_json()[1],
            json!({"cmd": "ide_get_project", "project": "Local/sz3991"})
        );

        channel.handle_message(
            InboundMessage::parse(r#"{"type":"error","message":"Not authenticated"}"#).unwrap(),
        );
        assert!(!channel.is_authenticated());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn open_without_identity_sends_nothing() {
        let (_, _, transport) = open_channel(None);
        assert!(transport.sent_json().is_empty());
    }

    #[tokio::test]
    async fn connectivity_follows_transport_events() {
        let (channel, _, _) = open_channel(None);
        let rx = channel.connectivity();
        assert!(*rx.borrow());
        channel.handle_event(TransportEvent::Error("reset".into()));
        assert!(!*rx.borrow());
        channel.handle_event(TransportEvent::Open);
        assert!(*rx.borrow());
        channel.handle_event(TransportEvent::Close);
        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped() {
        let (channel, _, _) = open_channel(None);
        let (count, cb) = counter();
        channel.add_message_handler(Arc::new(cb));
        channel.handle_event(TransportEvent::Message("not json".into()));
        channel.handle_event(TransportEvent::Message(r#"{"id":5,"code":0}"#.into()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn init_is_idempotent_and_applies_overrides() {
        let (channel, connector, first) = open_channel(None);
        let (count, cb) = counter();
        channel
            .send_command(None, "x", Value::Null, Some(Subscription::once(cb)))
            .unwrap();

        channel.init(
            Some(LocationOverride {
                port: Some(8080),
                path: Some("/ide-ws".into()),
                ..LocationOverride::default()
            }),
            None,
        );
        assert!(first.closed.load(Ordering::SeqCst));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(
            connector.urls(),
            ["ws://localhost/ws", "ws://localhost:8080/ide-ws"]
        );
        assert!(channel.reconnect());
        assert_eq!(connector.last().reconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pump_delivers_transport_events() {
        let connector = Arc::new(MockConnector::default());
        let channel = Channel::new("default", ChannelConfig::default(), connector.clone(), None);
        channel.init(None, None);
        let mut rx = channel.connectivity();

        let sender = connector.senders.lock().unwrap().last().unwrap().clone();
        sender.send(TransportEvent::Open).unwrap();
        rx.changed().await.unwrap();
        assert!(channel.is_connected());
    }

    #[test]
    fn home_project_prefers_frame_values() {
        let id = Identity::new("s", "prof", Role::Professor);
        assert_eq!(home_project(Some(&id), None, None), "Local");
        assert_eq!(
            home_project(Some(&id), Some("amy".into()), Some("student".into())),
            "Local/amy"
        );
        assert_eq!(home_project(None, None, Some("student".into())), "Local");
        let student = Identity::new("s", "sz3991", Role::Student);
        assert_eq!(home_project(Some(&student), None, None), "Local/sz3991");
        assert_eq!(home_project(Some(&student), None, Some("professor".into())), "Local");
    }
}
