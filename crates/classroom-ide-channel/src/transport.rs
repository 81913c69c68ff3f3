//! Transport seam between the channel and a concrete socket.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{ChannelOptions, TransportError};

/// Event emitted by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Close,
    Error(String),
    /// A text frame.
    Message(String),
}

/// Receiver side of a transport's events.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// A live, self-reconnecting connection.
///
/// Implementations must not block: `send_text` queues the frame.
pub trait Transport: Send + Sync {
    fn is_open(&self) -> bool;

    /// Queue a text frame.
    ///
    /// # Errors
    /// Returns error if the connection is not open.
    fn send_text(&self, text: String) -> Result<(), TransportError>;

    /// Drop the current connection and connect again.
    fn reconnect(&self);

    /// Close for good; no further events are produced.
    fn close(&self);
}

/// Opens transports.
pub trait Connector: Send + Sync {
    fn connect(&self, url: &str, options: &ChannelOptions) -> (Arc<dyn Transport>, EventReceiver);
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    use super::*;

    /// Transport double recording outbound frames.
    #[derive(Default)]
    pub struct MockTransport {
        pub open: AtomicBool,
        pub closed: AtomicBool,
        pub reconnects: AtomicUsize,
        pub sent: Mutex<Vec<String>>,
    }

    impl MockTransport {
        pub fn sent_json(&self) -> Vec<serde_json::Value> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|s| serde_json::from_str(s).unwrap())
                .collect()
        }
    }

    impl Transport for MockTransport {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        fn send_text(&self, text: String) -> Result<(), TransportError> {
            if !self.is_open() {
                return Err(TransportError::NotOpen);
            }
            self.sent.lock().unwrap().push(text);
            Ok(())
        }

        fn reconnect(&self) {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
        }

        fn close(&self) {
            self.open.store(false, Ordering::SeqCst);
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Connector handing out [`MockTransport`]s and keeping them for inspection.
    #[derive(Default)]
    pub struct MockConnector {
        pub transports: Mutex<Vec<(String, Arc<MockTransport>)>>,
        pub senders: Mutex<Vec<mpsc::UnboundedSender<TransportEvent>>>,
    }

    impl MockConnector {
        pub fn last(&self) -> Arc<MockTransport> {
            Arc::clone(&self.transports.lock().unwrap().last().unwrap().1)
        }

        pub fn urls(&self) -> Vec<String> {
            self.transports
                .lock()
                .unwrap()
                .iter()
                .map(|(url, _)| url.clone())
                .collect()
        }
    }

    impl Connector for MockConnector {
        fn connect(
            &self,
            url: &str,
            _options: &ChannelOptions,
        ) -> (Arc<dyn Transport>, EventReceiver) {
            let transport = Arc::new(MockTransport::default());
            let (tx, rx) = mpsc::unbounded_channel();
            self.transports
                .lock()
                .unwrap()
                .push((url.to_string(), Arc::clone(&transport)));
            self.senders.lock().unwrap().push(tx);
            (transport, rx)
        }
    }
}
