//! Response subscriptions keyed by correlation id.

use std::{fmt, sync::Arc};

use crate::protocol::InboundMessage;

/// Callback invoked with a correlated response.
pub type ResponseCallback = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

/// How many responses a subscription accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationLimit {
    /// At most this many invocations; `Times(0)` never fires.
    Times(u32),
    /// Never removed by response matching.
    Unlimited,
}

impl InvocationLimit {
    const fn has_remaining(self) -> bool {
        !matches!(self, Self::Times(0))
    }
}

/// A pending callback record.
#[derive(Clone)]
pub struct Subscription {
    callback: ResponseCallback,
    remaining: InvocationLimit,
    finished: bool,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("remaining", &self.remaining)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

/// What the channel should do after a response matched a subscription.
pub(crate) struct Delivery {
    pub callback: Option<ResponseCallback>,
    pub exhausted: bool,
}

impl Subscription {
    /// Subscription with an explicit limit.
    pub fn new<F>(limit: InvocationLimit, callback: F) -> Self
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
            remaining: limit,
            finished: false,
        }
    }

    /// One-shot subscription, the default.
    pub fn once<F>(callback: F) -> Self
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        Self::new(InvocationLimit::Times(1), callback)
    }

    pub fn times<F>(count: u32, callback: F) -> Self
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        Self::new(InvocationLimit::Times(count), callback)
    }

    pub fn unlimited<F>(callback: F) -> Self
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        Self::new(InvocationLimit::Unlimited, callback)
    }

    #[must_use]
    pub const fn remaining(&self) -> InvocationLimit {
        self.remaining
    }

    /// Whether at least one response has matched.
    #[must_use]
    pub const fn finished(&self) -> bool {
        self.finished
    }

    /// Record a matching response.
    ///
    /// Returns the callback to invoke (if any invocations remain) and whether
    /// the subscription is spent and must be removed.
    pub(crate) fn consume(&mut self) -> Delivery {
        let callback = if self.remaining.has_remaining() {
            if let InvocationLimit::Times(n) = &mut self.remaining {
                *n -= 1;
            }
            Some(Arc::clone(&self.callback))
        } else {
            None
        };
        self.finished = true;
        Delivery {
            callback,
            exhausted: self.remaining == InvocationLimit::Times(0),
        }
    }

    /// Callback for the close notification, if invocations remain.
    pub(crate) fn close_callback(&self) -> Option<ResponseCallback> {
        self.remaining
            .has_remaining()
            .then(|| Arc::clone(&self.callback))
    }
}
