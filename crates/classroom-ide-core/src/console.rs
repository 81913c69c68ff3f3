//! Bounded console buffer with broadcast to live listeners.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::ConsoleEntry;

/// Maximum number of retained entries.
pub const MAX_ENTRIES: usize = 30_000;

/// Number of oldest entries dropped when the ceiling is exceeded.
pub const EVICTION_BATCH: usize = 100;

/// Console output buffer.
///
/// Entries are appended in order and fanned out to live listeners. History is
/// bounded: an insert that takes the buffer past [`MAX_ENTRIES`] evicts the
/// oldest [`EVICTION_BATCH`] entries, so long-running programs cannot grow it
/// without limit.
pub struct Console {
    history: RwLock<VecDeque<ConsoleEntry>>,
    sender: broadcast::Sender<ConsoleEntry>,
    capacity: usize,
    eviction_batch: usize,
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Console {
    /// Create a console with the default retention policy.
    #[must_use]
    pub fn new() -> Self {
        Self::with_retention(MAX_ENTRIES, EVICTION_BATCH)
    }

    /// Create a console with a custom retention policy.
    ///
    /// `eviction_batch` is clamped to at least one entry.
    #[must_use]
    pub fn with_retention(capacity: usize, eviction_batch: usize) -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            history: RwLock::new(VecDeque::with_capacity(64)),
            sender,
            capacity,
            eviction_batch: eviction_batch.max(1),
        }
    }

    /// Append an entry to history and notify live listeners.
    pub fn push(&self, entry: ConsoleEntry) {
        let _ = self.sender.send(entry.clone());

        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        history.push_back(entry);
        if history.len() > self.capacity {
            let evict = self.eviction_batch.min(history.len());
            history.drain(..evict);
            tracing::trace!(evicted = evict, retained = history.len(), "console history trimmed");
        }
    }

    pub fn push_input(&self, text: impl Into<String>, prompt: impl Into<String>) {
        self.push(ConsoleEntry::input(text, prompt));
    }

    pub fn push_stdout(&self, text: impl Into<String>) {
        self.push(ConsoleEntry::stdout(text));
    }

    pub fn push_stderr(&self, text: impl Into<String>) {
        self.push(ConsoleEntry::stderr(text));
    }

    pub fn push_system(&self, text: impl Into<String>) {
        self.push(ConsoleEntry::system(text));
    }

    pub fn push_prompt(&self, text: impl Into<String>) {
        self.push(ConsoleEntry::prompt(text));
    }

    pub fn push_figure(&self, payload: Option<String>) {
        self.push(ConsoleEntry::figure(payload));
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.history.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all retained entries. Live listeners are unaffected.
    pub fn clear(&self) {
        self.history.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Get a receiver for live entries.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConsoleEntry> {
        self.sender.subscribe()
    }

    /// Snapshot of retained entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<ConsoleEntry> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Stream that yields retained history first, then live entries.
    ///
    /// Entries pushed between the snapshot and the subscription are not
    /// duplicated; lagging receivers skip what they missed.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, ConsoleEntry> {
        let (history, rx) = {
            let guard = self.history.read().unwrap_or_else(PoisonError::into_inner);
            let rx = self.sender.subscribe();
            (guard.iter().cloned().collect::<Vec<_>>(), rx)
        };

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntryKind;

    #[test]
    fn eviction_keeps_count_within_ceiling() {
        let console = Console::new();
        for i in 0..=MAX_ENTRIES {
            console.push_stdout(i.to_string());
            assert!(console.len() <= MAX_ENTRIES);
        }
        assert_eq!(console.len(), MAX_ENTRIES + 1 - EVICTION_BATCH);

        let entries = console.entries();
        assert_eq!(entries[0].text, EVICTION_BATCH.to_string());
        assert_eq!(entries.last().unwrap().text, MAX_ENTRIES.to_string());
    }

    #[test]
    fn small_retention_evicts_oldest_batch() {
        let console = Console::with_retention(5, 2);
        for i in 0..6 {
            console.push_stdout(i.to_string());
        }
        let texts: Vec<_> = console.entries().into_iter().map(|e| e.text).collect();
        assert_eq!(texts, ["2", "3", "4", "5"]);
    }

    #[test]
    fn live_listeners_see_entries() {
        let console = Console::new();
        let mut rx = console.subscribe();
        console.push_system("hello");
        let entry = rx.try_recv().unwrap();
        assert_eq!(entry.kind, EntryKind::System);
        assert_eq!(entry.text, "hello");
    }

    #[test]
    fn history_then_live() {
        let console = Console::new();
        console.push_stdout("first");
        let mut stream = console.history_plus_stream();
        console.push_stderr("second");

        let first = tokio_test::block_on(stream.next()).unwrap();
        let second = tokio_test::block_on(stream.next()).unwrap();
        assert_eq!(first.text, "first");
        assert_eq!(second.kind, EntryKind::Stderr);
    }

    #[test]
    fn clear_drops_history() {
        let console = Console::new();
        console.push_stdout("x");
        console.clear();
        assert!(console.is_empty());
    }
}
