//! Editor tab management.

use serde::{Deserialize, Serialize};

use crate::identity::{Identity, can_edit};

/// Maximum number of simultaneously open tabs.
pub const MAX_TABS: usize = 5;

/// An open editor tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tab {
    pub name: String,
    pub path: String,
    pub project: String,
    pub content: String,
    pub is_media: bool,
    pub read_only: bool,
}

/// Result of opening a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    /// The file was already open and is now active.
    Reused,
    /// A new tab was opened; `evicted` is the tab closed to make room.
    Opened { evicted: Option<Tab> },
}

/// Ordered set of open tabs with one active tab.
#[derive(Debug, Clone)]
pub struct EditorTabs {
    tabs: Vec<Tab>,
    active: Option<usize>,
    limit: usize,
}

impl Default for EditorTabs {
    fn default() -> Self {
        Self::new()
    }
}

impl EditorTabs {
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(MAX_TABS)
    }

    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            tabs: Vec::new(),
            active: None,
            limit: limit.max(1),
        }
    }

    /// Open `path` from `project`, always making it the active tab.
    ///
    /// Files are matched by path and project. When the limit is reached the
    /// oldest tab is closed.
    pub fn open(
        &mut self,
        path: &str,
        project: &str,
        content: impl Into<String>,
        is_media: bool,
        identity: Option<&Identity>,
    ) -> OpenOutcome {
        if let Some(index) = self.position(path, project) {
            self.active = Some(index);
            return OpenOutcome::Reused;
        }

        let evicted = if self.tabs.len() >= self.limit {
            let closed = self.tabs.remove(0);
            tracing::info!(
                limit = self.limit,
                closed = %closed.name,
                "tab limit reached, closed oldest tab"
            );
            Some(closed)
        } else {
            None
        };

        self.tabs.push(Tab {
            name: file_name(path).to_string(),
            path: path.to_string(),
            project: project.to_string(),
            content: content.into(),
            is_media,
            read_only: !can_edit(identity, path),
        });
        self.active = Some(self.tabs.len() - 1);

        OpenOutcome::Opened { evicted }
    }

    /// Close the tab for `path` in `project`, returning it.
    ///
    /// When the active tab closes, its left neighbour becomes active, or the
    /// right one if it was first.
    pub fn close(&mut self, path: &str, project: &str) -> Option<Tab> {
        let index = self.position(path, project)?;
        let closed = self.tabs.remove(index);

        self.active = match self.active {
            _ if self.tabs.is_empty() => None,
            Some(active) if active == index => Some(index.saturating_sub(1)),
            Some(active) if active > index => Some(active - 1),
            other => other,
        };
        Some(closed)
    }

    /// Close every tab under the folder `prefix`.
    pub fn close_folder(&mut self, prefix: &str) -> Vec<Tab> {
        let active_path = self.active().map(|t| t.path.clone());
        let (closed, kept): (Vec<_>, Vec<_>) =
            self.tabs.drain(..).partition(|t| t.path.starts_with(prefix));
        self.tabs = kept;
        self.active = active_path
            .and_then(|p| self.tabs.iter().position(|t| t.path == p))
            .or(if self.tabs.is_empty() { None } else { Some(0) });
        closed
    }

    #[must_use]
    pub fn active(&self) -> Option<&Tab> {
        self.active.and_then(|i| self.tabs.get(i))
    }

    #[must_use]
    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    fn position(&self, path: &str, project: &str) -> Option<usize> {
        self.tabs
            .iter()
            .position(|t| t.path == path && t.project == project)
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
