//! REPL session state: prompt, continuation, history.

use crate::ContinuationPolicy;

pub const PRIMARY_PROMPT: &str = ">>> ";
pub const CONTINUATION_PROMPT: &str = "... ";

/// Submitted commands with a navigation cursor.
#[derive(Debug, Clone, Default)]
pub struct History {
    entries: Vec<String>,
    /// `None` means past the newest entry.
    cursor: Option<usize>,
}

impl History {
    /// Append a command unless it repeats the newest one; resets the cursor.
    pub fn push(&mut self, command: &str) {
        if self.entries.last().map(String::as_str) != Some(command) {
            self.entries.push(command.to_string());
        }
        self.cursor = None;
    }

    /// Step back; stays on the oldest entry once reached.
    pub fn back(&mut self) -> Option<&str> {
        let index = match self.cursor {
            None => self.entries.len().checked_sub(1)?,
            Some(i) => i.saturating_sub(1),
        };
        self.cursor = Some(index);
        self.entries.get(index).map(String::as_str)
    }

    /// Step forward; `None` once past the newest entry.
    pub fn forward(&mut self) -> Option<&str> {
        let index = self.cursor? + 1;
        if index < self.entries.len() {
            self.cursor = Some(index);
            self.entries.get(index).map(String::as_str)
        } else {
            self.cursor = None;
            None
        }
    }

    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    #[must_use]
    pub const fn cursor(&self) -> Option<usize> {
        self.cursor
    }
}

/// Whether `line` belongs to the block being entered.
fn continues_block(line: &str) -> bool {
    if line.starts_with([' ', '\t']) {
        return true;
    }
    let keyword = line
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .next()
        .unwrap_or_default();
    matches!(keyword, "elif" | "else" | "except" | "finally" | "case")
}

/// One REPL session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Id of the backend session while one is active.
    pub backend_id: Option<String>,
    pub history: History,
    policy: ContinuationPolicy,
    continuation: bool,
    block: Vec<String>,
    input_prompt: Option<String>,
}

impl Session {
    #[must_use]
    pub fn new(policy: ContinuationPolicy) -> Self {
        Self {
            backend_id: None,
            history: History::default(),
            policy,
            continuation: false,
            block: Vec::new(),
            input_prompt: None,
        }
    }

    /// Prompt shown for the next line.
    #[must_use]
    pub fn prompt(&self) -> &str {
        if let Some(prompt) = self.input_prompt.as_deref() {
            return prompt;
        }
        if self.continuation {
            CONTINUATION_PROMPT
        } else {
            PRIMARY_PROMPT
        }
    }

    #[must_use]
    pub const fn in_continuation(&self) -> bool {
        self.continuation
    }

    #[must_use]
    pub const fn is_waiting_for_input(&self) -> bool {
        self.input_prompt.is_some()
    }

    pub fn await_input(&mut self, prompt: String) {
        self.input_prompt = Some(prompt);
    }

    /// Clear the waiting-for-input state, returning its prompt.
    pub fn take_input_request(&mut self) -> Option<String> {
        self.input_prompt.take()
    }

    /// Back to `>>> ` with no continuation; any buffered block is dropped.
    pub fn reset_prompt(&mut self) {
        self.continuation = false;
        self.block.clear();
    }

    /// Track continuation for a submitted line.
    ///
    /// Returns true when the line opens or extends a block under the colon
    /// policy; such lines are buffered rather than run.
    pub fn enter_line(&mut self, line: &str) -> bool {
        if self.policy != ContinuationPolicy::Colon {
            return false;
        }
        if self.continuation || line.trim_end().ends_with(':') {
            self.continuation = true;
            self.block.push(line.to_string());
            return true;
        }
        false
    }

    /// Track continuation for a line the backend evaluates itself; nothing
    /// is buffered.
    pub fn note_remote_line(&mut self, line: &str) {
        if self.policy == ContinuationPolicy::Colon && line.trim_end().ends_with(':') {
            self.continuation = true;
        }
    }

    /// Close the buffered block when `line` leaves it.
    ///
    /// A line with no indentation ends the block unless it is a clause
    /// that continues it (`else:`, `except ...:` and the like). Returns the
    /// block's source when anything was buffered.
    pub fn close_block_before(&mut self, line: &str) -> Option<String> {
        if !self.continuation || continues_block(line) {
            return None;
        }
        self.continuation = false;
        let block = std::mem::take(&mut self.block);
        (!block.is_empty()).then(|| block.join("\n"))
    }

    /// Forget everything but the history.
    pub fn reset(&mut self) {
        self.backend_id = None;
        self.input_prompt = None;
        self.reset_prompt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_dedupes_consecutive_and_navigates() {
        let mut history = History::default();
        for cmd in ["a", "b", "b", "c"] {
            history.push(cmd);
        }
        assert_eq!(history.entries(), ["a", "b", "c"]);

        assert_eq!(history.back(), Some("c"));
        assert_eq!(history.back(), Some("b"));
        assert_eq!(history.back(), Some("a"));
        assert_eq!(history.back(), Some("a"));
        assert_eq!(history.forward(), Some("b"));
        assert_eq!(history.forward(), Some("c"));
        assert_eq!(history.forward(), None);
        assert_eq!(history.cursor(), None);

        history.back();
        history.push("d");
        assert_eq!(history.cursor(), None);
    }

    #[test]
    fn empty_history_has_nothing_to_walk() {
        let mut history = History::default();
        assert_eq!(history.back(), None);
        assert_eq!(history.forward(), None);
    }

    #[test]
    fn fixed_policy_never_continues() {
        let mut session = Session::new(ContinuationPolicy::Fixed);
        assert!(!session.enter_line("for i in range(3):"));
        assert_eq!(session.prompt(), PRIMARY_PROMPT);
    }

    #[test]
    fn colon_policy_buffers_blocks_until_dedent() {
        let mut session = Session::new(ContinuationPolicy::Colon);
        assert!(session.enter_line("for i in range(3):"));
        assert_eq!(session.prompt(), CONTINUATION_PROMPT);
        assert_eq!(session.close_block_before("    print(i)"), None);
        assert!(session.enter_line("    print(i)"));
        assert_eq!(
            session.close_block_before("x = 1").as_deref(),
            Some("for i in range(3):\n    print(i)")
        );
        assert_eq!(session.prompt(), PRIMARY_PROMPT);
        assert!(!session.enter_line("x = 1"));
    }

    #[test]
    fn clauses_continue_the_block() {
        let mut session = Session::new(ContinuationPolicy::Colon);
        session.enter_line("if x:");
        session.enter_line("    a()");
        assert_eq!(session.close_block_before("else:"), None);
        assert!(session.enter_line("else:"));
        session.enter_line("    b()");
        assert_eq!(
            session.close_block_before("done()").as_deref(),
            Some("if x:\n    a()\nelse:\n    b()")
        );
        // `elsewhere` is an ordinary name, not a clause.
        session.enter_line("if y:");
        assert!(session.close_block_before("elsewhere = 1").is_some());
    }

    #[test]
    fn reset_prompt_discards_the_block() {
        let mut session = Session::new(ContinuationPolicy::Colon);
        session.enter_line("while True:");
        session.enter_line("    pass");
        session.reset_prompt();
        assert!(!session.in_continuation());
        assert_eq!(session.close_block_before("x = 1"), None);
    }

    #[test]
    fn input_prompt_takes_precedence() {
        let mut session = Session::new(ContinuationPolicy::Fixed);
        session.await_input("Name? ".into());
        assert_eq!(session.prompt(), "Name? ");
        assert_eq!(session.take_input_request().as_deref(), Some("Name? "));
        assert_eq!(session.prompt(), PRIMARY_PROMPT);
    }
}
