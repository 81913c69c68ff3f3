//! Backend push normalization.

use classroom_ide_channel::InboundMessage;
use serde_json::Value;

/// Codes carried by backend pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Output,
    /// Prompt update, input request, or extra output.
    Prompt,
    InputAck,
    Figure,
    /// Backend stopped the program (timeout, runaway loop).
    Stopped,
    ReplMode,
    SessionEnded,
    Other(i64),
}

impl From<i64> for ResponseCode {
    fn from(code: i64) -> Self {
        match code {
            0 => Self::Output,
            2000 => Self::Prompt,
            2001 => Self::InputAck,
            3000 => Self::Figure,
            4000 => Self::Stopped,
            5000 => Self::ReplMode,
            1111 => Self::SessionEnded,
            other => Self::Other(other),
        }
    }
}

/// A push reduced to what the director acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    Output {
        stdout: Option<String>,
        stderr: Option<String>,
    },
    /// Code 0 without any output.
    ProgramStarted,
    ReplPrompt,
    AwaitingInput {
        prompt: String,
    },
    InputAck,
    Figure {
        payload: Option<String>,
    },
    Stopped {
        error: Option<String>,
    },
    ReplMode,
    SessionEnded,
    Unknown(i64),
}

impl BackendEvent {
    /// Classify a push; `None` when it carries no code.
    #[must_use]
    pub fn from_message(message: &InboundMessage) -> Option<Self> {
        let code = message.code?;
        let text = |key: &str| message.data_str(key).map(ToString::to_string);

        Some(match ResponseCode::from(code) {
            ResponseCode::Output => {
                let stdout = text("stdout").filter(|s| !s.is_empty());
                let stderr = text("stderr").filter(|s| !s.is_empty());
                if stdout.is_none() && stderr.is_none() {
                    Self::ProgramStarted
                } else {
                    Self::Output { stdout, stderr }
                }
            }
            ResponseCode::Prompt => {
                if message.data_str("type") == Some("repl_prompt") {
                    Self::ReplPrompt
                } else if let Some(prompt) = message.data.get("prompt") {
                    Self::AwaitingInput {
                        prompt: prompt.as_str().unwrap_or_default().to_string(),
                    }
                } else {
                    Self::Output {
                        stdout: text("stdout").filter(|s| !s.is_empty()),
                        stderr: None,
                    }
                }
            }
            ResponseCode::InputAck => Self::InputAck,
            ResponseCode::Figure => Self::Figure {
                payload: message
                    .data
                    .get("data")
                    .and_then(Value::as_str)
                    .map(ToString::to_string),
            },
            ResponseCode::Stopped => Self::Stopped {
                error: text("error").filter(|s| !s.is_empty()),
            },
            ResponseCode::ReplMode => Self::ReplMode,
            ResponseCode::SessionEnded => Self::SessionEnded,
            ResponseCode::Other(code) => Self::Unknown(code),
        })
    }
}

/// Whether a stdout chunk is only an echoed prompt or whitespace.
#[must_use]
pub fn is_prompt_only(text: &str) -> bool {
    matches!(text.trim(), "" | ">>>" | "...")
}

/// Split a trailing `>>>` prompt off a stdout chunk.
///
/// Returns the output before the prompt and whether a prompt was found. The
/// prompt only counts when it starts a line.
#[must_use]
pub fn split_trailing_prompt(text: &str) -> (&str, bool) {
    let body = text.trim_end();
    match body.strip_suffix(">>>") {
        Some(head) if head.is_empty() || head.ends_with('\n') => (head, true),
        _ => (text, false),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn event(frame: Value) -> Option<BackendEvent> {
        BackendEvent::from_message(&InboundMessage::parse(&frame.to_string()).unwrap())
    }

    #[test]
    fn prompt_only_chunks() {
        for text in [">>> ", "... ", ">>>\n\n", "  ...  ", "", " \n"] {
            assert!(is_prompt_only(text), "{text:?}");
        }
        for text in ["1\n", ">>> print(1)", "...done"] {
            assert!(!is_prompt_only(text), "{text:?}");
        }
    }

    #[test]
    fn trailing_prompts_are_split_off() {
        assert_eq!(split_trailing_prompt("1\n>>> "), ("1\n", true));
        assert_eq!(split_trailing_prompt("a\nb\n>>>"), ("a\nb\n", true));
        assert_eq!(split_trailing_prompt(">>> "), ("", true));
        assert_eq!(split_trailing_prompt("1\n"), ("1\n", false));
        assert_eq!(split_trailing_prompt("x >>> "), ("x >>> ", false));
        assert_eq!(split_trailing_prompt("... "), ("... ", false));
    }

    #[test]
    fn output_and_program_start() {
        assert_eq!(
            event(json!({"id": "s", "code": 0, "data": {"stdout": "1\n"}})),
            Some(BackendEvent::Output {
                stdout: Some("1\n".into()),
                stderr: None
            })
        );
        assert_eq!(
            event(json!({"id": "s", "code": "0", "data": {}})),
            Some(BackendEvent::ProgramStarted)
        );
    }

    #[test]
    fn code_2000_variants() {
        assert_eq!(
            event(json!({"code": 2000, "data": {"type": "repl_prompt"}})),
            Some(BackendEvent::ReplPrompt)
        );
        assert_eq!(
            event(json!({"code": 2000, "data": {"prompt": "Name? "}})),
            Some(BackendEvent::AwaitingInput {
                prompt: "Name? ".into()
            })
        );
        assert_eq!(
            event(json!({"code": 2000, "data": {"stdout": "hi"}})),
            Some(BackendEvent::Output {
                stdout: Some("hi".into()),
                stderr: None
            })
        );
    }

    #[test]
    fn remaining_codes() {
        assert_eq!(
            event(json!({"code": 3000, "data": {"data": "data:image/png;base64,AAAA"}})),
            Some(BackendEvent::Figure {
                payload: Some("data:image/png;base64,AAAA".into())
            })
        );
        assert_eq!(
            event(json!({"code": 4000, "data": {"error": "Timeout"}})),
            Some(BackendEvent::Stopped {
                error: Some("Timeout".into())
            })
        );
        assert_eq!(event(json!({"code": 2001})), Some(BackendEvent::InputAck));
        assert_eq!(event(json!({"code": 5000})), Some(BackendEvent::ReplMode));
        assert_eq!(event(json!({"code": 1111})), Some(BackendEvent::SessionEnded));
        assert_eq!(event(json!({"code": 42})), Some(BackendEvent::Unknown(42)));
        assert_eq!(event(json!({"type": "auth_success"})), None);
    }
}
