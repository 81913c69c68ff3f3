//! Console entry rendering for a plain terminal.

use std::{
    io::{self, Write},
    path::PathBuf,
};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use classroom_ide_core::{ConsoleEntry, EntryKind};

pub struct Renderer {
    figure_dir: Option<PathBuf>,
    figures: usize,
}

impl Renderer {
    pub const fn new(figure_dir: Option<PathBuf>) -> Self {
        Self {
            figure_dir,
            figures: 0,
        }
    }

    pub fn render(&mut self, entry: &ConsoleEntry) -> io::Result<()> {
        match entry.kind {
            // Echoes are already on screen as typed input.
            EntryKind::Input => Ok(()),
            EntryKind::Stdout => write_text(&mut io::stdout().lock(), &entry.text),
            EntryKind::Stderr => write_text(&mut io::stderr().lock(), &entry.text),
            EntryKind::System => writeln!(io::stderr().lock(), "[{}]", entry.text.trim_end()),
            EntryKind::Prompt => Ok(()),
            EntryKind::Figure => {
                let saved = entry
                    .payload
                    .as_deref()
                    .and_then(|payload| self.save_figure(payload));
                let mut out = io::stdout().lock();
                match saved {
                    Some(path) => writeln!(out, "{} ({})", entry.text, path.display()),
                    None => writeln!(out, "{}", entry.text),
                }
            }
        }
    }

    pub fn prompt(prompt: &str) -> io::Result<()> {
        let mut out = io::stdout().lock();
        write!(out, "{prompt}")?;
        out.flush()
    }

    fn save_figure(&mut self, payload: &str) -> Option<PathBuf> {
        let dir = self.figure_dir.as_ref()?;
        let bytes = match decode_data_url(payload) {
            Some(bytes) => bytes,
            None => {
                tracing::warn!("Figure payload is not a base64 data URL");
                return None;
            }
        };
        self.figures += 1;
        let path = dir.join(format!("figure-{}.png", self.figures));
        if let Err(e) = std::fs::create_dir_all(dir).and_then(|()| std::fs::write(&path, bytes)) {
            tracing::error!("Failed to save figure: {e}");
            return None;
        }
        Some(path)
    }
}

fn write_text(out: &mut impl Write, text: &str) -> io::Result<()> {
    if text.ends_with('\n') {
        write!(out, "{text}")?;
    } else {
        writeln!(out, "{text}")?;
    }
    out.flush()
}

/// Decode `data:<mime>;base64,<data>`; bare base64 is accepted too.
fn decode_data_url(payload: &str) -> Option<Vec<u8>> {
    let data = match payload.strip_prefix("data:") {
        Some(rest) => rest.split_once(";base64,")?.1,
        None => payload,
    };
    BASE64.decode(data.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_data_urls() {
        assert_eq!(
            decode_data_url("data:image/png;base64,aGk="),
            Some(b"hi".to_vec())
        );
        assert_eq!(decode_data_url("aGk="), Some(b"hi".to_vec()));
        assert_eq!(decode_data_url("data:image/png,raw"), None);
    }

    #[test]
    fn figures_are_saved_with_increasing_names() {
        let dir = std::env::temp_dir().join(format!("ide-repl-figures-{}", std::process::id()));
        let mut renderer = Renderer::new(Some(dir.clone()));
        let first = renderer.save_figure("data:image/png;base64,aGk=").unwrap();
        let second = renderer.save_figure("aGk=").unwrap();
        assert_eq!(first, dir.join("figure-1.png"));
        assert_eq!(second, dir.join("figure-2.png"));
        assert_eq!(std::fs::read(&first).unwrap(), b"hi");
        let _ = std::fs::remove_dir_all(dir);
    }
}
