//! Command-line flags and the optional JSON settings file.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use classroom_ide_channel::{ChannelConfig, Location};
use classroom_ide_core::Identity;
use classroom_ide_repl::{ContinuationPolicy, DirectorConfig, ReplMode};
use serde::Deserialize;

#[derive(Debug, Parser)]
#[command(name = "ide-repl", version, about = "Dual-mode Python REPL for the classroom IDE")]
pub struct Args {
    /// Backend WebSocket URL, e.g. wss://ide.example.edu/ws.
    #[arg(long, env = "IDE_REPL_URL")]
    pub url: Option<String>,

    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Local interpreter command.
    #[arg(long, env = "IDE_REPL_PYTHON")]
    pub python: Option<String>,

    #[arg(long, value_enum)]
    pub continuation: Option<ContinuationArg>,

    /// Project name sent when starting a backend session.
    #[arg(long)]
    pub project: Option<String>,

    /// Save figures shown by the backend into this directory.
    #[arg(long)]
    pub figure_dir: Option<PathBuf>,

    /// Identity file (JSON with session_id, username, role).
    #[arg(long, env = "IDE_REPL_IDENTITY")]
    pub identity: Option<PathBuf>,

    /// Settings file (JSON with channel, director and python keys).
    #[arg(long, env = "IDE_REPL_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Auto,
    Backend,
    Browser,
}

impl From<ModeArg> for ReplMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Auto => Self::Auto,
            ModeArg::Backend => Self::Backend,
            ModeArg::Browser => Self::Browser,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ContinuationArg {
    Fixed,
    Colon,
}

impl From<ContinuationArg> for ContinuationPolicy {
    fn from(policy: ContinuationArg) -> Self {
        match policy {
            ContinuationArg::Fixed => Self::Fixed,
            ContinuationArg::Colon => Self::Colon,
        }
    }
}

/// Resolved settings: file values with flags applied on top.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub channel: ChannelConfig,
    pub director: DirectorConfig,
    pub python: Option<String>,
    pub figure_dir: Option<PathBuf>,
}

impl Settings {
    /// Load the settings file (if any) and apply flag overrides.
    pub fn load(args: &Args) -> anyhow::Result<Self> {
        let mut settings = match &args.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read settings {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("Invalid settings {}", path.display()))?
            }
            None => Self::default(),
        };
        settings.apply(args)?;
        Ok(settings)
    }

    fn apply(&mut self, args: &Args) -> anyhow::Result<()> {
        if let Some(url) = &args.url {
            self.channel.location = Location::parse(url)?;
        }
        if let Some(mode) = args.mode {
            self.director.mode = mode.into();
        }
        if let Some(policy) = args.continuation {
            self.director.continuation = policy.into();
        }
        if let Some(project) = &args.project {
            self.director.project_name = Some(project.clone());
        }
        if let Some(python) = &args.python {
            self.python = Some(python.clone());
        }
        if let Some(dir) = &args.figure_dir {
            self.figure_dir = Some(dir.clone());
        }
        Ok(())
    }
}

/// Default identity file location.
pub fn default_identity_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("classroom-ide").join("identity.json"))
}

/// Read the identity file. A missing file means "signed out".
pub fn load_identity(path: &Path) -> anyhow::Result<Option<Identity>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read identity {}", path.display()));
        }
    };
    let identity: Identity = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid identity {}", path.display()))?;
    Ok(identity.is_complete().then_some(identity))
}
