//! Terminal front end for the dual-mode classroom REPL.
//!
//! Run with: cargo run -p classroom-ide-repl-cli -- --url ws://localhost:8080/ws
//!
//! Lines starting with `:` are front-end commands (`:stop`, `:start`,
//! `:history`, `:quit`); everything else goes to the REPL.

mod render;
mod settings;

use std::{sync::Arc, time::Duration};

use clap::Parser;
use classroom_ide_channel::{
    ChannelRegistry, DEFAULT_CHANNEL, InboundMessage, MessageHandler, WsConnector,
};
use classroom_ide_core::Console;
use classroom_ide_repl::ExecutionDirector;
use classroom_ide_runtime::{InterpreterCommand, PythonRuntime};
use futures::StreamExt;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
    time::Instant,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    render::Renderer,
    settings::{Args, Settings, default_identity_path, load_identity},
};

/// Quiet period after output before the prompt is redrawn.
const PROMPT_DELAY: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let args = Args::parse();
    let settings = Settings::load(&args)?;
    let identity = match args.identity.clone().or_else(default_identity_path) {
        Some(path) => load_identity(&path)?,
        None => None,
    };
    if let Some(identity) = &identity {
        tracing::info!(username = %identity.username, role = %identity.role, "Loaded identity");
    }

    let registry = ChannelRegistry::new(Arc::new(WsConnector), identity.clone());
    let channel = registry.register(DEFAULT_CHANNEL, settings.channel.clone());

    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<InboundMessage>();
    let forward: MessageHandler = Arc::new(move |message: &InboundMessage| {
        let _ = push_tx.send(message.clone());
    });
    channel.add_message_handler(forward);

    let mut connectivity = channel.connectivity();
    channel.init(None, None);

    // Give the backend one connection attempt before choosing a target.
    let connect_wait = settings.channel.options.reconnect.connection_timeout();
    let _ = tokio::time::timeout(connect_wait, connectivity.wait_for(|connected| *connected)).await;

    let command = settings
        .python
        .as_deref()
        .map_or_else(InterpreterCommand::default, InterpreterCommand::new);
    let runtime = Arc::new(PythonRuntime::new(command));
    let console = Arc::new(Console::new());
    let mut entries = console.history_plus_stream();
    let mut renderer = Renderer::new(settings.figure_dir.clone());

    let mut director = ExecutionDirector::new(
        Arc::clone(&channel),
        runtime,
        Arc::clone(&console),
        settings.director.clone(),
    )
    .with_identity(identity);
    let state = director.start().await?;
    eprintln!("[REPL started in {state} mode]");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut prompt_at = Some(Instant::now() + PROMPT_DELAY);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    ":quit" | ":exit" => break,
                    ":stop" => {
                        if let Err(e) = director.stop().await {
                            eprintln!("[{e}]");
                        }
                    }
                    ":start" => match director.start().await {
                        Ok(state) => eprintln!("[REPL started in {state} mode]"),
                        Err(e) => eprintln!("[{e}]"),
                    },
                    ":history" => {
                        for (i, cmd) in director.session().history.entries().iter().enumerate() {
                            println!("{:>4}  {cmd}", i + 1);
                        }
                    }
                    _ => director.submit(&line).await,
                }
                prompt_at = Some(Instant::now() + PROMPT_DELAY);
            }
            Some(message) = push_rx.recv() => {
                director.handle_push(&message).await;
            }
            changed = connectivity.changed() => {
                if changed.is_err() {
                    break;
                }
                let connected = *connectivity.borrow_and_update();
                director.on_connectivity(connected).await;
            }
            Some(entry) = entries.next() => {
                renderer.render(&entry)?;
                prompt_at = Some(Instant::now() + PROMPT_DELAY);
            }
            () = tokio::time::sleep_until(prompt_at.unwrap_or_else(Instant::now)), if prompt_at.is_some() => {
                prompt_at = None;
                Renderer::prompt(director.prompt())?;
            }
        }
    }

    if director.state().is_active() {
        let _ = director.stop().await;
    }
    registry.shutdown();
    Ok(())
}
