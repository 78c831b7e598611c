//! Interactive command-line front end for the voice assistant.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;
use wisevoice::audio::CpalCapture;
use wisevoice::credentials::resolve_api_key;
use wisevoice::session::{CpalEnvironment, WsConnector};
use wisevoice::{AssistantConfig, DocumentIngestor, KnowledgeStore, SessionManager, UiEvent};

#[derive(Parser)]
#[command(name = "wisevoice", version, about = "Voice assistant grounded in your documents")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive voice/text conversation (default).
    Chat,
    /// List audio input devices.
    Devices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wisevoice=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AssistantConfig::from_file(path)?,
        None => AssistantConfig::default(),
    };

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => chat(config).await,
        Command::Devices => {
            for name in CpalCapture::list_input_devices()? {
                println!("{name}");
            }
            Ok(())
        }
    }
}

async fn chat(config: AssistantConfig) -> anyhow::Result<()> {
    let knowledge = Arc::new(Mutex::new(KnowledgeStore::new()));
    let ingest_config = config.ingest.clone();
    let session_config = config.session.clone();

    let mut manager = SessionManager::new(
        config,
        Arc::new(WsConnector),
        Arc::new(CpalEnvironment),
        Arc::clone(&knowledge),
    );

    if let Some(mut ui) = manager.take_ui_events() {
        tokio::spawn(async move {
            while let Some(event) = ui.recv().await {
                render(&event);
            }
        });
    }

    println!("wisevoice ready. /add <pdf> to ingest, /start, /stop, /quit; anything else is sent as text.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                manager.stop();
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match line.split_once(' ').map_or((line, ""), |(c, rest)| (c, rest.trim())) {
                    ("/quit", _) => {
                        manager.stop();
                        break;
                    }
                    ("/stop", _) => manager.stop(),
                    ("/start", _) => {
                        if let Err(e) = manager.start(None).await {
                            eprintln!("start failed: {e}");
                        }
                    }
                    ("/add", path) if !path.is_empty() => {
                        match resolve_api_key(&session_config) {
                            Ok(key) => {
                                let ingestor = DocumentIngestor::new(ingest_config.clone(), key);
                                match ingestor.ingest_file(path).await {
                                    Ok(entry) => {
                                        println!("added '{}' ({} summary chars)", entry.name, entry.content.chars().count());
                                        if let Ok(mut store) = knowledge.lock() {
                                            store.push(entry);
                                        }
                                    }
                                    Err(e) => eprintln!("ingest failed: {e}"),
                                }
                            }
                            Err(e) => eprintln!("{e}"),
                        }
                    }
                    ("/add", _) => eprintln!("usage: /add <path-to-pdf>"),
                    _ => {
                        if let Err(e) = manager.send_text(line).await {
                            eprintln!("send failed: {e}");
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

fn render(event: &UiEvent) {
    match event {
        UiEvent::Status(status) => println!("[session: {status:?}]"),
        UiEvent::UserText(text) => println!("you: {text}"),
        UiEvent::AssistantDelta(_) => {}
        UiEvent::AssistantTurn(text) => println!("assistant: {text}"),
        UiEvent::Speaking(true) => println!("[speaking]"),
        UiEvent::Speaking(false) => println!("[quiet]"),
        UiEvent::Notice(message) => {
            warn!("{message}");
            eprintln!("! {message}");
        }
    }
}
