use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use signpath_gateway::{
    AvatarVideoRequester, CompletionClient, Config, ConversationOrchestrator, ConversationStore,
    GestureMonitor, GestureServiceClient, MemoryStore, OrchestratorParts, RemoteSpeechEngine,
    Role, SpeechSequencer, SpeechServiceClient, SqliteStore, VoiceInputController, store,
};

/// Signpath - conversation gateway for a sign-language assistant
#[derive(Parser)]
#[command(name = "signpath", version, about)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "SIGNPATH_CONFIG")]
    config: Option<PathBuf>,

    /// User id for persistent conversations; omit for an in-memory session
    #[arg(short, long, env = "SIGNPATH_USER")]
    user: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable voice input (no speech service available)
    #[arg(long)]
    no_voice: bool,

    /// Disable the gesture camera
    #[arg(long)]
    no_camera: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// List saved conversations for the user
    List,
    /// Delete a saved conversation
    Delete {
        /// Conversation id
        id: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,signpath_gateway=info",
        1 => "info,signpath_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "loaded configuration");

    let store: Arc<dyn ConversationStore> = if cli.user.is_some() {
        let pool = store::init(config.database_path())?;
        Arc::new(SqliteStore::new(pool))
    } else {
        Arc::new(MemoryStore::new())
    };
    let user_id = cli.user.clone().unwrap_or_else(|| "anonymous".to_string());

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::List => cmd_list(store.as_ref(), &user_id).await,
            Command::Delete { id } => cmd_delete(store.as_ref(), &user_id, &id).await,
        };
    }

    let backend = Arc::new(CompletionClient::new(config.completion.clone()));
    let speech = Arc::new(SpeechSequencer::new(Arc::new(RemoteSpeechEngine::new(
        config.speech.base_url.clone(),
    ))));
    let gesture_service = Arc::new(GestureServiceClient::new(config.gesture.base_url.clone()));
    let avatar = Arc::new(AvatarVideoRequester::new(gesture_service.clone()));

    let (transcript_tx, transcript_rx) = mpsc::channel(8);
    let voice = (!cli.no_voice).then(|| {
        Arc::new(VoiceInputController::new(
            Arc::new(SpeechServiceClient::new(config.speech.base_url.clone())),
            transcript_tx,
            Duration::from_millis(config.speech.poll_interval_ms),
        ))
    });

    let (sentence_tx, sentence_rx) = mpsc::channel(8);
    let gesture = (!cli.no_camera).then(|| {
        Arc::new(GestureMonitor::new(
            gesture_service,
            sentence_tx,
            Duration::from_millis(config.gesture.poll_interval_ms),
        ))
    });

    let orchestrator = Arc::new(ConversationOrchestrator::new(OrchestratorParts {
        backend,
        store,
        speech,
        avatar,
        voice,
        gesture,
        system_prompt: config.completion.system_prompt.clone(),
        display_max_chars: config.display.max_chars,
    }));

    // Anonymous sessions persist too, just into the in-memory store
    let id = orchestrator.new_conversation(&user_id, "New chat").await?;
    tracing::info!(conversation = %id, "conversation created");

    orchestrator.spawn_transcript_loop(transcript_rx);
    orchestrator.spawn_sentence_loop(sentence_rx);
    spawn_reply_printer(&orchestrator);

    println!("signpath ready. /voice toggles recording, /camera toggles gestures,");
    println!("/stop silences speech, /quit exits.");

    chat_loop(&orchestrator).await;

    orchestrator.dispose().await;
    Ok(())
}

/// Read stdin lines, dispatching slash commands and plain messages
async fn chat_loop(orchestrator: &Arc<ConversationOrchestrator>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(error = %e, "failed to read input");
                return;
            }
        };

        match line.trim() {
            "" => {}
            "/quit" | "/exit" => return,
            "/voice" => {
                if let Err(e) = orchestrator.toggle_voice_input().await {
                    println!("voice: {e}");
                }
            }
            "/camera" => {
                if let Err(e) = orchestrator.toggle_camera().await {
                    println!("camera: {e}");
                }
            }
            "/stop" => orchestrator.cancel_speech().await,
            "/clear" => orchestrator.clear().await,
            text => orchestrator.send_message(text, false).await,
        }
    }
}

/// Print each finished reply (and avatar video URL) as it lands
fn spawn_reply_printer(orchestrator: &Arc<ConversationOrchestrator>) {
    let mut snapshots = orchestrator.subscribe();
    let mut assets = orchestrator.asset_url();

    tokio::spawn(async move {
        let mut was_generating = false;
        loop {
            tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    let snapshot = snapshots.borrow_and_update().clone();
                    if was_generating && !snapshot.is_generating {
                        if let Some(reply) = snapshot
                            .messages
                            .iter()
                            .rev()
                            .find(|m| m.role == Role::Assistant)
                        {
                            println!("\n{}\n", reply.content);
                        }
                    }
                    was_generating = snapshot.is_generating;
                }
                changed = assets.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if let Some(url) = assets.borrow_and_update().clone() {
                        println!("[avatar video] {url}");
                    }
                }
            }
        }
    });
}

async fn cmd_list(store: &dyn ConversationStore, user_id: &str) -> anyhow::Result<()> {
    let records = store.list(user_id).await?;
    if records.is_empty() {
        println!("No saved conversations for {user_id}");
        return Ok(());
    }

    for record in records {
        println!(
            "{}  {}  ({} messages, updated {})",
            record.id,
            record.name,
            record.messages.len(),
            record.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

async fn cmd_delete(store: &dyn ConversationStore, user_id: &str, id: &str) -> anyhow::Result<()> {
    store.delete(user_id, id).await?;
    println!("Deleted conversation {id}");
    Ok(())
}
