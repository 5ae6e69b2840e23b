use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use mimir_chat::SessionError;
use mimir_chat::chat::{
    ChatMessage, ChatSession, ChatSnapshot, DeliveryStatus, Role, SessionEvent, ThreadParams,
};
use mimir_chat::settings::{ClientSettings, SettingsError, SettingsStore};
use mimir_remote::{SessionCollaborator, create_collaborator};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "mimir-chat", about = "Terminal client for accelerator chat threads")]
struct Cli {
    /// Settings file; defaults to `<config dir>/mimir/settings.json`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Open an existing thread and chat in it.
    Chat {
        #[arg(long)]
        thread_id: Option<String>,
        #[arg(long)]
        accelerator_id: Option<String>,
    },
    /// List the threads of the configured instance.
    Threads,
    /// Start a thread for an accelerator and open it.
    New {
        #[arg(long)]
        accelerator_id: String,
    },
    /// Save connection settings. The password is only read from the environment.
    Configure {
        #[arg(long)]
        endpoint: Option<String>,
        #[arg(long)]
        instance_id: Option<String>,
        #[arg(long)]
        username: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Chat output owns stdout; diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = match cli.config {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::load(),
    };

    let settings = store.settings();

    match cli.command {
        Command::Configure {
            endpoint,
            instance_id,
            username,
        } => match configure(&store, endpoint, instance_id, username) {
            Ok(path) => {
                println!("saved settings to {}", path.display());
                ExitCode::SUCCESS
            }
            Err(error) => {
                tracing::error!(error = %error, "failed to save settings");
                ExitCode::FAILURE
            }
        },
        Command::Chat {
            thread_id,
            accelerator_id,
        } => {
            let Some(params) =
                ThreadParams::from_navigation(thread_id.as_deref(), accelerator_id.as_deref())
            else {
                tracing::error!("both --thread-id and --accelerator-id are required");
                return ExitCode::FAILURE;
            };
            let Some(collaborator) = open_collaborator(&settings) else {
                return ExitCode::FAILURE;
            };
            run_chat(collaborator, params, &settings).await
        }
        Command::Threads => {
            let Some(collaborator) = open_collaborator(&settings) else {
                return ExitCode::FAILURE;
            };
            list_threads(collaborator.as_ref()).await
        }
        Command::New { accelerator_id } => {
            let Some(collaborator) = open_collaborator(&settings) else {
                return ExitCode::FAILURE;
            };
            let thread_id = match collaborator.create_thread(&accelerator_id).await {
                Ok(thread_id) => thread_id,
                Err(error) => {
                    tracing::error!(error = %error, "failed to create thread");
                    return ExitCode::FAILURE;
                }
            };
            println!("created thread {thread_id}");

            let Some(params) =
                ThreadParams::from_navigation(Some(&thread_id), Some(&accelerator_id))
            else {
                tracing::error!("backend returned an empty thread id");
                return ExitCode::FAILURE;
            };
            run_chat(collaborator, params, &settings).await
        }
    }
}

fn configure(
    store: &SettingsStore,
    endpoint: Option<String>,
    instance_id: Option<String>,
    username: Option<String>,
) -> Result<PathBuf, SettingsError> {
    let mut settings = ClientSettings::clone(&store.settings());
    if let Some(endpoint) = endpoint {
        settings.endpoint = endpoint;
    }
    if let Some(instance_id) = instance_id {
        settings.instance_id = instance_id;
    }
    if let Some(username) = username {
        settings.username = username;
    }

    store.update(settings)?;
    Ok(store.config_path().to_path_buf())
}

fn open_collaborator(settings: &ClientSettings) -> Option<Arc<dyn SessionCollaborator>> {
    let Some(config) = settings.to_remote_config() else {
        tracing::error!("instance_id is not configured; run `mimir-chat configure --instance-id ..`");
        return None;
    };

    match create_collaborator(config) {
        Ok(collaborator) => Some(collaborator),
        Err(error) => {
            tracing::error!(error = %error, "failed to initialize chat client");
            None
        }
    }
}

async fn list_threads(collaborator: &dyn SessionCollaborator) -> ExitCode {
    match collaborator.list_threads().await {
        Ok(threads) => {
            for thread in threads {
                let marker = if thread.is_active { '*' } else { ' ' };
                println!(
                    "{marker} {}  {}  (accelerator {})",
                    thread.thread_id, thread.title, thread.accelerator_id
                );
            }
            ExitCode::SUCCESS
        }
        Err(error) => {
            tracing::error!(error = %error, "failed to list threads");
            ExitCode::FAILURE
        }
    }
}

async fn run_chat(
    collaborator: Arc<dyn SessionCollaborator>,
    params: ThreadParams,
    settings: &ClientSettings,
) -> ExitCode {
    let mut session =
        match ChatSession::mount(collaborator, params, settings.poll.to_policy()).await {
            Ok(session) => session,
            Err(error) => {
                tracing::error!(error = %error, "could not load thread");
                return ExitCode::FAILURE;
            }
        };

    let mut transcript = Transcript::default();
    let snapshot = session.snapshot();
    println!("== {} ==", snapshot.thread.title);
    print_lines(transcript.delivered_lines(&snapshot));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let input_enabled = session.snapshot().input_enabled();
        let polling = session.has_active_poll();

        tokio::select! {
            line = lines.next_line(), if input_enabled => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(error) => {
                        tracing::error!(error = %error, "failed to read input");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                let result = session.submit(&line).await;
                let snapshot = session.snapshot();
                match result {
                    Ok(_) => {
                        print_lines(transcript.delivered_lines(&snapshot));
                        if !snapshot.input_enabled() {
                            eprintln!("... waiting for the agent to respond");
                        }
                    }
                    Err(error @ SessionError::Send { .. }) => {
                        print_lines(Transcript::failed_line(&snapshot));
                        eprintln!("! {error}");
                    }
                    Err(error) => eprintln!("! {error}"),
                }
            }
            event = session.next_event(), if polling => {
                let Some(event) = event else {
                    continue;
                };
                match event {
                    SessionEvent::ReplyReceived { .. } => {
                        print_lines(transcript.delivered_lines(&session.snapshot()));
                    }
                    SessionEvent::TimedOut { waited, .. } => {
                        eprintln!("! no reply after {}s; you can send again", waited.as_secs());
                    }
                    SessionEvent::StillWaiting { .. } | SessionEvent::TickFailed { .. } => {}
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.teardown();
    ExitCode::SUCCESS
}

/// Tracks how much of the backend-held conversation has been printed.
///
/// Failed sends are printed once, when they fail, and never counted: a reply
/// replaces the local thread with the backend's, which does not hold them.
#[derive(Debug, Default)]
struct Transcript {
    delivered: usize,
}

impl Transcript {
    fn delivered_lines(&mut self, snapshot: &ChatSnapshot) -> Vec<String> {
        let lines: Vec<String> = snapshot
            .thread
            .messages
            .iter()
            .filter(|message| !matches!(message.status, DeliveryStatus::Failed(_)))
            .skip(self.delivered)
            .map(format_message)
            .collect();
        self.delivered += lines.len();
        lines
    }

    fn failed_line(snapshot: &ChatSnapshot) -> Option<String> {
        let message = snapshot.thread.last_message()?;
        match &message.status {
            DeliveryStatus::Failed(reason) => Some(format!(
                "{}  [not delivered: {reason}]",
                format_message(message)
            )),
            DeliveryStatus::Pending | DeliveryStatus::Sent | DeliveryStatus::Confirmed => None,
        }
    }
}

fn format_message(message: &ChatMessage) -> String {
    let speaker = match message.role {
        Role::User => "you",
        Role::Assistant => "agent",
    };
    format!("{speaker}> {}", message.content)
}

fn print_lines(lines: impl IntoIterator<Item = String>) {
    for line in lines {
        println!("{line}");
    }
}
