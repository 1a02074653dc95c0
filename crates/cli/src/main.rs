use clap::{Parser, Subcommand};
use lib::config::{SettingsPatch, SettingsStore, Theme};
use lib::gateway::GatewayClient;
use lib::session::{ChatSession, SessionUpdate};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::future::Future;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "clawface")]
#[command(about = "Clawface CLI", long_about = None)]
struct Cli {
    /// Settings file path (default: CLAWFACE_SETTINGS_PATH or ~/.clawface/settings.json)
    #[arg(long, short, global = true, value_name = "PATH")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Check that the configured gateway answers like the API (not a login page).
    Check,

    /// List the models advertised by the gateway.
    Models,

    /// Show or change settings.
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Chat with the gateway (interactive). `/clear` empties the conversation, `/exit`,
    /// Ctrl-D or Ctrl-C at the prompt quits, Ctrl-C during a reply stops it.
    Chat,
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print the current settings (token masked).
    Show,

    /// Update one or more settings and save them.
    Set {
        #[arg(long, value_name = "URL")]
        gateway_url: Option<String>,
        #[arg(long)]
        model: Option<String>,
        /// Agent routing hint; pass an empty string to clear.
        #[arg(long)]
        agent_id: Option<String>,
        /// Bearer token; pass an empty string to clear.
        #[arg(long)]
        token: Option<String>,
        /// system, light or dark
        #[arg(long)]
        theme: Option<Theme>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("clawface {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Check) => run_check(cli.settings).await,
        Some(Commands::Models) => run_models(cli.settings).await,
        Some(Commands::Settings { action }) => run_settings(cli.settings, action),
        Some(Commands::Chat) => run_chat(cli.settings).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };
    if let Err(e) = result {
        log::error!("{:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run_check(settings_path: Option<PathBuf>) -> anyhow::Result<()> {
    let store = SettingsStore::open(settings_path)?;
    let config = store.get().session_config();
    let base = config.base_url();
    let token = config.auth_token.unwrap_or_default();
    if GatewayClient::new().check_connection(&base, &token).await {
        println!("gateway reachable at {}", base);
        Ok(())
    } else {
        anyhow::bail!("gateway not reachable at {}", base)
    }
}

async fn run_models(settings_path: Option<PathBuf>) -> anyhow::Result<()> {
    let store = SettingsStore::open(settings_path)?;
    let config = store.get().session_config();
    let models = GatewayClient::new().list_models(&config).await?;
    if models.is_empty() {
        println!("no models advertised by {}", config.base_url());
    }
    for m in models {
        println!("{}", m.id);
    }
    Ok(())
}

fn run_settings(settings_path: Option<PathBuf>, action: SettingsAction) -> anyhow::Result<()> {
    let store = SettingsStore::open(settings_path)?;
    match action {
        SettingsAction::Show => {
            let s = store.get();
            if let Some(path) = store.path() {
                println!("file:        {}", path.display());
            }
            println!("gateway url: {}", s.gateway_url);
            println!("model:       {}", s.model);
            println!("agent id:    {}", s.agent_id);
            println!("token:       {}", if s.token.is_empty() { "(none)" } else { "********" });
            println!("theme:       {}", s.theme.as_str());
        }
        SettingsAction::Set {
            gateway_url,
            model,
            agent_id,
            token,
            theme,
        } => {
            let patch = SettingsPatch {
                gateway_url,
                model,
                agent_id,
                token,
                theme,
            };
            if patch.is_empty() {
                anyhow::bail!("nothing to set; see `clawface settings set --help`");
            }
            store.update(patch)?;
            println!("settings saved");
        }
    }
    Ok(())
}

/// Next prompt line, or `None` on end of input or when `interrupt` fires first.
/// Ctrl-C has to be handled here: after the first `ctrl_c()` listener SIGINT no
/// longer terminates the process.
async fn next_input<R: AsyncBufRead + Unpin>(
    lines: &mut Lines<R>,
    interrupt: impl Future<Output = std::io::Result<()>>,
) -> std::io::Result<Option<String>> {
    tokio::select! {
        line = lines.next_line() => line,
        _ = interrupt => Ok(None),
    }
}

async fn run_chat(settings_path: Option<PathBuf>) -> anyhow::Result<()> {
    let store = Arc::new(SettingsStore::open(settings_path)?);
    let session = ChatSession::new(GatewayClient::new(), store);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let Some(line) = next_input(&mut lines, tokio::signal::ctrl_c()).await? else {
            writeln!(stdout)?;
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }
        if input.eq_ignore_ascii_case("/clear") {
            session.clear_messages();
            println!("(conversation cleared)");
            continue;
        }

        let mut updates = session.subscribe();
        let Some(handle) = session.send_message(input) else {
            continue;
        };
        write!(stdout, "< ")?;
        stdout.flush()?;
        loop {
            tokio::select! {
                update = updates.recv() => match update {
                    Ok(SessionUpdate::Delta { text, .. }) => {
                        write!(stdout, "{}", text)?;
                        stdout.flush()?;
                    }
                    Ok(SessionUpdate::Failed(message)) => {
                        eprintln!("chat error: {}", message);
                        break;
                    }
                    Ok(SessionUpdate::Finished | SessionUpdate::Stopped | SessionUpdate::Cleared) => break,
                    Ok(SessionUpdate::Started { .. }) => {}
                    Err(RecvError::Lagged(n)) => log::warn!("missed {} session updates", n),
                    Err(RecvError::Closed) => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    session.stop_generation();
                    write!(stdout, " [stopped]")?;
                    break;
                }
            }
        }
        writeln!(stdout)?;
        let _ = handle.await;
    }

    Ok(())
}
