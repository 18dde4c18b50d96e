use anyhow::{Context, Result};
use clap::Parser;
use polychat::ai::{ChatClient, ChatEvent};
use polychat::chat::{Mask, SessionStore, UserInput};
use polychat::config::{AccessConfig, AppConfig, ServiceProvider};
use polychat::storage::{JsonFileStorage, SessionStorage};
use polychat::tools::ToolRegistry;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Chat with any of the supported providers from the terminal.
#[derive(Debug, Parser)]
#[command(name = "polychat", version)]
struct Args {
    /// Prompt to send. Starts an interactive session when omitted.
    prompt: Vec<String>,

    /// Service provider, e.g. openai, alibaba, baidu, tencent, deepseek.
    #[arg(short, long, default_value = "openai")]
    provider: ServiceProvider,

    #[arg(short, long)]
    model: Option<String>,

    /// Enable the built-in tools.
    #[arg(long)]
    tools: bool,

    /// Talk to provider endpoints instead of the proxy.
    #[arg(long)]
    direct: bool,

    /// Directory for saved sessions. Defaults to the local data directory.
    #[arg(long)]
    sessions_dir: Option<PathBuf>,

    /// Do not save sessions.
    #[arg(long)]
    ephemeral: bool,
}

/// Logs a `.env` that exists but cannot be loaded. Returns whether one was
/// logged; a missing file is fine since the environment may already be set.
fn report_dotenv(result: dotenvy::Result<PathBuf>) -> bool {
    match result {
        Err(err) if !err.not_found() => {
            error!(error = %err, "ignoring .env");
            true
        }
        _ => false,
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("polychat=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_event(event: &ChatEvent) {
    let mut stdout = std::io::stdout();
    match event {
        ChatEvent::TextDelta(text) => {
            let _ = write!(stdout, "{text}");
            let _ = stdout.flush();
        }
        ChatEvent::ThinkingDelta(text) => eprint!("{text}"),
        ChatEvent::ToolStarted(tool) => {
            if let Some(function) = &tool.function {
                eprintln!("\n[calling {}({})]", function.name, function.arguments);
            }
        }
        ChatEvent::Done(_) | ChatEvent::Failed(_) => {
            let _ = writeln!(stdout);
        }
        ChatEvent::ToolCallDelta(_) | ChatEvent::ToolFinished(_) => {}
    }
}

async fn send(
    store: &mut SessionStore,
    client: &ChatClient,
    registry: &ToolRegistry,
    text: String,
) -> Result<()> {
    let plugins = store.current_session().mask.plugin.clone();
    let tool_prompt = registry.system_prompt_for(&plugins).await;
    let mut reply = store.on_user_input(UserInput::text(text), tool_prompt.as_deref())?;
    reply.attach_tools(registry).await?;
    if let Err(err) = store.drive_reply(client, reply, print_event).await {
        error!(error = %err, "chat failed");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Loaded first so RUST_LOG may come from .env; reported once logging is up.
    let dotenv = dotenvy::dotenv();
    init_tracing();
    report_dotenv(dotenv);
    let args = Args::parse();

    let mut access = AccessConfig::from_env();
    access.direct |= args.direct;

    let mut app = AppConfig::default();
    app.model_config.provider_name = args.provider;
    if let Some(model) = args.model {
        app.model_config.model = model;
    }

    let registry = Arc::new(if args.tools {
        ToolRegistry::with_builtins()
    } else {
        ToolRegistry::new()
    });
    let client = ChatClient::new(access.clone()).with_tools(registry.clone());

    let mut store = if args.ephemeral {
        SessionStore::new(app.clone())
    } else {
        let storage = match args.sessions_dir {
            Some(dir) => JsonFileStorage::new(dir),
            None => JsonFileStorage::default_location(),
        };
        info!(root = %storage.root().display(), "session storage");
        let storage: Arc<dyn SessionStorage> = Arc::new(storage);
        SessionStore::with_storage(app.clone(), storage).context("loading saved sessions")?
    };
    store = store.with_extra_vision_models(access.extra_vision_models.clone());

    store.new_session(Some(Mask {
        model_config: app.model_config.clone(),
        plugin: registry.names().to_vec(),
        ..Mask::default()
    }));

    if !args.prompt.is_empty() {
        return send(&mut store, &client, &registry, args.prompt.join(" ")).await;
    }

    let stdin = std::io::stdin();
    loop {
        eprint!("> ");
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => {
                let id = store.current_session().id.clone();
                store.clear_context(&id);
                eprintln!("context cleared");
            }
            "/title" => {
                let id = store.current_session().id.clone();
                store.summarize(&id, &client, true).await;
                eprintln!("{}", store.current_session().topic);
            }
            text => send(&mut store, &client, &registry, text.to_string()).await?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unreadable_env_files_are_reported() {
        let missing = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(!report_dotenv(Err(dotenvy::Error::Io(missing))));
        assert!(!report_dotenv(Ok(PathBuf::from(".env"))));
        let malformed = dotenvy::Error::LineParse("KEY VALUE".to_string(), 4);
        assert!(report_dotenv(Err(malformed)));
    }
}
