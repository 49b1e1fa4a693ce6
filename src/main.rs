mod agent;
mod api;
mod config;
mod life;
mod llm;
mod scheduler;
mod session;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::signal;
use tokio::sync::RwLock;

#[derive(Parser)]
#[command(
    name = "higoto",
    version,
    about = "AI companion with a living daily routine"
)]
struct Cli {
    #[arg(short, long, default_value = "~/.higoto/config.toml")]
    config: String,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    Run,
    Init,
    /// Print today's stored daily state without generating anything
    Status,
    /// Chat with higoto via the running API server
    Chat {
        /// Message to send (omit for interactive mode)
        message: Option<String>,
        /// API server URL
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        url: String,
        /// Auth token (or HIGOTO_AUTH_TOKEN env)
        #[arg(long, env = "HIGOTO_AUTH_TOKEN")]
        token: Option<String>,
        /// Conversation source id
        #[arg(long, default_value = "cli:default")]
        source: String,
    },
    /// Inspect or manage the daily life schedule on a running server
    Life {
        #[command(subcommand)]
        action: LifeAction,
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        url: String,
        #[arg(long, env = "HIGOTO_AUTH_TOKEN")]
        token: Option<String>,
    },
}

#[derive(Subcommand)]
enum LifeAction {
    /// Show today's schedule, generating it first if needed
    Show,
    /// Regenerate today's schedule, optionally honoring a request
    Regenerate { supplement: Option<String> },
    /// Set the daily generation time (HH:MM)
    Time { time: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Init => {
            config::init_config_dir().await?;
            tracing::info!("Initialized ~/.higoto/");
        }
        Commands::Run => run(&cli.config).await?,
        Commands::Status => {
            let cfg = config::load(&cli.config)?;
            let store =
                life::store::DailyStore::new(cfg.storage.base_dir.join("daily_state.json"));
            match store.get(chrono::Local::now().date_naive()) {
                Some(state) => println!("{}", agent::format_state(&state)),
                None => println!("(no daily state for today yet)"),
            }
        }
        Commands::Chat {
            message,
            url,
            token,
            source,
        } => chat(&url, token.as_deref(), &source, message.as_deref()).await?,
        Commands::Life { action, url, token } => {
            life_client(&url, token.as_deref(), &action).await?
        }
    }
    Ok(())
}

async fn run(config_path: &str) -> Result<()> {
    let cfg = config::load(config_path)?;
    let resolved_path = config::resolve_path(config_path);
    let base_dir = cfg.storage.base_dir.clone();
    let name = cfg.agent.name.clone();
    let bind = cfg.api.bind.clone();
    let api_key = cfg.api.api_key.clone();

    if api_key.is_none() {
        if is_localhost(&bind) {
            tracing::warn!("API authentication disabled (localhost-only)");
        } else {
            anyhow::bail!(
                "API authentication required for non-localhost binding '{bind}'. Set [api] api_key."
            );
        }
    }

    let llm = llm::create_client(&cfg.llm);
    let sessions = Arc::new(session::SessionStore::new(base_dir.clone())?);
    let store = life::store::DailyStore::new(base_dir.join("daily_state.json"));
    let config = Arc::new(RwLock::new(cfg));
    let life = Arc::new(life::LifeManager::new(
        config.clone(),
        resolved_path,
        store,
        sessions.clone(),
        llm.clone(),
    ));

    let timer = Arc::new(scheduler::DailyTimer::new(life.clone()).await?);
    timer.start().await?;

    let agent = Arc::new(agent::Agent::new(
        llm,
        life.clone(),
        timer.clone(),
        sessions,
        config,
    ));

    let state = api::AppState {
        agent,
        life,
        timer,
        name: name.clone(),
        api_key,
    };
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!("{name} listening on {bind}");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async {
            signal::ctrl_c().await.ok();
        })
        .await?;
    Ok(())
}

async fn chat(url: &str, token: Option<&str>, source: &str, message: Option<&str>) -> Result<()> {
    let client = reqwest::Client::new();
    if let Some(msg) = message {
        println!("{}", send_message(&client, url, token, source, msg).await?);
        return Ok(());
    }
    // Interactive REPL
    let stdin = std::io::stdin();
    loop {
        eprint!("higoto> ");
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }
        match send_message(&client, url, token, source, line).await {
            Ok(text) => println!("\n{text}\n"),
            Err(e) => eprintln!("Error: {e}"),
        }
    }
    Ok(())
}

async fn send_message(
    client: &reqwest::Client,
    url: &str,
    token: Option<&str>,
    source: &str,
    text: &str,
) -> Result<String> {
    let mut req = client
        .post(format!("{url}/message"))
        .json(&serde_json::json!({"text": text, "source": source}));
    if let Some(t) = token {
        req = req.header("Authorization", format!("Bearer {t}"));
    }
    let resp = req.send().await?;
    if !resp.status().is_success() {
        anyhow::bail!("API error: {} {}", resp.status(), resp.text().await?);
    }
    let body: Value = resp.json().await?;
    Ok(body["text"].as_str().unwrap_or("(no response)").to_string())
}

async fn life_client(url: &str, token: Option<&str>, action: &LifeAction) -> Result<()> {
    let client = reqwest::Client::new();
    let req = match action {
        LifeAction::Show => client.get(format!("{url}/life")),
        LifeAction::Regenerate { supplement } => client
            .post(format!("{url}/life/regenerate"))
            .json(&serde_json::json!({"supplement": supplement})),
        LifeAction::Time { time } => client
            .post(format!("{url}/life/time"))
            .json(&serde_json::json!({"time": time})),
    };
    let req = match token {
        Some(t) => req.header("Authorization", format!("Bearer {t}")),
        None => req,
    };
    let resp = req.send().await?;
    if !resp.status().is_success() {
        anyhow::bail!("API error: {} {}", resp.status(), resp.text().await?);
    }
    let body: Value = resp.json().await?;
    match action {
        LifeAction::Time { .. } => {
            println!(
                "Daily schedule time updated to {}.",
                body["schedule_time"].as_str().unwrap_or("?")
            );
        }
        _ => {
            println!(
                "📅 {}  [day {}]",
                body["date"].as_str().unwrap_or("?"),
                body["day_progress"].as_str().unwrap_or("?"),
            );
            println!("👗 Outfit: {}", body["outfit"].as_str().unwrap_or(""));
            println!("📝 Today's plan:\n{}", body["schedule"].as_str().unwrap_or(""));
        }
    }
    Ok(())
}

fn is_localhost(bind: &str) -> bool {
    use std::net::IpAddr;

    let host = if let Some(inner) = bind.strip_prefix('[')
        && let Some(bracket_end) = inner.find(']')
    {
        &inner[..bracket_end]
    } else if let Some(colon) = bind.rfind(':') {
        &bind[..colon]
    } else {
        bind
    };

    if host == "localhost" {
        return true;
    }
    host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}
