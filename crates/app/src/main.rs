use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hudcast_backends::build_backend;
use hudcast_core::AppConfig;
use hudcast_server::RelayServer;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "hudcast", about = "Player backend -> state relay -> live observers")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Run,
    Status,
    Doctor,
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cmd = cli.command.unwrap_or(Commands::Run);
    let cfg_path = cli.config.unwrap_or_else(default_config_path);

    match cmd {
        Commands::Config {
            action: ConfigAction::Init,
        } => {
            init_config(&cfg_path)?;
            println!("Initialized config at {}", cfg_path.display());
            Ok(())
        }
        Commands::Status => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            status(&cfg).await
        }
        Commands::Doctor => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            doctor(&cfg).await
        }
        Commands::Run => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            run(cfg).await
        }
    }
}

async fn run(cfg: AppConfig) -> Result<()> {
    let backend = build_backend(&cfg)?;
    info!(backend = backend.name(), "hudcast started");

    let (hub, writer) = hudcast_engine::start(backend, &cfg);
    let server = RelayServer::bind(
        &cfg.listen.host,
        cfg.listen.port,
        cfg.listen.friendly_name.clone(),
        hub,
    )
    .await?;
    info!(addr = %server.local_addr()?, "observer transport listening");

    tokio::select! {
        result = server.run() => {
            if let Err(err) = result {
                error!(error = %err, "observer transport failed");
            }
        }
        _ = writer => {
            error!("state writer task ended unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c; shutting down");
        }
    }

    Ok(())
}

async fn status(cfg: &AppConfig) -> Result<()> {
    let backend = build_backend(cfg)?;
    println!("backend: {}", backend.name());

    // The mpris backend connects in a background task; give it a bounded
    // window to come up before reporting it unavailable.
    let snapshot =
        hudcast_backends::snapshot_with_retry(backend.as_ref(), Duration::from_secs(5)).await;
    match snapshot {
        Ok(snapshot) => {
            println!("state: {}", snapshot.status);
            match snapshot.metadata {
                Some(track) => {
                    println!("track: {} - {}", track.artist, track.title);
                    if let Some(album) = track.album {
                        println!("album: {album}");
                    }
                    println!(
                        "position: {}ms / {}",
                        snapshot.position_ms,
                        track
                            .duration_ms
                            .map(|d| format!("{d}ms"))
                            .unwrap_or_else(|| "unknown".to_string())
                    );
                }
                None => println!("track: <none>"),
            }
        }
        Err(err) => println!("backend unavailable: {err}"),
    }

    Ok(())
}

async fn doctor(cfg: &AppConfig) -> Result<()> {
    println!("== hudcast doctor ==");

    match tokio::net::TcpListener::bind((cfg.listen.host.as_str(), cfg.listen.port)).await {
        Ok(_) => println!(
            "listen address {}:{}: bindable",
            cfg.listen.host, cfg.listen.port
        ),
        Err(err) => println!(
            "listen address {}:{}: not bindable ({err})",
            cfg.listen.host, cfg.listen.port
        ),
    }

    match hudcast_backends::list_mpris_services().await {
        Ok(services) if services.is_empty() => {
            println!("mpris players: none visible on the session bus");
        }
        Ok(services) => {
            println!("mpris players:");
            for service in services {
                let marker = if service == cfg.mpris.service_name {
                    " (configured)"
                } else {
                    ""
                };
                println!("  {service}{marker}");
            }
        }
        Err(err) => println!("mpris players: session bus not reachable ({err})"),
    }

    Ok(())
}

fn default_config_path() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("hudcast").join("config.toml")
}

fn init_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {}", parent.display()))?;
    }
    let cfg = AppConfig::default();
    let toml = toml::to_string_pretty(&cfg)?;
    std::fs::write(path, toml)
        .with_context(|| format!("failed to write config file {}", path.display()))?;
    Ok(())
}

fn load_or_default(path: &Path) -> Result<AppConfig> {
    let mut cfg = if !path.exists() {
        AppConfig::default()
    } else {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))?
    };
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

fn init_logging(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

fn apply_env_overrides(cfg: &mut AppConfig) {
    if let Ok(v) = std::env::var("HUDCAST_BACKEND") {
        if !v.trim().is_empty() {
            cfg.backend = v;
        }
    }
    if let Ok(v) = std::env::var("HUDCAST_LOG_LEVEL") {
        if !v.trim().is_empty() {
            cfg.log_level = v;
        }
    }
    if let Ok(v) = std::env::var("HUDCAST_PORT") {
        if let Ok(port) = v.parse::<u16>() {
            cfg.listen.port = port;
        }
    }
}
