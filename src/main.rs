use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use log::{LevelFilter, info, warn};
use serde_json::Value;
use std::sync::Arc;

use chatwire::wire::actions;
use chatwire::{ChatClient, ConnectionManager, Server, ShutdownHandle};

mod cli;
mod config;

use cli::Cli;
use cli::commands::Commands;
use config::Config;

fn env_overrides_level() -> bool {
    std::env::var_os("RUST_LOG").is_some()
}

fn setup_logging(cli: &Cli) {
    if env_overrides_level() {
        env_logger::Builder::from_default_env().init();
        return;
    }

    // Everything passes the sink; the global max level does the filtering so
    // it can still change once the config file has been read
    env_logger::Builder::new().filter_level(LevelFilter::Trace).init();
    log::set_max_level(resolve_level(cli.is_verbose(), None));
}

fn apply_config_level(cli: &Cli, config: &Config) {
    if env_overrides_level() || cli.is_verbose() {
        return;
    }
    let level = resolve_level(false, config.log_level.as_deref());
    log::set_max_level(level);
    info!("Log level set to {}", level);
}

fn resolve_level(verbose: bool, configured: Option<&str>) -> LevelFilter {
    if verbose {
        return LevelFilter::Debug;
    }
    match configured {
        None => LevelFilter::Info,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Unknown log_level {:?}, using info", raw);
            LevelFilter::Info
        }),
    }
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        None | Some(Commands::Serve) => run_server(config).await,
        Some(Commands::Ping { count }) => handle_ping_command(*count, config).await,
        Some(Commands::Call { action, params }) => handle_call_command(action, params, config).await,
        Some(Commands::Actions) => {
            handle_actions_command();
            Ok(())
        }
    }
}

async fn run_server(config: &Config) -> Result<()> {
    let registry = config.build_registry().context("Invalid stub configuration")?;
    let server = Server::bind(config.server.clone(), registry)
        .await
        .context("Failed to start server")?;
    let addr = server.local_addr()?;

    print_banner(&addr.to_string(), config);

    tokio::spawn(wait_for_signal(server.shutdown_handle()));
    server.run().await.context("Server failed")?;

    println!("{}", "Server stopped".cyan());
    Ok(())
}

fn print_banner(addr: &str, config: &Config) {
    let rule = "=".repeat(48);
    println!("{}", rule.blue());
    println!("{}", "  CHATWIRE SERVER".bold());
    println!("{}", rule.blue());
    println!("  {} {}", "Listening:".green(), addr);
    println!("  {} {}", "Max workers:".green(), config.server.max_workers);
    println!("  {} {}s", "Read timeout:".green(), config.server.read_timeout().as_secs());
    println!("  {} {}", "Stubbed actions:".green(), config.stubs.len());
    println!("{}", rule.blue());
}

async fn wait_for_signal(handle: ShutdownHandle) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = wait_for_ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                wait_for_ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        wait_for_ctrl_c().await;
    }

    println!("{}", "Shutting down...".yellow());
    handle.shutdown();
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed.
async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn handle_ping_command(count: u32, config: &Config) -> Result<()> {
    let manager = Arc::new(ConnectionManager::new(config.client.clone()));
    let client = ChatClient::new(manager.clone());

    let mut result = Ok(());
    for i in 1..=count {
        let started = std::time::Instant::now();
        match client.ping().await {
            Ok(true) => println!("{} {} ({} ms)", "PONG".green(), i, started.elapsed().as_millis()),
            Ok(false) => {
                result = Err(eyre!("Unexpected reply to PING"));
                break;
            }
            Err(e) => {
                result = Err(e).context("Ping failed");
                break;
            }
        }
    }

    manager.disconnect().await;
    result
}

async fn handle_call_command(action: &str, raw_params: &[String], config: &Config) -> Result<()> {
    let spec = actions::lookup(action).ok_or_else(|| eyre!("Unknown action: {}", action))?;
    let params = raw_params.iter().map(|raw| parse_param(raw)).collect();

    let manager = Arc::new(ConnectionManager::new(config.client.clone()));
    let client = ChatClient::new(manager.clone());
    let result = client.call(spec, params).await;
    manager.disconnect().await;

    let response = result.context(format!("{} failed", spec.name))?;
    match response.status() {
        Some(status) if response.is_success() => println!("{}", status.green()),
        Some(status) => println!("{}", status.red()),
        None => {}
    }
    for value in response.values().iter().skip(1) {
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}

fn handle_actions_command() {
    for spec in actions::ALL {
        println!("{}", spec);
    }
}

/// JSON literal if it parses, plain string otherwise.
fn parse_param(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup logging before config so fallback-file warnings are visible
    setup_logging(&cli);

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    apply_config_level(&cli, &config);

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
