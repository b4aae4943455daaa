use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use respguard::cli::{Cli, Commands};
use respguard::config::reload::{start_file_watcher, start_sighup_handler};
use respguard::config::{bind_address, AppConfig};
use respguard::pipeline::ResponsePipeline;
use respguard::relay::RelayServer;
use respguard::scheduler::StatsSnapshot;
use respguard::sink::{ConsoleSink, FindingSink, JsonSink};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("respguard=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Listen { addr, threads } => {
            cmd_listen(&cli.config, addr, threads).await?;
        }
        Commands::Scan {
            files,
            locator,
            json,
        } => {
            cmd_scan(&cli.config, &files, locator.as_deref(), json).await?;
        }
        Commands::Rules => {
            cmd_rules(&cli.config);
        }
        Commands::Init => {
            cmd_init(&cli.config)?;
        }
    }

    Ok(())
}

fn console_sink() -> Arc<dyn FindingSink> {
    Arc::new(ConsoleSink::new(std::io::stdout().is_terminal()))
}

fn print_stats(stats: &StatsSnapshot) {
    println!("Scan summary");
    println!("────────────");
    println!("Responses seen:  {}", stats.submitted);
    println!("  Duplicates:    {}", stats.duplicates);
    println!("  Dropped (busy): {}", stats.dropped);
    println!("  Admitted:      {}", stats.admitted);
    println!("    Skipped:     {}", stats.skipped);
    println!("    Scanned:     {}", stats.scanned);
    println!("Findings:        {}", stats.findings);
}

async fn cmd_listen(
    config_path: &Path,
    addr: Option<String>,
    threads: Option<usize>,
) -> anyhow::Result<()> {
    let mut config = AppConfig::load_or_default(config_path);
    if let Some(threads) = threads {
        config.server.thread_count = threads;
    }
    let listen = bind_address(addr.as_deref().unwrap_or(&config.server.listen));

    let pipeline = Arc::new(ResponsePipeline::from_config(&config, console_sink())?);
    println!("respguard starting...");
    println!("Config: {}", config_path.display());
    println!("Scan workers: {}", pipeline.scheduler().capacity());
    println!("Rules loaded: {}", pipeline.rules().snapshot().len());

    // Held for the lifetime of the relay; dropping it stops the watch.
    let _watcher = if config_path.exists() {
        match start_file_watcher(config_path.to_path_buf(), pipeline.rules().clone()) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("Config hot reload disabled: {}", e);
                None
            }
        }
    } else {
        None
    };
    start_sighup_handler(config_path.to_path_buf(), pipeline.rules().clone());

    let server = RelayServer::new(listen, pipeline.clone())
        .with_idle_timeout(config.idle_timeout())
        .with_capture_limit(config.capture_limit());
    let addr = server.start().await?;
    println!("Relay running on {}", addr);
    println!("Set HTTP_PROXY=http://{} to route traffic through respguard", addr);

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");
    print_stats(&pipeline.stats());
    Ok(())
}

async fn cmd_scan(
    config_path: &Path,
    files: &[PathBuf],
    locator: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let config = AppConfig::load_or_default(config_path);
    let sink: Arc<dyn FindingSink> = if json {
        Arc::new(JsonSink)
    } else {
        console_sink()
    };
    let pipeline = ResponsePipeline::from_config(&config, sink)?;
    let scheduler = pipeline.scheduler();

    for path in files {
        let body = match std::fs::read(path) {
            Ok(body) => body,
            Err(e) => {
                warn!("Cannot read {}: {}", path.display(), e);
                continue;
            }
        };
        let file_locator = match locator {
            Some(l) => l.to_string(),
            None => format!("file://{}", path.display()),
        };
        // Batch scans should not lose files to the busy-drop policy.
        if scheduler.in_flight() >= scheduler.capacity() {
            pipeline.wait_idle().await;
        }
        pipeline.submit(&body, &file_locator);
    }

    pipeline.wait_idle().await;
    if !json {
        print_stats(&pipeline.stats());
    }
    Ok(())
}

fn cmd_rules(config_path: &Path) {
    let config = AppConfig::load_or_default(config_path);
    let rules = config.rule_set();
    println!("Active rules ({})", rules.len());
    println!("{:<28} {:<8} {:<8} PATTERN", "NAME", "LEVEL", "ENABLED");
    println!("{}", "─".repeat(80));
    for rule in rules.iter() {
        println!(
            "{:<28} {:<8} {:<8} {}",
            rule.name,
            rule.severity.as_str(),
            if rule.enabled { "yes" } else { "no" },
            rule.matcher.as_str()
        );
    }
}

fn cmd_init(config_path: &Path) -> anyhow::Result<()> {
    if config_path.exists() {
        println!("Config already exists: {}", config_path.display());
        return Ok(());
    }
    std::fs::write(config_path, include_str!("../templates/respguard.toml"))?;
    println!("Created config: {}", config_path.display());
    println!("\nNext steps:");
    println!("  1. Review the filters in {}", config_path.display());
    println!("  2. Start the relay:  respguard listen");
    println!("  3. Set env variable: HTTP_PROXY=http://127.0.0.1:8081");
    Ok(())
}
