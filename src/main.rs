mod cli;
mod ui;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use polyglot::worker::{SimulatedWorker, WorkerBehavior};
use polyglot::{
    DispatchConfig, DispatchService, LoggingSink, MemoryTransport, TcpTransport,
    TranslationRequest,
};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = DispatchConfig::load()?;
    if let Some(max_retries) = cli.max_retries {
        config.max_retries = max_retries;
    }

    match cli.command {
        Command::Demo => run_demo(&config).await,
        Command::Worker { listen } => {
            let addr = listen.unwrap_or_else(|| config.worker_addr.clone());
            run_worker(&addr).await
        }
        Command::Translate {
            text,
            from,
            to,
            worker,
        } => {
            if let Some(addr) = worker {
                config.worker_addr = addr;
            }
            run_translate(&config, text, from, to).await
        }
    }
}

// Logs go to stderr so translated output on stdout stays clean.
fn init_tracing(verbose: bool) {
    let default = if verbose { "polyglot=debug" } else { "polyglot=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_demo(config: &DispatchConfig) -> Result<ExitCode> {
    let (transport, inbound, endpoint) = MemoryTransport::channel(config.channel_capacity);
    let worker = SimulatedWorker::new(WorkerBehavior {
        duplicate_events: true,
        fatal_languages: vec!["xx".into()],
        flaky_languages: vec!["fr".into()],
        ..Default::default()
    });
    tokio::spawn(worker.serve_endpoint(endpoint));

    let service = DispatchService::start(config, transport, inbound, Arc::new(LoggingSink))?;
    let dispatcher = service.dispatcher();

    let requests = [
        TranslationRequest::new("Hello, world", "en", ["es", "fr", "de"]),
        TranslationRequest::new("Good morning", "en", ["es", "xx"]),
        TranslationRequest::new("See you soon", "en", ["pt", "pt"]),
    ];

    let mut handles = Vec::new();
    for request in requests {
        println!(
            "▸ {:?} {} → {}",
            request.text,
            request.source_language,
            request.target_languages.join(", ")
        );
        match dispatcher.submit(request) {
            Ok(handle) => handles.push(handle),
            Err(e) => println!("  rejected: {e} ({})", e.kind()),
        }
    }

    for handle in handles {
        println!("▸ {}", handle.correlation_id());
        ui::report(&handle.wait().await);
    }

    let stats = service.shutdown().await;
    ui::print_stats(&stats);
    Ok(ExitCode::SUCCESS)
}

async fn run_worker(addr: &str) -> Result<ExitCode> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    SimulatedWorker::default().serve_tcp(listener).await?;
    Ok(ExitCode::SUCCESS)
}

async fn run_translate(
    config: &DispatchConfig,
    text: String,
    from: String,
    to: Vec<String>,
) -> Result<ExitCode> {
    let (transport, inbound) = TcpTransport::connect(&config.worker_addr, config.channel_capacity)
        .await
        .with_context(|| format!("failed to connect to worker at {}", config.worker_addr))?;
    let service = DispatchService::start(config, transport, inbound, Arc::new(LoggingSink))?;

    let handle = service
        .dispatcher()
        .submit(TranslationRequest::new(text, from, to.clone()))?;
    let progress = ui::JobProgress::start(&handle.correlation_id(), &to);
    let outcome = handle.wait().await;
    progress.complete(&outcome);

    service.shutdown().await;
    Ok(if outcome.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
