mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use match_recognizer::error::{BatchError, UpstreamError};
use match_recognizer::models::{BatchStatus, ManualDecision, RecognizerConfig};
use match_recognizer::services::ocr::HttpOcrClient;
use match_recognizer::services::{
    ConfigManager, HttpPlayerDirectory, JsonLinesSink, PlayerDirectory, RecognitionService, RequestCache,
    RowWorker, StaticPlayerDirectory,
};
use match_recognizer::CancelToken;

/// Name source picked from the command line
enum Directory {
    Static(StaticPlayerDirectory),
    Http(HttpPlayerDirectory),
}

impl PlayerDirectory for Directory {
    async fn display_name(&self, owner_uid: &str) -> Result<String, UpstreamError> {
        match self {
            Self::Static(directory) => directory.display_name(owner_uid).await,
            Self::Http(directory) => directory.display_name(owner_uid).await,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    init_logging(cli.json_logs);

    let manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new().context("no config directory on this platform")?,
    };

    match cli.command {
        cli::Command::InitConfig { force } => {
            if manager.config_exists() && !force {
                bail!(
                    "{} already exists, pass --force to replace it",
                    manager.config_file_path().display()
                );
            }
            manager.save(&RecognizerConfig::default())?;
            info!(path = %manager.config_file_path().display(), "Default config written");
            Ok(())
        }
        cli::Command::Scan {
            files,
            owner,
            name,
            directory_url,
            ocr_url,
            output,
            no_prompt,
        } => {
            let mut config = manager
                .load()
                .with_context(|| format!("failed to load {}", manager.config_file_path().display()))?;
            if let Some(url) = ocr_url {
                config.ocr.endpoint = url;
            }
            if let Some(url) = directory_url {
                config.directory.base_url = Some(url);
            }

            let files: Vec<&Path> = files.iter().map(|p| p.as_path()).collect();
            scan(config, &files, &owner, name, &output, !no_prompt).await
        }
    }
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn scan(
    config: RecognizerConfig,
    files: &[&Path],
    owner_uid: &str,
    name: Option<String>,
    output: &Path,
    prompt: bool,
) -> Result<()> {
    let recognizer = HttpOcrClient::new(&config.ocr)?;
    if let Err(e) = recognizer.health_check().await {
        warn!(endpoint = recognizer.base_url(), error = %e, "OCR server not healthy, attempts will fail");
    }

    let directory = match &config.directory.base_url {
        Some(url) => Directory::Http(HttpPlayerDirectory::new(url, &config.directory)?),
        None => Directory::Static(
            StaticPlayerDirectory::new().with_player(owner_uid, name.unwrap_or_else(|| owner_uid.to_string())),
        ),
    };

    let worker = RowWorker::spawn(config.localizer.clone(), &config.worker)?;
    let sink = JsonLinesSink::open(output)
        .with_context(|| format!("failed to open {}", output.display()))?;
    info!(path = %sink.path().display(), "Writing observations");

    let names = Arc::new(RequestCache::new(config.cache.clone()));
    let service = RecognitionService::new(
        config,
        Arc::new(recognizer),
        Arc::new(worker),
        Arc::new(directory),
        names,
        Arc::new(sink),
    );

    for file in files {
        let bytes = std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
        let label = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.display().to_string());
        service.enqueue(label, bytes);
    }

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current step");
            on_interrupt.cancel();
        }
    });

    match service.process_all(owner_uid, &cancel).await {
        Ok(statuses) => info!(processed = statuses.len(), "Batch processed"),
        Err(BatchError::Aborted) => warn!("Batch aborted"),
        Err(e) => return Err(e.into()),
    }

    if prompt && !cancel.is_cancelled() {
        resolve_pending(&service).await?;
    }

    let items = service.items();
    let done = items.iter().filter(|item| item.status == BatchStatus::Done).count();
    info!(total = items.len(), done, "Scan complete");
    println!("{}", serde_json::to_string_pretty(&items)?);
    Ok(())
}

/// Ask on stdin for every item whose banner could not be read
async fn resolve_pending(service: &RecognitionService<HttpOcrClient, Directory>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(item) = service.pending_manual() {
        eprint!("{}: result unreadable, [v]ictory / [d]efeat / [s]kip? ", item.file_label);

        let Some(line) = lines.next_line().await? else {
            warn!("stdin closed, leaving remaining items unresolved");
            break;
        };

        match line.parse::<ManualDecision>() {
            Ok(decision) => {
                service.resolve_manually(item.id, decision)?;
            }
            Err(e) => eprintln!("{}", e),
        }
    }
    Ok(())
}
