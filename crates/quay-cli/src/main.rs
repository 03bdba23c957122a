//! quay - JSON 行のリクエストでキューサービスを動かす
//!
//! - 入力 1 行: `{"method": "POST", "path": "/queues", "body": {...}}`
//! - 出力 1 行: `{"status": 201, "body": {...}}`

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use quay_core::app::{ApiRequest, ApiResponse, QueueService, ServiceConfig, dispatch};
use quay_core::impls::{InMemoryQueueDirectory, InMemoryStoreFactory, RedbStoreFactory};
use quay_core::ports::{StoreFactory, SystemClock};

const DATABASE_FILE: &str = "quay.redb";

#[derive(Parser, Debug)]
#[command(name = "quay", version, about = "Message queues with visibility timeouts")]
struct Args {
    /// JSON configuration file.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Keep queues in this directory instead of in memory.
    #[arg(long = "data-dir", value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Read requests from this file instead of stdin.
    #[arg(value_name = "SCRIPT")]
    script: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    quay_core::telemetry::init_tracing();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServiceConfig::load(path).await?,
        None => ServiceConfig::default(),
    };
    if args.data_dir.is_some() {
        config.data_dir = args.data_dir.clone();
    }

    let stores: Arc<dyn StoreFactory> = match &config.data_dir {
        Some(dir) => Arc::new(RedbStoreFactory::create(dir.join(DATABASE_FILE))?),
        None => Arc::new(InMemoryStoreFactory::new()),
    };
    let service = QueueService::new(
        config,
        Arc::new(InMemoryQueueDirectory::new()),
        stores,
        Arc::new(SystemClock),
    );
    service.restore().await?;

    match &args.script {
        Some(path) => run(&service, tokio::fs::File::open(path).await?).await?,
        None => run(&service, tokio::io::stdin()).await?,
    }

    info!("input exhausted, shutting down");
    Ok(())
}

async fn run(service: &QueueService, input: impl AsyncRead + Unpin) -> std::io::Result<()> {
    let mut lines = BufReader::new(input).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let response = match serde_json::from_str::<ApiRequest>(line) {
            Ok(request) => dispatch(service, request).await,
            Err(err) => {
                warn!(error = %err, "unparsable request line");
                ApiResponse {
                    status: 400,
                    body: serde_json::json!({ "error": format!("malformed request: {err}") }),
                }
            }
        };

        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }
    Ok(())
}
