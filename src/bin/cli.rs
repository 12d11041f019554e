//! CLI for talking to a chunkmesh node

use anyhow::Context;
use chunkmesh::common::{format_bytes, retry_with_backoff};
use chunkmesh::rpc::NodeInfo;
use chunkmesh::store::FileDocument;
use chunkmesh::{Error, UploadReceipt};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "chunkmesh")]
#[command(about = "chunkmesh peer-replicated file store CLI")]
#[command(version)]
struct Cli {
    /// Node URL
    #[arg(long, default_value = "http://localhost:3000")]
    node: String,

    /// Attempts for retryable failures
    #[arg(long, default_value = "5")]
    retries: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file
    Upload {
        /// File path
        file: PathBuf,

        /// Stored name (defaults to the file name)
        #[arg(long)]
        name: Option<String>,

        /// Content type
        #[arg(long, default_value = "application/octet-stream")]
        content_type: String,
    },

    /// Download a file by id
    Download {
        /// File id
        id: String,

        /// Output file
        #[arg(long)]
        output: PathBuf,
    },

    /// Show node info
    Info,

    /// List stored files
    Files,
}

/// Turn a non-success response into a crate error, keeping retryability
async fn check(resp: reqwest::Response) -> chunkmesh::Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(match status {
        reqwest::StatusCode::SERVICE_UNAVAILABLE => Error::NoCoordinator(message),
        reqwest::StatusCode::MISDIRECTED_REQUEST => Error::NotCoordinator(message),
        reqwest::StatusCode::NOT_FOUND => Error::NotFound(message),
        _ => Error::Http(format!("{}: {}", status, message)),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let node = cli.node.trim_end_matches('/').to_string();
    let backoff = Duration::from_millis(200);

    match cli.command {
        Commands::Upload {
            file,
            name,
            content_type,
        } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .context("file path has no file name")?,
            };
            let url = format!(
                "{}/api/file/upload?filename={}",
                node,
                chunkmesh::common::encode_name(&name)
            );

            let receipt: UploadReceipt = retry_with_backoff(
                || async {
                    let resp = client
                        .post(&url)
                        .header(reqwest::header::CONTENT_TYPE, &content_type)
                        .body(data.clone())
                        .send()
                        .await?;
                    Ok::<_, Error>(check(resp).await?.json::<UploadReceipt>().await?)
                },
                cli.retries,
                backoff,
            )
            .await?;

            println!("Uploaded {}", receipt.file.original_name);
            println!("  File id: {}", receipt.file.id);
            println!("  Size: {}", format_bytes(receipt.file.size));
            println!("  Chunks: {}", receipt.chunks.len());
            println!("  Duplicates: {}", receipt.duplicates.len());
        }

        Commands::Download { id, output } => {
            let url = format!("{}/api/file/{}/content", node, id);
            let data = retry_with_backoff(
                || async {
                    let resp = client.get(&url).send().await?;
                    Ok::<_, Error>(check(resp).await?.bytes().await?)
                },
                cli.retries,
                backoff,
            )
            .await?;
            tokio::fs::write(&output, &data)
                .await
                .with_context(|| format!("writing {}", output.display()))?;
            println!("Downloaded {} to {}", format_bytes(data.len() as u64), output.display());
        }

        Commands::Info => {
            let url = format!("{}/api/node/info", node);
            let info: NodeInfo = retry_with_backoff(
                || async {
                    let resp = client.get(&url).send().await?;
                    Ok::<_, Error>(check(resp).await?.json::<NodeInfo>().await?)
                },
                cli.retries,
                backoff,
            )
            .await?;
            println!("Node: {}", info.node_id);
            println!("  Service: {}", info.service_name);
            println!("  Coordinator: {}", info.is_coordinator);
            match info.coordinator {
                Some(c) => println!("  Current coordinator: {}", c),
                None => println!("  Current coordinator: unknown"),
            }
            println!("  Version: {}", info.version);
        }

        Commands::Files => {
            let url = format!("{}/api/files", node);
            let files: Vec<FileDocument> = retry_with_backoff(
                || async {
                    let resp = client.get(&url).send().await?;
                    Ok::<_, Error>(check(resp).await?.json::<Vec<FileDocument>>().await?)
                },
                cli.retries,
                backoff,
            )
            .await?;
            println!("{} file(s)", files.len());
            for f in files {
                println!("  {}  {}  {}", f.id, format_bytes(f.size), f.original_name);
            }
        }
    }

    Ok(())
}
