//! Command-line client for chunkd.

mod api_client;
mod drive;

use anyhow::{Context, Result};
use api_client::{ApiClient, UploadResponse};
use clap::{Parser, Subcommand};
use drive::{DEFAULT_DRIVE_BASE_URL, DriveClient};
use std::path::Path;

const MIB: f64 = 1024.0 * 1024.0;

#[derive(Parser)]
#[command(name = "chunkctl")]
#[command(about = "Command-line client for the chunkd upload service")]
#[command(version)]
struct Cli {
    /// Server base URL
    #[arg(
        long,
        global = true,
        env = "CHUNKD_SERVER",
        default_value = "http://localhost:8000"
    )]
    server: String,

    /// Base URL used to download Google Drive files
    #[arg(
        long,
        global = true,
        env = "CHUNKD_DRIVE_BASE_URL",
        default_value = DEFAULT_DRIVE_BASE_URL
    )]
    drive_base_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the service is up
    Health,
    /// Upload a local file or a Google Drive link
    Upload {
        /// Path to a file, or a drive.google.com / docs.google.com link
        source: String,
    },
    /// Show the chunk manifest of an upload
    Chunks {
        /// File id returned by a previous upload
        file_id: String,
    },
    /// Send a JSON document to the legacy echo endpoint
    Process {
        /// JSON document, e.g. '{"text": "hello"}'
        json: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let Cli {
        server,
        drive_base_url,
        command,
    } = Cli::parse();
    let client = ApiClient::new(&server)?;

    match command {
        Commands::Health => handle_health_command(&client, &server).await,
        Commands::Upload { source } => {
            handle_upload_command(&client, &source, &drive_base_url).await
        }
        Commands::Chunks { file_id } => handle_chunks_command(&client, &file_id).await,
        Commands::Process { json } => handle_process_command(&client, &json).await,
    }
}

async fn handle_health_command(client: &ApiClient, server: &str) -> Result<()> {
    let health = client
        .health()
        .await
        .with_context(|| format!("could not reach {server}"))?;

    println!("Service is {}", health.status);
    if let Some(version) = health.version {
        println!("Server version: {version}");
    }
    println!("Client version: {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}

async fn handle_upload_command(
    client: &ApiClient,
    source: &str,
    drive_base_url: &str,
) -> Result<()> {
    let result = if drive::is_drive_url(source) {
        let file_id = drive::extract_file_id(source)?;
        println!("Downloading file from Google Drive: {source}");
        let downloaded = DriveClient::new(drive_base_url).download(&file_id).await?;
        println!("File downloaded to: {}", downloaded.path().display());
        upload_path(client, downloaded.path(), &downloaded.filename, downloaded.size).await?
    } else {
        let path = Path::new(source);
        let metadata = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("file {source} does not exist"))?;
        if !metadata.is_file() {
            anyhow::bail!("{source} is not a regular file");
        }
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow::anyhow!("cannot determine a filename for {source}"))?;
        upload_path(client, path, filename, metadata.len()).await?
    };

    print_full_response(&result)
}

async fn upload_path(
    client: &ApiClient,
    path: &Path,
    filename: &str,
    size: u64,
) -> Result<UploadResponse> {
    println!("Uploading file: {}", path.display());
    println!("File size: {:.2} MB", size as f64 / MIB);

    let result = client.upload_file(path, filename).await?;
    println!("Upload successful!");
    println!("File ID: {}", result.file_id);

    match result.chunks.as_deref() {
        Some(chunks) if result.chunked => {
            println!("File was chunked into {} parts", chunks.len());
            for chunk in chunks {
                println!(
                    "  Chunk {}: {:.2} MB",
                    chunk.chunk_number,
                    chunk.chunk_size as f64 / MIB
                );
            }
        }
        _ => println!("File was not chunked"),
    }
    Ok(result)
}

async fn handle_chunks_command(client: &ApiClient, file_id: &str) -> Result<()> {
    println!("Getting chunks info for file ID: {file_id}");
    let result = client.get_chunks(file_id).await?;

    if result.chunked {
        println!(
            "Found {} chunks for file {}",
            result.num_chunks.unwrap_or_default(),
            result.original_filename
        );
    } else {
        println!("File {} was stored whole", result.original_filename);
    }
    print_full_response(&result)
}

async fn handle_process_command(client: &ApiClient, json: &str) -> Result<()> {
    let payload: serde_json::Value = serde_json::from_str(json).context("invalid JSON")?;
    let result = client.process(&payload).await?;
    println!("{}", result.response);
    Ok(())
}

fn print_full_response(result: &UploadResponse) -> Result<()> {
    println!("\nFull response:");
    println!("{}", serde_json::to_string_pretty(result)?);
    Ok(())
}
