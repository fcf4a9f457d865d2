use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rustydocs::{
    answer::QueryRequest,
    api, config, logging,
    ingest::UploadNotification,
    service::{DocumentApi, DocumentService},
    storage::{BlobStore, DocumentRepository, DocumentStatus, FsBlobStore, FsDocumentRepository},
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(
    name = "rustydocs",
    about = "Index PDF documents and answer questions about them with page citations"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API and the background ingestion worker (default).
    Serve,
    /// Upload a local PDF or zip archive for a user and index it.
    Ingest {
        path: PathBuf,
        #[arg(long)]
        user: String,
    },
    /// Ask a question about an indexed document.
    Ask {
        #[arg(long)]
        user: String,
        #[arg(long)]
        file: String,
        #[arg(long)]
        conversation: String,
        #[arg(long)]
        question: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    config::init_config();
    logging::init_tracing();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::Ingest { path, user } => ingest(path, user).await,
        Command::Ask {
            user,
            file,
            conversation,
            question,
        } => ask(user, file, conversation, question).await,
    }
}

async fn serve() -> Result<()> {
    let (service, worker) = DocumentService::from_config(config::get_config())
        .context("failed to initialize document service")?;
    tokio::spawn(worker.run());
    let app = api::create_router(Arc::new(service));

    let (listener, port) = bind_listener().await.context("failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.context("server terminated")?;
    Ok(())
}

async fn ingest(path: PathBuf, user: String) -> Result<()> {
    let config = config::get_config();
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .context("input path has no usable file name")?
        .to_string();
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let size = bytes.len() as u64;
    let key = format!("{user}/{filename}");

    FsBlobStore::new(config.blob_root())
        .put(&key, bytes)
        .await
        .context("failed to store upload")?;

    let (service, worker) = DocumentService::from_config(config)
        .context("failed to initialize document service")?;
    let worker = tokio::spawn(worker.run());
    let document = service
        .register_upload(UploadNotification {
            bucket_key: urlencoding::encode(&key).replace("%2F", "/"),
            size,
        })
        .await
        .context("failed to register upload")?;

    // Dropping the service closes the queue, so the worker exits once the job is done.
    drop(service);
    worker.await.context("ingestion worker panicked")?;

    let record = FsDocumentRepository::new(config.documents_root())
        .get(&document.user_id, &document.document_id)
        .await?
        .context("document record disappeared")?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    if record.status != DocumentStatus::Ready {
        bail!("ingestion of {key} ended in {}", record.status);
    }
    Ok(())
}

async fn ask(user: String, file: String, conversation: String, question: String) -> Result<()> {
    let (service, _worker) = DocumentService::from_config(config::get_config())
        .context("failed to initialize document service")?;
    let answer = service
        .answer(QueryRequest {
            file_name: file,
            prompt: question,
            conversation_id: conversation,
            user_id: user,
        })
        .await?;
    println!("{}", serde_json::to_string_pretty(&answer)?);
    Ok(())
}

async fn bind_listener() -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    let config = config::get_config();
    if let Some(port) = config.server_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4100..=4199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4100-4199",
    ))
}
