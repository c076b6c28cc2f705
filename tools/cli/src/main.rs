//! Conduit CLI - move objects between storage backends.
//!
//! Every command resolves its locations through the remotes file and the
//! provider registry, then calls the provider operations directly.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};

use conduit_storage::{guess_content_type, register_builtin, Metadata, StreamObject};

use crate::config::{parse_option, Location, RemotesConfig};

#[derive(Parser)]
#[command(name = "conduit")]
#[command(about = "Conduit - copy and move objects between storage backends")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Remotes file (default: <config dir>/conduit/remotes.json).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered provider backends.
    Providers,

    /// List configured remotes.
    Remotes,

    /// Write an object to a file or stdout.
    Download {
        /// Source location (remote:path or local path).
        source: String,

        /// Destination file (default: stdout).
        dest: Option<PathBuf>,

        /// Extra source option (key=value).
        #[arg(long = "src-opt", value_parser = parse_option)]
        src_opts: Vec<(String, Value)>,
    },

    /// Stream a file or stdin into an object.
    Upload {
        /// Source file, or "-" for stdin.
        source: PathBuf,

        /// Destination location.
        dest: String,

        /// Content type (default: guessed from the source name).
        #[arg(long)]
        content_type: Option<String>,

        /// Extra destination option (key=value).
        #[arg(long = "dst-opt", value_parser = parse_option)]
        dst_opts: Vec<(String, Value)>,
    },

    /// Delete an object.
    Delete {
        /// Location to delete.
        target: String,

        /// Extra option (key=value).
        #[arg(long = "opt", value_parser = parse_option)]
        opts: Vec<(String, Value)>,
    },

    /// Copy an object between locations.
    Copy {
        source: String,
        dest: String,

        #[arg(long = "src-opt", value_parser = parse_option)]
        src_opts: Vec<(String, Value)>,

        #[arg(long = "dst-opt", value_parser = parse_option)]
        dst_opts: Vec<(String, Value)>,
    },

    /// Move an object between locations.
    Move {
        source: String,
        dest: String,

        #[arg(long = "src-opt", value_parser = parse_option)]
        src_opts: Vec<(String, Value)>,

        #[arg(long = "dst-opt", value_parser = parse_option)]
        dst_opts: Vec<(String, Value)>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let registry = conduit_storage::global();
    register_builtin(registry).context("Failed to register built-in providers")?;
    let remotes = RemotesConfig::load(cli.config.as_deref())?;

    let app = App { remotes, registry };

    match cli.command {
        Commands::Providers => cmd_providers(&app),
        Commands::Remotes => cmd_remotes(&app),
        Commands::Download {
            source,
            dest,
            src_opts,
        } => cmd_download(&app, &source, dest.as_deref(), &src_opts).await,
        Commands::Upload {
            source,
            dest,
            content_type,
            dst_opts,
        } => cmd_upload(&app, &source, &dest, content_type, &dst_opts).await,
        Commands::Delete { target, opts } => cmd_delete(&app, &target, &opts).await,
        Commands::Copy {
            source,
            dest,
            src_opts,
            dst_opts,
        } => cmd_copy(&app, &source, &dest, &src_opts, &dst_opts).await,
        Commands::Move {
            source,
            dest,
            src_opts,
            dst_opts,
        } => cmd_move(&app, &source, &dest, &src_opts, &dst_opts).await,
    }
}

/// Loaded configuration shared by all commands.
struct App {
    remotes: RemotesConfig,
    registry: &'static conduit_storage::ProviderRegistry,
}

impl App {
    fn locate(&self, location: &str, extra: &[(String, Value)]) -> Result<Location> {
        self.remotes.resolve(self.registry, location, extra)
    }
}

fn print_metadata(metadata: &Metadata) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(metadata)?);
    Ok(())
}

/// List registered providers.
fn cmd_providers(app: &App) -> Result<()> {
    for name in app.registry.providers() {
        println!("{}", name);
    }
    Ok(())
}

/// List configured remotes.
fn cmd_remotes(app: &App) -> Result<()> {
    if app.remotes.remotes.is_empty() {
        println!("No remotes configured.");
        return Ok(());
    }
    for (alias, remote) in &app.remotes.remotes {
        println!("{}: {}", alias, remote.provider);
    }
    Ok(())
}

/// Stream an object to a file or stdout.
async fn cmd_download(
    app: &App,
    source: &str,
    dest: Option<&Path>,
    src_opts: &[(String, Value)],
) -> Result<()> {
    let src = app.locate(source, src_opts)?;
    let mut obj = src
        .provider
        .download(&src.options)
        .await
        .with_context(|| format!("Failed to download {}", src.label))?;

    let mut out: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = match dest {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    let mut written = 0u64;
    while let Some(chunk) = obj.content.next().await {
        let chunk = chunk.with_context(|| format!("Failed reading {}", src.label))?;
        out.write_all(&chunk).await.context("Failed to write output")?;
        written += chunk.len() as u64;
    }
    out.flush().await.context("Failed to flush output")?;

    info!("Downloaded {} ({} bytes, {})", src.label, written, obj.content_type);
    Ok(())
}

/// Feed a file or stdin into an upload through a request-side stream.
async fn cmd_upload(
    app: &App,
    source: &Path,
    dest: &str,
    content_type: Option<String>,
    dst_opts: &[(String, Value)],
) -> Result<()> {
    let dst = app.locate(dest, dst_opts)?;

    let mut headers = HeaderMap::new();
    let content_type = content_type.unwrap_or_else(|| guess_content_type(source));
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_str(&content_type).context("Invalid content type")?,
    );

    let (obj, producer) = if source == Path::new("-") {
        let (obj, writer) = StreamObject::for_request(&headers);
        let producer = tokio::spawn(writer.copy_from(tokio::io::stdin()));
        (obj, producer)
    } else {
        let file = tokio::fs::File::open(source)
            .await
            .with_context(|| format!("Failed to open {}", source.display()))?;
        let len = file.metadata().await?.len();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
        let (obj, writer) = StreamObject::for_request(&headers);
        let producer = tokio::spawn(writer.copy_from(file));
        (obj, producer)
    };

    let uploaded = dst.provider.upload(obj, &dst.options).await;
    let (metadata, bytes) = join_upload(uploaded, producer)
        .await
        .with_context(|| format!("Failed to upload to {}", dst.label))?;

    info!("Uploaded {} bytes to {}", bytes, dst.label);
    print_metadata(&metadata)
}

/// Pair an upload result with its reader task.
///
/// A failed upload aborts the reader instead of waiting for it, since a
/// reader on stdin would otherwise block until EOF.
async fn join_upload(
    uploaded: conduit_common::Result<Metadata>,
    producer: JoinHandle<conduit_common::Result<u64>>,
) -> Result<(Metadata, u64)> {
    let metadata = match uploaded {
        Ok(metadata) => metadata,
        Err(e) => {
            producer.abort();
            return Err(e.into());
        }
    };

    let bytes = producer
        .await
        .context("Upload reader task failed")?
        .context("Failed to read upload source")?;
    Ok((metadata, bytes))
}

/// Delete an object.
async fn cmd_delete(app: &App, target: &str, opts: &[(String, Value)]) -> Result<()> {
    let location = app.locate(target, opts)?;
    location
        .provider
        .delete(&location.options)
        .await
        .with_context(|| format!("Failed to delete {}", location.label))?;
    info!("Deleted {}", location.label);
    Ok(())
}

/// Copy an object.
async fn cmd_copy(
    app: &App,
    source: &str,
    dest: &str,
    src_opts: &[(String, Value)],
    dst_opts: &[(String, Value)],
) -> Result<()> {
    let src = app.locate(source, src_opts)?;
    let dst = app.locate(dest, dst_opts)?;

    let metadata = src
        .provider
        .copy_to(dst.provider.as_ref(), &src.options, &dst.options)
        .await
        .with_context(|| format!("Failed to copy {} to {}", src.label, dst.label))?;

    info!("Copied {} to {}", src.label, dst.label);
    print_metadata(&metadata)
}

/// Move an object.
async fn cmd_move(
    app: &App,
    source: &str,
    dest: &str,
    src_opts: &[(String, Value)],
    dst_opts: &[(String, Value)],
) -> Result<()> {
    let src = app.locate(source, src_opts)?;
    let dst = app.locate(dest, dst_opts)?;

    let metadata = src
        .provider
        .move_to(dst.provider.as_ref(), &src.options, &dst.options)
        .await
        .with_context(|| {
            format!(
                "Failed to move {} to {} (the destination may already hold a copy)",
                src.label, dst.label
            )
        })?;

    info!("Moved {} to {}", src.label, dst.label);
    print_metadata(&metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    fn metadata() -> Metadata {
        Metadata {
            id: "id".to_string(),
            name: "a.txt".to_string(),
            size: Some(3),
            content_type: "text/plain".to_string(),
            modified: Utc::now(),
            etag: None,
            provider_data: None,
        }
    }

    #[tokio::test]
    async fn test_failed_upload_does_not_wait_for_reader() {
        // The reader side never reaches EOF while `_input` is alive.
        let (_input, reader) = tokio::io::duplex(64);
        let (_obj, writer) = StreamObject::for_request(&HeaderMap::new());
        let producer = tokio::spawn(writer.copy_from(reader));

        let uploaded = Err(conduit_common::Error::InvalidInput("bad path".to_string()));
        let result = tokio::time::timeout(Duration::from_secs(5), join_upload(uploaded, producer))
            .await
            .expect("join_upload waited on the reader");

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_successful_upload_reports_bytes_read() {
        let (_obj, mut writer) = StreamObject::for_request(&HeaderMap::new());
        let producer = tokio::spawn(async move {
            writer.write(&b"abc"[..]).await?;
            Ok::<_, conduit_common::Error>(writer.finish())
        });

        let (metadata, bytes) = join_upload(Ok(metadata()), producer).await.unwrap();
        assert_eq!(metadata.name, "a.txt");
        assert_eq!(bytes, 3);
    }
}
