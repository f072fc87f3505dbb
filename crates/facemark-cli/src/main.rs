use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use facemark_core::{CommandProvider, FaceProvider, ImageDirSource, Overlay, OverlaySink, RecognitionSession};
use facemark_store::CatalogService;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "facemark", about = "facemark catalog administration and recognition sessions")]
struct Cli {
    #[command(flatten)]
    paths: CatalogPaths,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CatalogPaths {
    /// Public directory holding the catalog and images
    #[arg(long, global = true, env = "FACEMARK_PUBLIC_DIR", default_value = "./public")]
    public_dir: PathBuf,
    /// Catalog file (default: <public-dir>/imageList.json)
    #[arg(long, global = true, env = "FACEMARK_CATALOG_PATH")]
    catalog: Option<PathBuf>,
    /// Image directory (default: <public-dir>/images)
    #[arg(long, global = true, env = "FACEMARK_IMAGES_DIR")]
    images: Option<PathBuf>,
}

impl CatalogPaths {
    fn catalog_path(&self) -> PathBuf {
        self.catalog
            .clone()
            .unwrap_or_else(|| self.public_dir.join("imageList.json"))
    }

    fn images_dir(&self) -> PathBuf {
        self.images
            .clone()
            .unwrap_or_else(|| self.public_dir.join("images"))
    }

    async fn open(&self) -> Result<CatalogService> {
        let path = self.catalog_path();
        CatalogService::open(&path, self.images_dir())
            .await
            .with_context(|| format!("failed to open catalog {}", path.display()))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List catalog entries
    List {
        /// Print the catalog as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add an image to the catalog, labeled by its file name
    Add {
        /// Image file to upload
        image: PathBuf,
    },
    /// Rewrite a legacy filename-only catalog in the labeled format
    Migrate,
    /// Run a recognition session over a directory of frames
    Session {
        /// External detector command line
        #[arg(long, env = "FACEMARK_PROVIDER_CMD")]
        provider_cmd: String,
        /// Pretrained model directory (default: <public-dir>/models)
        #[arg(long, env = "FACEMARK_MODEL_DIR")]
        model_dir: Option<PathBuf>,
        /// Directory of images replayed as camera frames
        #[arg(long)]
        frames: PathBuf,
        /// Tick interval in milliseconds
        #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..))]
        interval_ms: u64,
        /// Maximum distance for a positive match
        #[arg(long, env = "FACEMARK_MATCH_THRESHOLD", default_value_t = 0.6)]
        threshold: f32,
        /// Stop after this many ticks instead of waiting for ctrl-c
        #[arg(long)]
        ticks: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List { json } => {
            let catalog = cli.paths.open().await?.snapshot().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&catalog)?);
            } else if catalog.is_empty() {
                println!("Catalog is empty");
            } else {
                for entry in &catalog {
                    println!("{:<24} {}", entry.label, entry.filename);
                }
            }
        }
        Commands::Add { image } => {
            let name = image
                .file_name()
                .and_then(|n| n.to_str())
                .with_context(|| format!("{} has no usable file name", image.display()))?
                .to_string();
            let bytes = tokio::fs::read(&image)
                .await
                .with_context(|| format!("failed to read {}", image.display()))?;

            let receipt = cli.paths.open().await?.upload(&bytes, &name).await?;
            println!("Added {} as {}", receipt.label, receipt.saved_filename);
        }
        Commands::Migrate => {
            let service = cli.paths.open().await?;
            if service.migrate().await? {
                println!("Catalog migrated: {}", service.catalog_file().path().display());
            } else {
                println!("Catalog already in labeled format");
            }
        }
        Commands::Session {
            provider_cmd,
            model_dir,
            frames,
            interval_ms,
            threshold,
            ticks,
        } => {
            let model_dir = model_dir.unwrap_or_else(|| cli.paths.public_dir.join("models"));
            let service = cli.paths.open().await?;
            run_session(&service, &provider_cmd, &model_dir, &frames, interval_ms, threshold, ticks)
                .await?;
        }
    }

    Ok(())
}

async fn run_session(
    service: &CatalogService,
    provider_cmd: &str,
    model_dir: &Path,
    frames: &Path,
    interval_ms: u64,
    threshold: f32,
    ticks: Option<u64>,
) -> Result<()> {
    let mut provider =
        CommandProvider::from_command_line(provider_cmd).context("provider command is empty")?;
    provider
        .load_models(model_dir)
        .context("failed to load provider models")?;
    let session = RecognitionSession::new(provider, threshold)?;

    let summary = {
        let _reloading = session.reload_guard().await;
        let snapshot = service.snapshot().await?;
        let assets = service.assets().clone();
        let builder = session.clone();
        tokio::task::spawn_blocking(move || builder.reload(&snapshot, &assets)).await?
    };
    for skipped in &summary.skipped {
        eprintln!("skipped {} ({}): {}", skipped.label, skipped.filename, skipped.reason);
    }
    tracing::info!(labels = summary.labels, "references loaded");

    let source = ImageDirSource::open(frames)
        .with_context(|| format!("failed to open frame directory {}", frames.display()))?;
    let sink = JsonLinesSink::new(std::io::stdout());

    let mut frame_loop = session.frame_loop(source, sink, Duration::from_millis(interval_ms))?;
    if let Some(ticks) = ticks {
        frame_loop = frame_loop.with_tick_limit(ticks);
    }

    let stats = frame_loop
        .run(async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await;
    tracing::info!(?stats, "session finished");

    Ok(())
}

/// Writes one JSON object per processed frame.
struct JsonLinesSink<W> {
    out: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write + Send> OverlaySink for JsonLinesSink<W> {
    fn draw(&mut self, frame_sequence: u64, overlays: &[Overlay]) {
        let line = serde_json::json!({ "frame": frame_sequence, "faces": overlays });
        if let Err(e) = writeln!(self.out, "{line}").and_then(|_| self.out.flush()) {
            tracing::warn!(error = %e, "failed to write overlay line");
        }
    }
}
