use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{Context, Result};
use crossterm::cursor::MoveToColumn;
use crossterm::execute;
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use tracing_subscriber::EnvFilter;
use photo_queue::{
    AggregatedProgress,
    AggregateWatcher,
    Config,
    JsonLinesRecorder,
    PhotoFile,
    PhotoQueue,
    QueueView,
    TusTransport,
    UploadStatus,
};

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let transport = TusTransport::new(config.transport.to_tus_config())
        .context("Failed to create tus transport")?;

    let mut builder = PhotoQueue::builder(Arc::new(transport)).config(config.queue.clone());
    if let Some(records_file) = &config.upload.records_file {
        builder = builder.recorder(Arc::new(JsonLinesRecorder::new(records_file)));
    }
    let handle = builder.spawn();

    let mut photos = Vec::with_capacity(config.upload.files.len());
    for path in &config.upload.files {
        let photo = PhotoFile::from_path(path)
            .await
            .with_context(|| format!("Failed to read photo {}", path.display()))?;
        photos.push(photo);
    }

    let ids = handle.queue
        .enqueue(photos, config.upload.destination(), config.upload.owner())
        .context("Failed to enqueue photos")?;
    tracing::info!(count = ids.len(), step = %config.upload.step, "Photos queued");

    let view: Arc<dyn QueueView> = Arc::new(handle.queue.clone());
    let watcher = AggregateWatcher::spawn(vec![view]);
    let mut progress_rx = watcher.subscribe();

    let mut stdout = io::stdout();
    loop {
        let progress = *progress_rx.borrow_and_update();
        render_indicator(&mut stdout, &progress)?;

        if !progress.has_outstanding() {
            break;
        }
        if progress_rx.changed().await.is_err() {
            break;
        }
    }
    writeln!(stdout)?;

    for record in handle.queue.records() {
        match &record.status {
            UploadStatus::Completed { url } => println!("✅ {} -> {}", record.id, url),
            UploadStatus::Failed { error } => println!("❌ {}: {}", record.id, error),
            status => println!("⏳ {}: {:?}", record.id, status.kind()),
        }
    }

    watcher.shutdown().await;
    handle.shutdown().await?;

    Ok(())
}

fn render_indicator(stdout: &mut io::Stdout, progress: &AggregatedProgress) -> io::Result<()> {
    let line = format!(
        "📷 {}/{} {}%",
        progress.completed_count,
        progress.total_count,
        progress.combined_progress,
    );

    execute!(stdout, MoveToColumn(0), Clear(ClearType::CurrentLine), Print(line))
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("photo_queue=info,warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}
