// lectail - live activity console for the lecture-manager server
//
// The console attaches to the server's debug stream and tails a unified
// activity timeline on stdout.
//
// Architecture:
// - Transport (reqwest): SSE push stream with a poll fallback, plus ack/export
// - Session: connection lifecycle (reconnect, poll degradation) per epoch
// - Timeline controller: owns the retention store, filter, and checkpoint,
//   publishes immutable snapshots over a watch channel
// - Renderer: prints newly arrived entries and status changes from snapshots

mod checkpoint;
mod cli;
mod config;
mod demo;
mod events;
mod filter;
mod normalize;
mod session;
mod store;
mod timeline;
mod transport;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use config::{Config, LogRotation};
use demo::DemoTransport;
use events::LogEntry;
use session::ConnectionStatus;
use std::io::Write as _;
use std::sync::Arc;
use timeline::{Snapshot, Timeline};
use transport::{HttpTransport, Transport};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Config subcommand handles and exits before any pipeline setup
    if let Some(Commands::Config {
        show,
        reset,
        edit,
        update,
        path,
    }) = &args.command
    {
        cli::handle_config(*show, *reset, *edit, *update, *path);
        return Ok(());
    }

    // Ensure config template exists (helps users discover options)
    Config::ensure_config_exists();

    let config = Config::from_env();

    // Initialize tracing. Diagnostics go to stderr so they never interleave
    // with the timeline on stdout. File logging optionally adds a rotating
    // JSON layer; its guard must outlive main so buffered logs flush.
    //
    // Precedence: RUST_LOG env var > config file > default "info"
    let default_filter = format!("lectail={}", config.logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    let _file_guard: Option<tracing_appender::non_blocking::WorkerGuard> =
        if config.logging.file_enabled {
            match std::fs::create_dir_all(&config.logging.file_dir) {
                Err(e) => {
                    eprintln!(
                        "Warning: Could not create log directory {:?}: {}",
                        config.logging.file_dir, e
                    );
                    // Fall back to stderr-only logging
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                        .init();
                    None
                }
                Ok(()) => {
                    let file_appender = match config.logging.file_rotation {
                        LogRotation::Hourly => tracing_appender::rolling::hourly(
                            &config.logging.file_dir,
                            &config.logging.file_prefix,
                        ),
                        LogRotation::Daily => tracing_appender::rolling::daily(
                            &config.logging.file_dir,
                            &config.logging.file_prefix,
                        ),
                        LogRotation::Never => tracing_appender::rolling::never(
                            &config.logging.file_dir,
                            &config.logging.file_prefix,
                        ),
                    };

                    // Non-blocking writer: file writes happen off the hot path
                    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                    tracing_subscriber::registry()
                        .with(filter)
                        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                        .with(
                            tracing_subscriber::fmt::layer()
                                .json()
                                .with_writer(non_blocking)
                                .with_ansi(false),
                        )
                        .init();

                    Some(guard)
                }
            }
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
            None
        };

    // Export subcommand: one-shot download, no streaming session
    if let Some(Commands::Export { output }) = &args.command {
        return run_export(&config, output.clone()).await;
    }

    if config.demo_mode {
        tracing::info!("Running in DEMO MODE - generating mock activity");
        run_console(Arc::new(DemoTransport), &config, &args).await
    } else {
        tracing::info!(server = %config.server_url, "Attaching to activity stream");
        run_console(Arc::new(HttpTransport::new(&config.server_url)), &config, &args).await
    }
}

/// Download the server-side log archive to a file or stdout.
async fn run_export(config: &Config, output: Option<std::path::PathBuf>) -> Result<()> {
    let transport = HttpTransport::new(&config.server_url);
    let bytes = transport
        .export()
        .await
        .with_context(|| format!("export from {} failed", config.server_url))?;

    match output {
        Some(path) => {
            std::fs::write(&path, &bytes)
                .with_context(|| format!("could not write {}", path.display()))?;
            eprintln!("Wrote {} bytes to {}", bytes.len(), path.display());
        }
        None => {
            std::io::stdout().write_all(&bytes)?;
        }
    }
    Ok(())
}

/// Run the streaming console until Ctrl+C.
async fn run_console<T: Transport>(transport: Arc<T>, config: &Config, args: &Cli) -> Result<()> {
    let timeline = Timeline::spawn(transport, config.timeline_config());
    timeline.enable().await;

    let patch = args.filter_patch();
    if patch != filter::FilterPatch::default() {
        timeline.set_filter(patch).await;
    }

    let mut snapshots = timeline.subscribe();
    let mut renderer = Renderer::default();
    renderer.render(&snapshots.borrow_and_update());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break; // controller gone
                }
                let snapshot = snapshots.borrow_and_update().clone();
                renderer.render(&snapshot);
            }
        }
    }

    tracing::info!("Shutting down...");
    timeline.shutdown().await;
    Ok(())
}

/// Incremental stdout renderer. Snapshots are cumulative, so the renderer
/// remembers the highest (timestamp, id) it has printed and only emits
/// entries past that mark, plus connection status transitions.
#[derive(Default)]
struct Renderer {
    last_printed: Option<(i64, String)>,
    last_status: Option<ConnectionStatus>,
}

impl Renderer {
    fn render(&mut self, snapshot: &Snapshot) {
        if self.last_status != Some(snapshot.status) {
            println!("--- {} ---", snapshot.status.as_str());
            self.last_status = Some(snapshot.status);
        }

        for entry in &snapshot.entries {
            let key = (entry.timestamp, entry.id.clone());
            if let Some(last) = &self.last_printed {
                if (key.0, key.1.as_str()) <= (last.0, last.1.as_str()) {
                    continue;
                }
            }
            print_entry(entry);
            self.last_printed = Some(key);
        }
    }
}

fn print_entry(entry: &LogEntry) {
    let time = chrono::DateTime::from_timestamp_millis(entry.timestamp)
        .map(|t| t.format("%H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| entry.timestamp.to_string());

    let mut line = format!(
        "{} {:<8} [{}] {}",
        time,
        entry.severity.as_str().to_uppercase(),
        entry.category,
        entry.message
    );

    if let Some(task) = &entry.task_id {
        line.push_str(&format!(" task={task}"));
    }
    if let Some(retries) = entry.retry_count {
        if retries > 0 {
            line.push_str(&format!(" retries={retries}"));
        }
    }
    println!("{line}");
}
