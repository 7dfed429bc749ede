//! Logging system configuration and initialization
//!
//! Console and optional file output through `tracing-subscriber`, with
//! KST (Korea Standard Time) timestamps to match the crawled sources'
//! business hours. `RUST_LOG` overrides the configured level.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Result;
use chrono::{FixedOffset, Utc};
use once_cell::sync::Lazy;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

pub use crate::infrastructure::config::LoggingSettings;

// Keeps the non-blocking file writers alive for the process lifetime.
static LOG_GUARDS: Lazy<Mutex<Vec<WorkerGuard>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// KST (UTC+9) timestamp formatter.
struct KstTimeFormatter;

impl FormatTime for KstTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        let kst_offset = FixedOffset::east_opt(9 * 3600).expect("fixed KST offset");
        let kst_time = Utc::now().with_timezone(&kst_offset);
        write!(w, "{}", kst_time.format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

fn default_log_directory() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default())
        .join("logs")
}

/// Initialize the global subscriber from the configured settings.
/// Calling twice is a no-op rather than an error, so tests can share it.
pub fn init_logging(settings: &LoggingSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.clone()));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if settings.console_output {
        if settings.json_format {
            layers.push(fmt::layer().json().with_timer(KstTimeFormatter).boxed());
        } else {
            layers.push(fmt::layer().with_timer(KstTimeFormatter).boxed());
        }
    }

    if settings.file_output {
        let directory = settings
            .directory
            .clone()
            .unwrap_or_else(default_log_directory);
        std::fs::create_dir_all(&directory)?;
        let appender = rolling::daily(directory, "cvs-promo-crawler.log");
        let (writer, guard) = non_blocking(appender);
        LOG_GUARDS.lock().expect("log guard store").push(guard);
        layers.push(
            fmt::layer()
                .with_ansi(false)
                .with_timer(KstTimeFormatter)
                .with_writer(writer)
                .boxed(),
        );
    }

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init();
    Ok(())
}
