use std::time::Instant;

use anyhow::Context;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LedgerConfig;
use crate::error::LedgerError;

pub const LOG_FILE_PREFIX: &str = "asset-ledger.log";

/// Install the JSON subscriber on stderr, plus a daily-rolling file sink when
/// `log_dir` is configured. Keep the returned guard alive for the life of the
/// process so buffered file lines are flushed.
pub fn init(config: &LedgerConfig) -> anyhow::Result<Option<WorkerGuard>> {
    // sqlx reports statements through `log`.
    let _ = tracing_log::LogTracer::init();

    let filter = EnvFilter::try_new(&config.log_filter)
        .with_context(|| format!("parse log filter '{}'", config.log_filter))?;

    let console = fmt::layer()
        .json()
        .with_target(true)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_target(true)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber).context("install tracing subscriber")?;

    info!(
        target: "asset_ledger",
        event = "logging_initialized",
        filter = %config.log_filter,
        file_sink = config.log_dir.is_some()
    );
    Ok(guard)
}

/// Timing and outcome logging around one facade operation.
pub struct OpScope {
    op: &'static str,
    subject: String,
    start: Instant,
}

impl OpScope {
    pub fn new(op: &'static str, subject: &str) -> Self {
        let scope = Self {
            op,
            subject: subject.to_string(),
            start: Instant::now(),
        };
        debug!(
            target: "asset_ledger",
            event = "ledger_op_enter",
            op = scope.op,
            subject = %scope.subject
        );
        scope
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn success(&self) {
        info!(
            target: "asset_ledger",
            event = "ledger_op_ok",
            op = self.op,
            subject = %self.subject,
            duration_ms = self.elapsed_ms()
        );
    }

    pub fn fail(&self, err: &LedgerError) {
        match err {
            LedgerError::Store(_) | LedgerError::PartialWrite { .. } => error!(
                target: "asset_ledger",
                event = "ledger_op_failed",
                op = self.op,
                subject = %self.subject,
                code = err.code(),
                error = %err,
                duration_ms = self.elapsed_ms()
            ),
            _ => warn!(
                target: "asset_ledger",
                event = "ledger_op_rejected",
                op = self.op,
                subject = %self.subject,
                code = err.code(),
                error = %err,
                duration_ms = self.elapsed_ms()
            ),
        }
    }

    pub fn finish<T>(&self, result: &Result<T, LedgerError>) {
        match result {
            Ok(_) => self.success(),
            Err(err) => self.fail(err),
        }
    }
}
