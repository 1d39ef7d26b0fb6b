//! # Structured Logging Module
//!
//! Environment-aware structured logging for hosts that do not install their own
//! `tracing` subscriber. Libraries embedding the engine usually already have
//! one; initialization then leaves it in place.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = std::env::var("RUST_LOG")
            .ok()
            .and_then(|directives| EnvFilter::try_new(directives).ok())
            .unwrap_or_else(|| EnvFilter::new(get_log_level(&environment)));
        let json = use_json_format();

        let console = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // A global subscriber may already be set by the host
        if tracing_subscriber::registry().with(console).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            environment = %environment,
            json = json,
            "Structured logging initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("GRAPH_TRACE_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

fn use_json_format() -> bool {
    std::env::var("GRAPH_TRACE_LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"))
}

/// Log structured data for graph lifecycle operations
pub fn log_graph_operation(
    operation: &str,
    mode: Option<&str>,
    thread_id: Option<&str>,
    status: &str,
    duration_ms: Option<u64>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        mode = mode,
        thread_id = thread_id,
        status = %status,
        duration_ms = duration_ms,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "GRAPH_OPERATION"
    );
}

/// Log structured data for checkpoint backend operations
pub fn log_checkpoint_operation(
    operation: &str,
    thread_id: Option<&str>,
    checkpoint_id: Option<&str>,
    status: &str,
    duration_ms: Option<f64>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        thread_id = thread_id,
        checkpoint_id = checkpoint_id,
        status = %status,
        duration_ms = duration_ms,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "CHECKPOINT_OPERATION"
    );
}

/// Log structured data for interrupt, resume and human decision events
pub fn log_interrupt_operation(
    operation: &str,
    thread_id: Option<&str>,
    node: Option<&str>,
    status: &str,
    wait_duration_seconds: Option<f64>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        thread_id = thread_id,
        node = node,
        status = %status,
        wait_duration_seconds = wait_duration_seconds,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "INTERRUPT_OPERATION"
    );
}
