mod diagnostics;

pub use diagnostics::{DiagnosticQuery, DiagnosticRecord, DiagnosticsBuffer, DiagnosticsLayer};

use std::str::FromStr;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "pantry_sync" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
    /// Number of warn+ events kept for inspection.
    pub diagnostics_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
            diagnostics_capacity: 256,
        }
    }
}

impl TelemetryConfig {
    /// Build from a level name such as `"debug"`; unknown names fall back to INFO.
    pub fn with_level_name(mut self, level: &str) -> Self {
        self.log_level = Level::from_str(level).unwrap_or(Level::INFO);
        self
    }

    fn filter_directives(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter
    }
}

/// Keeps the diagnostics buffer reachable after initialization.
pub struct TelemetryGuard {
    diagnostics: Arc<DiagnosticsBuffer>,
}

impl TelemetryGuard {
    /// Recent warn+ events (handler failures, connection errors, dropped frames).
    pub fn diagnostics(&self) -> &DiagnosticsBuffer {
        &self.diagnostics
    }
}

/// Initialize the telemetry subsystem. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    let diagnostics = Arc::new(DiagnosticsBuffer::new(config.diagnostics_capacity));

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(DiagnosticsLayer::new(Arc::clone(&diagnostics)))
        .init();

    TelemetryGuard { diagnostics }
}
