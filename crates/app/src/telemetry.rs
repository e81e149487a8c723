use std::sync::OnceLock;
use std::time::Instant;

use metrics::{describe_counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use hrbank_util::{AppConfig, Environment};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to install metrics recorder: {0}")]
    Metrics(#[from] BuildError),
    #[error("failed to initialize tracing: {0}")]
    Tracing(String),
}

/// Initializes the global tracing subscriber.
///
/// Development and test environments get human-readable output; production
/// emits JSON lines. `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = match config.environment {
        Environment::Development | Environment::Test => builder.pretty().try_init(),
        Environment::Production => builder.json().try_init(),
    };
    result.map_err(|err| TelemetryError::Tracing(err.to_string()))
}

static METRICS: OnceLock<PrometheusHandle> = OnceLock::new();
static STARTED_AT: OnceLock<Instant> = OnceLock::new();

/// Installs the Prometheus recorder and registers metric descriptions.
///
/// The recorder is process-global, so repeated calls return the handle that
/// was installed first.
pub fn init_metrics() -> Result<PrometheusHandle, TelemetryError> {
    if let Some(handle) = METRICS.get() {
        return Ok(handle.clone());
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            describe_counter!(
                "department_ops_total",
                "Department operations partitioned by op and result"
            );
            describe_counter!(
                "employee_ops_total",
                "Employee operations partitioned by op and result"
            );
            gauge!("app_build_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);

            let _ = STARTED_AT.set(Instant::now());
            let _ = METRICS.set(handle.clone());
            Ok(handle)
        }
        // Lost the install race: another caller holds the recorder.
        Err(err) => METRICS.get().cloned().ok_or(TelemetryError::Metrics(err)),
    }
}

/// Refreshes the uptime gauge. Called on each metrics scrape so the value is
/// current without a background task.
pub fn record_uptime() {
    if let Some(started) = STARTED_AT.get() {
        gauge!("app_uptime_seconds").set(started.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_metrics_is_idempotent() {
        let first = init_metrics().expect("first install");
        let _second = init_metrics().expect("second call reuses the handle");
        assert!(first.render().contains("app_build_info"));
    }
}
