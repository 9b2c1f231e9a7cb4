use std::{env, path::PathBuf};

use anyhow::{Context, Result};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    resource::Resource,
    runtime::Tokio,
    trace::{self, Sampler},
};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type Registry = tracing_subscriber::registry::Registry;

const SAMPLING_RATE_VAR: &str = "PHOTO_OTEL_SAMPLING_RATE";
const LOG_DIR_VAR: &str = "PHOTO_LOG_DIR";

/// Keeps the file writer and the OTLP exporter alive; flushes both on drop.
#[derive(Debug, Default)]
pub struct TelemetryGuard {
    tracer_installed: bool,
    file_writer: Option<WorkerGuard>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if self.tracer_installed {
            global::shutdown_tracer_provider();
        }
        self.file_writer.take();
    }
}

/// Installs the global subscriber: console output, an optional daily rolling
/// log file under `PHOTO_LOG_DIR`, and OTLP export when sampling is above zero.
pub fn init(service_name: &str) -> Result<TelemetryGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (sampling_rate, sampling_warning) =
        parse_sampling_rate(env::var(SAMPLING_RATE_VAR).ok().as_deref());

    let mut guard = TelemetryGuard::default();

    let (otel_layer, otel_error) = match build_otel_layer(service_name, sampling_rate) {
        Ok(layer) => (layer, None),
        Err(error) => (None, Some(error)),
    };
    guard.tracer_installed = otel_layer.is_some();

    let file_layer = match log_dir() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(&dir, format!("{service_name}.log"));
            let (writer, worker) = tracing_appender::non_blocking(appender);
            guard.file_writer = Some(worker);
            Some(fmt::layer().with_writer(writer).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(otel_layer)
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    if let Some(message) = sampling_warning {
        warn!("{message}");
    }

    if let Some(error) = otel_error {
        warn!(%error, "failed to initialize OTEL exporter; continuing with local logs only");
    }

    info!(sampling_rate, file_logging = guard.file_writer.is_some(), "telemetry configured");

    Ok(guard)
}

fn log_dir() -> Option<PathBuf> {
    env::var(LOG_DIR_VAR)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn build_otel_layer(
    service_name: &str,
    sampling_rate: f64,
) -> Result<Option<OpenTelemetryLayer<Registry, trace::Tracer>>> {
    if sampling_rate <= 0.0 {
        return Ok(None);
    }

    global::set_text_map_propagator(TraceContextPropagator::new());

    let exporter = opentelemetry_otlp::new_exporter().tonic();
    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_trace_config(
            trace::Config::default()
                .with_sampler(Sampler::TraceIdRatioBased(sampling_rate))
                .with_resource(Resource::new(vec![KeyValue::new(
                    "service.name",
                    service_name.to_string(),
                )])),
        )
        .with_exporter(exporter)
        .install_batch(Tokio)?;

    Ok(Some(tracing_opentelemetry::layer().with_tracer(tracer)))
}

/// Reads the OTLP sampling ratio. Unset means export is off; bad values fall
/// back to off with a warning, out-of-range values are clamped.
pub fn parse_sampling_rate(raw: Option<&str>) -> (f64, Option<String>) {
    let Some(value) = raw else {
        return (0.0, None);
    };

    let trimmed = value.trim();
    if trimmed.is_empty() {
        return (
            0.0,
            Some(format!("{SAMPLING_RATE_VAR} is empty; OTEL export disabled")),
        );
    }

    match trimmed.parse::<f64>() {
        Ok(parsed) if (0.0..=1.0).contains(&parsed) => (parsed, None),
        Ok(parsed) if parsed.is_finite() => {
            let clamped = parsed.clamp(0.0, 1.0);
            (
                clamped,
                Some(format!(
                    "{SAMPLING_RATE_VAR}={trimmed} outside 0.0..=1.0; clamped to {clamped}"
                )),
            )
        }
        _ => (
            0.0,
            Some(format!(
                "{SAMPLING_RATE_VAR}='{trimmed}' is not a valid ratio; OTEL export disabled"
            )),
        ),
    }
}
