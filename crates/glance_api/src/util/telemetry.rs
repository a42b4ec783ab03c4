use tracing_subscriber::{prelude::*, EnvFilter, Registry};

use crate::util::errors::StdError;

/// Fetch the trace id of the current span, recorded on every reconcile span
#[cfg(feature = "telemetry")]
pub fn get_trace_id() -> opentelemetry::trace::TraceId {
    use opentelemetry::trace::TraceContextExt as _;
    use tracing_opentelemetry::OpenTelemetrySpanExt as _;

    tracing::Span::current()
        .context()
        .span()
        .span_context()
        .trace_id()
}

#[cfg(feature = "telemetry")]
async fn init_tracer() -> Result<opentelemetry::sdk::trace::Tracer, StdError> {
    let otlp_endpoint = std::env::var("OPENTELEMETRY_ENDPOINT_URL")
        .map_err(|_| StdError::ConfigError("OPENTELEMETRY_ENDPOINT_URL must be set".to_string()))?;

    let channel = tonic::transport::Channel::from_shared(otlp_endpoint)
        .map_err(|e| StdError::ConfigError(e.to_string()))?
        .connect()
        .await
        .map_err(|e| StdError::ConfigError(e.to_string()))?;

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(opentelemetry_otlp::new_exporter().tonic().with_channel(channel))
        .with_trace_config(opentelemetry::sdk::trace::config().with_resource(
            opentelemetry::sdk::Resource::new(vec![opentelemetry::KeyValue::new(
                "service.name",
                "glance-operator",
            )]),
        ))
        .install_batch(opentelemetry::runtime::Tokio)
        .map_err(|e| StdError::ConfigError(e.to_string()))
}

/// Initialize tracing
///
/// Filtering follows `RUST_LOG` and defaults to `info`. With `json` set, log lines
/// are emitted as JSON objects instead of the compact format.
pub async fn init(json: bool) -> Result<(), StdError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| StdError::ConfigError(e.to_string()))?;

    let (compact, json) = if json {
        (None, Some(tracing_subscriber::fmt::layer().json()))
    } else {
        (Some(tracing_subscriber::fmt::layer().compact()), None)
    };

    let collector = Registry::default().with(env_filter).with(compact).with(json);

    #[cfg(feature = "telemetry")]
    let collector = collector.with(tracing_opentelemetry::layer().with_tracer(init_tracer().await?));

    tracing::subscriber::set_global_default(collector).map_err(|e| StdError::ConfigError(e.to_string()))
}
