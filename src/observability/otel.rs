//! # OpenTelemetry Support
//!
//! Optional Datadog trace export through `datadog-opentelemetry`.
//!
//! Export is enabled only when `DD_API_KEY` is present in the environment.
//! Both binaries call [`init_otel`] with their own default service name; the
//! usual `DD_*` variables override it.

use anyhow::Result;
use std::time::Duration;
use tracing::{info, warn};

/// Tracer provider handle for graceful shutdown
#[derive(Debug)]
pub struct TracerProviderHandle(opentelemetry_sdk::trace::SdkTracerProvider);

/// Datadog settings resolved from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatadogSettings {
    pub service: String,
    pub version: String,
    pub environment: Option<String>,
    pub site: String,
    pub agent_url: String,
}

impl DatadogSettings {
    /// Resolve settings, returning `None` when no API key is configured
    #[must_use]
    pub fn from_lookup(
        lookup: &dyn Fn(&str) -> Option<String>,
        default_service: &str,
    ) -> Option<Self> {
        lookup("DD_API_KEY").filter(|k| !k.trim().is_empty())?;
        Some(Self {
            service: lookup("DD_SERVICE").unwrap_or_else(|| default_service.to_string()),
            // Default version ties traces to the exact build
            version: lookup("DD_VERSION").unwrap_or_else(|| {
                format!("{}-{}", env!("CARGO_PKG_VERSION"), env!("BUILD_GIT_HASH"))
            }),
            environment: lookup("DD_ENV"),
            site: lookup("DD_SITE").unwrap_or_else(|| "datadoghq.com".to_string()),
            agent_url: lookup("DD_TRACE_AGENT_URL")
                .unwrap_or_else(|| "http://localhost:8126".to_string()),
        })
    }
}

/// Initialize Datadog tracing when configured
///
/// Returns `Ok(None)` when `DD_API_KEY` is absent.
///
/// # Errors
///
/// Reserved for exporter initialization failures.
pub fn init_otel(default_service: &str) -> Result<Option<TracerProviderHandle>> {
    let Some(settings) = DatadogSettings::from_lookup(&crate::config::env_lookup, default_service)
    else {
        info!("DD_API_KEY not set, skipping trace export");
        return Ok(None);
    };

    // datadog-opentelemetry reads its settings from the environment
    std::env::set_var("DD_SERVICE", &settings.service);
    std::env::set_var("DD_VERSION", &settings.version);
    std::env::set_var("DD_SITE", &settings.site);
    std::env::set_var("DD_TRACE_AGENT_URL", &settings.agent_url);
    if let Some(env) = &settings.environment {
        std::env::set_var("DD_ENV", env);
    }

    info!(
        "Initializing Datadog tracing: service={}, version={}, env={:?}, site={}",
        settings.service, settings.version, settings.environment, settings.site
    );
    let tracer_provider = datadog_opentelemetry::tracing().init();
    info!("✅ Datadog tracing initialized, sending to {}", settings.agent_url);

    Ok(Some(TracerProviderHandle(tracer_provider)))
}

/// Flush pending spans and shut the tracer provider down
pub fn shutdown_otel(tracer_provider: Option<TracerProviderHandle>) {
    let Some(TracerProviderHandle(provider)) = tracer_provider else {
        return;
    };
    info!("Shutting down Datadog tracer provider...");
    if let Err(e) = provider.shutdown_with_timeout(Duration::from_secs(5)) {
        warn!("Error shutting down Datadog tracer provider: {}", e);
    } else {
        info!("✅ Datadog tracer provider shut down successfully");
    }
}
