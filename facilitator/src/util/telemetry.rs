//! Tracing setup. With the `telemetry` feature and `OTEL_EXPORTER_OTLP_*` env vars set,
//! spans and metrics export via OTLP; otherwise this falls back to plain `tracing_subscriber`
//! output on stdout.

#[cfg(feature = "telemetry")]
mod otel {
    use std::env;

    use opentelemetry::{KeyValue, global, trace::TracerProvider as _};
    use opentelemetry_sdk::{
        Resource,
        metrics::SdkMeterProvider,
        trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
    };
    use opentelemetry_semantic_conventions::{SCHEMA_URL, attribute::SERVICE_VERSION};
    use tracing_opentelemetry::{MetricsLayer, OpenTelemetryLayer};
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Protocol {
        Http,
        Grpc,
    }

    impl Protocol {
        fn from_env() -> Option<Self> {
            let enabled = env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() || env::var("OTEL_EXPORTER_OTLP_PROTOCOL").is_ok();
            if !enabled {
                return None;
            }
            Some(match env::var("OTEL_EXPORTER_OTLP_PROTOCOL").as_deref() {
                Ok("grpc") => Protocol::Grpc,
                _ => Protocol::Http,
            })
        }
    }

    fn resource() -> Resource {
        Resource::builder()
            .with_service_name(env!("CARGO_PKG_NAME"))
            .with_schema_url([KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION"))], SCHEMA_URL)
            .build()
    }

    fn tracer_provider(protocol: Protocol) -> SdkTracerProvider {
        let exporter = opentelemetry_otlp::SpanExporter::builder();
        let exporter = match protocol {
            Protocol::Http => exporter.with_http().build(),
            Protocol::Grpc => exporter.with_tonic().build(),
        }
        .expect("failed to build OTLP span exporter");
        SdkTracerProvider::builder()
            .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(1.0))))
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(resource())
            .with_batch_exporter(exporter)
            .build()
    }

    fn meter_provider(protocol: Protocol) -> SdkMeterProvider {
        use opentelemetry_sdk::metrics::{MeterProviderBuilder, PeriodicReader};
        let exporter = opentelemetry_otlp::MetricExporter::builder();
        let exporter = match protocol {
            Protocol::Http => exporter.with_http().with_temporality(opentelemetry_sdk::metrics::Temporality::default()).build(),
            Protocol::Grpc => exporter.with_tonic().with_temporality(opentelemetry_sdk::metrics::Temporality::default()).build(),
        }
        .expect("failed to build OTLP metric exporter");
        let reader = PeriodicReader::builder(exporter).with_interval(std::time::Duration::from_secs(30)).build();
        let provider = MeterProviderBuilder::default().with_resource(resource()).with_reader(reader).build();
        global::set_meter_provider(provider.clone());
        provider
    }

    pub struct Telemetry {
        tracer_provider: Option<SdkTracerProvider>,
        meter_provider: Option<SdkMeterProvider>,
    }

    impl Telemetry {
        pub fn new() -> Self {
            match Protocol::from_env() {
                Some(protocol) => {
                    let tracer_provider = tracer_provider(protocol);
                    let meter_provider = meter_provider(protocol);
                    let tracer = tracer_provider.tracer("x402-facilitator");
                    tracing_subscriber::registry()
                        .with(tracing_subscriber::filter::LevelFilter::INFO)
                        .with(tracing_subscriber::fmt::layer())
                        .with(MetricsLayer::new(meter_provider.clone()))
                        .with(OpenTelemetryLayer::new(tracer))
                        .init();
                    tracing::info!(?protocol, "OTLP tracing and metrics export enabled");
                    Self { tracer_provider: Some(tracer_provider), meter_provider: Some(meter_provider) }
                }
                None => {
                    tracing_subscriber::registry().with(tracing_subscriber::fmt::layer()).init();
                    Self { tracer_provider: None, meter_provider: None }
                }
            }
        }
    }

    impl Drop for Telemetry {
        fn drop(&mut self) {
            if let Some(provider) = self.tracer_provider.as_ref() {
                if let Err(err) = provider.shutdown() {
                    eprintln!("{err:?}");
                }
            }
            if let Some(provider) = self.meter_provider.as_ref() {
                if let Err(err) = provider.shutdown() {
                    eprintln!("{err:?}");
                }
            }
        }
    }
}

#[cfg(feature = "telemetry")]
pub use otel::Telemetry;

#[cfg(not(feature = "telemetry"))]
pub struct Telemetry;

#[cfg(not(feature = "telemetry"))]
impl Telemetry {
    pub fn new() -> Self {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
        tracing_subscriber::registry().with(tracing_subscriber::fmt::layer()).with(tracing_subscriber::EnvFilter::from_default_env()).init();
        Self
    }
}

#[cfg(not(feature = "telemetry"))]
impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}
