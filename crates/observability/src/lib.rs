//! # sprechfunk-observability
//!
//! Observability-Crate fuer Sprechfunk:
//! - Prometheus-kompatible Metriken der Sprachsitzungen
//! - Structured Logging (Text oder JSON) via tracing-subscriber

pub mod logging;
pub mod metrics;

pub use logging::logging_initialisieren;
pub use metrics::VoiceMetrics;
