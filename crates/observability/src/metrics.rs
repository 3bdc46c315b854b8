//! Prometheus-kompatible Metriken fuer Sprechfunk
//!
//! Registrierte Metriken:
//! - `sprechfunk_aktive_sitzungen` – Gauge: Sitzungen im Manager
//! - `sprechfunk_frames_gesendet_total` – Counter: Versendete RTP-Pakete
//! - `sprechfunk_warteschlange_verworfen_total` – Counter: Frames, die aus
//!   einer vollen Sende-Warteschlange gefallen sind
//! - `sprechfunk_pakete_empfangen_total` – Counter: Entschluesselte RTP-Pakete
//! - `sprechfunk_pakete_verworfen_total` – Counter: Verworfene Pakete (grund)
//! - `sprechfunk_heartbeat_rtt_sekunden` – Histogram: Round-Trip-Time (quelle)
//! - `sprechfunk_wiederaufnahmen_total` – Counter: Gestartete Wiederaufnahmen
//! - `sprechfunk_takt_nachholframes_total` – Counter: Burst-Frames nach spaeten Takten

use anyhow::Result;
use prometheus::{
    Counter, Encoder, Gauge, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

/// Alle Sprechfunk-Prometheus-Metriken
#[derive(Clone)]
pub struct VoiceMetrics {
    pub registry: Arc<Registry>,

    pub aktive_sitzungen: Gauge,
    pub frames_gesendet_total: Counter,
    pub warteschlange_verworfen_total: Counter,
    pub pakete_empfangen_total: Counter,
    pub pakete_verworfen_total: IntCounterVec,
    pub heartbeat_rtt_sekunden: HistogramVec,
    pub wiederaufnahmen_total: Counter,
    pub takt_nachholframes_total: Counter,
}

impl VoiceMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let aktive_sitzungen = Gauge::with_opts(Opts::new(
            "sprechfunk_aktive_sitzungen",
            "Anzahl aktiver Sprachsitzungen",
        ))?;
        registry.register(Box::new(aktive_sitzungen.clone()))?;

        let frames_gesendet_total = Counter::with_opts(Opts::new(
            "sprechfunk_frames_gesendet_total",
            "Gesamtanzahl versendeter RTP-Pakete",
        ))?;
        registry.register(Box::new(frames_gesendet_total.clone()))?;

        let warteschlange_verworfen_total = Counter::with_opts(Opts::new(
            "sprechfunk_warteschlange_verworfen_total",
            "Aus voller Sende-Warteschlange verworfene Frames",
        ))?;
        registry.register(Box::new(warteschlange_verworfen_total.clone()))?;

        let pakete_empfangen_total = Counter::with_opts(Opts::new(
            "sprechfunk_pakete_empfangen_total",
            "Gesamtanzahl entschluesselter RTP-Pakete",
        ))?;
        registry.register(Box::new(pakete_empfangen_total.clone()))?;

        let pakete_verworfen_total = IntCounterVec::new(
            Opts::new(
                "sprechfunk_pakete_verworfen_total",
                "Verworfene Pakete nach Grund",
            ),
            &["grund"],
        )?;
        registry.register(Box::new(pakete_verworfen_total.clone()))?;

        let heartbeat_rtt_sekunden = HistogramVec::new(
            HistogramOpts::new(
                "sprechfunk_heartbeat_rtt_sekunden",
                "Heartbeat-Round-Trip-Time in Sekunden",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
            &["quelle"],
        )?;
        registry.register(Box::new(heartbeat_rtt_sekunden.clone()))?;

        let wiederaufnahmen_total = Counter::with_opts(Opts::new(
            "sprechfunk_wiederaufnahmen_total",
            "Gestartete Wiederaufnahmen nach Verbindungsverlust",
        ))?;
        registry.register(Box::new(wiederaufnahmen_total.clone()))?;

        let takt_nachholframes_total = Counter::with_opts(Opts::new(
            "sprechfunk_takt_nachholframes_total",
            "Frames, die nach verspaeteten Takten nachgeholt wurden",
        ))?;
        registry.register(Box::new(takt_nachholframes_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            aktive_sitzungen,
            frames_gesendet_total,
            warteschlange_verworfen_total,
            pakete_empfangen_total,
            pakete_verworfen_total,
            heartbeat_rtt_sekunden,
            wiederaufnahmen_total,
            takt_nachholframes_total,
        })
    }

    /// Zaehlt ein verworfenes Paket
    pub fn paket_verworfen(&self, grund: &str) {
        self.pakete_verworfen_total.with_label_values(&[grund]).inc();
    }

    /// Traegt eine Heartbeat-Latenz ein
    pub fn rtt_beobachten(&self, quelle: &str, rtt: Duration) {
        self.heartbeat_rtt_sekunden
            .with_label_values(&[quelle])
            .observe(rtt.as_secs_f64());
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
