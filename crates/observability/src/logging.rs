//! Logging fuer Sprechfunk via tracing-subscriber
//!
//! Die eigenen Crates (Targets `sprechfunk*`) loggen auf dem konfigurierten
//! Level, alle anderen (tungstenite, tokio, rustls) erst ab `warn`.
//!
//! Umgebungsvariablen:
//! - `SF_LOG_LEVEL`: ersetzt die Direktiven vollstaendig, z.B.
//!   `SF_LOG_LEVEL=info,sprechfunk_session=trace`. Ungueltige Werte werden
//!   ignoriert.
//! - `SF_LOG_FORMAT`: `text` oder `json`
//!
//! Jede Sitzung laeuft im Span `sitzung` mit den Feldern `guild_id` und
//! `sitzung`. Im Textformat stehen sie vor der Zeile, im JSON-Format unter
//! `span`. Ereignisse tragen zusaetzlich `ssrc`, `versuch` oder `nonce`.

use tracing_subscriber::{fmt, EnvFilter};

/// Level fuer Crates ausserhalb des Workspaces
const FREMD_LEVEL: &str = "warn";

/// Gemeinsamer Praefix aller Workspace-Targets
const EIGENES_TARGET: &str = "sprechfunk";

/// Direktiven fuer den konfigurierten `level`
pub fn standard_direktiven(level: &str) -> String {
    format!("{FREMD_LEVEL},{EIGENES_TARGET}={level}")
}

/// Filter aus `SF_LOG_LEVEL` (`umgebung`), sonst aus `level`
pub fn filter_bauen(level: &str, umgebung: Option<&str>) -> EnvFilter {
    umgebung
        .and_then(|direktiven| EnvFilter::try_new(direktiven).ok())
        .or_else(|| EnvFilter::try_new(standard_direktiven(level)).ok())
        .unwrap_or_else(|| EnvFilter::new(standard_direktiven("info")))
}

/// Installiert den globalen Subscriber
///
/// Ein bereits installierter Subscriber bleibt bestehen, ein zweiter Aufruf
/// (etwa aus Tests) aendert nichts.
pub fn logging_initialisieren(level: &str, format: &str) {
    let umgebung = std::env::var("SF_LOG_LEVEL").ok();
    let filter = filter_bauen(level, umgebung.as_deref());
    let format = std::env::var("SF_LOG_FORMAT").unwrap_or_else(|_| format.to_string());

    let ergebnis = match format.as_str() {
        "json" => fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .with_span_list(false)
            .with_thread_ids(true)
            .try_init(),
        _ => fmt().with_env_filter(filter).with_target(true).try_init(),
    };
    if ergebnis.is_ok() {
        tracing::debug!(format = %format, "Logging initialisiert");
    }
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn fremde_crates_nur_ab_warn() {
        assert_eq!(standard_direktiven("debug"), "warn,sprechfunk=debug");
        let filter = filter_bauen("debug", None);
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn umgebung_ersetzt_direktiven() {
        let filter = filter_bauen("info", Some("info,sprechfunk_session=trace"));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::TRACE));

        // Ungueltige Umgebung faellt auf den konfigurierten Level zurueck
        let filter = filter_bauen("error", Some("sprechfunk=laut"));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));
    }

    #[test]
    fn log_level_pruefung() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            assert!(log_level_gueltig(level), "{level}");
        }
        // Gross-/Kleinschreibung zaehlt
        for level in ["verbose", "INFO", "", "critical"] {
            assert!(!log_level_gueltig(level), "{level}");
        }
    }

    #[test]
    fn log_format_pruefung() {
        assert!(log_format_gueltig("text"));
        assert!(log_format_gueltig("json"));
        assert!(!log_format_gueltig("JSON"));
        assert!(!log_format_gueltig("logfmt"));
    }

    #[test]
    fn doppelte_initialisierung_ist_harmlos() {
        logging_initialisieren("debug", "text");
        logging_initialisieren("warn", "json");
    }
}
