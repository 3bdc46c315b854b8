//! Fehlertypen fuer das Kryptografie-Subsystem
//!
//! `CryptoError` beschreibt Fehler beim Aufbau des Framers und beim
//! Verschluesseln. Ein nicht entschluesselbares Paket ist kein Fehler,
//! sondern ein `Verworfen`-Ergebnis.

use thiserror::Error;

/// Fehler im Kryptografie-Subsystem
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Verschluesselung fehlgeschlagen: {0}")]
    Verschluesselung(String),

    #[error("Ungueltige Schluessel-Laenge: erwartet {erwartet}, erhalten {erhalten}")]
    UngueltigeSchluesselLaenge { erwartet: usize, erhalten: usize },
}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Grund, aus dem ein empfangenes Paket verworfen wurde
///
/// Medien sind verlustbehaftet: der Aufrufer protokolliert den Grund
/// hoechstens auf `trace`-Ebene und verarbeitet das naechste Paket.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Verworfen {
    #[error("Paket zu kurz: {laenge} Bytes (mindestens {mindestens})")]
    ZuKurz { laenge: usize, mindestens: usize },

    #[error("Ungueltiger RTP-Header: {0}")]
    Header(String),

    #[error("Authentifizierungs-Tag ungueltig")]
    Authentifizierung,

    #[error("Header-Erweiterung ({worte} Worte) laenger als Nutzdaten ({verfuegbar} Bytes)")]
    Erweiterung { worte: u16, verfuegbar: usize },
}

impl Verworfen {
    /// Kurzer, stabiler Name des Grunds (Metrik-Label)
    pub fn grund(&self) -> &'static str {
        match self {
            Self::ZuKurz { .. } => "zu_kurz",
            Self::Header(_) => "header",
            Self::Authentifizierung => "authentifizierung",
            Self::Erweiterung { .. } => "erweiterung",
        }
    }
}
