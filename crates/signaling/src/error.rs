//! Fehlertypen der Signalisierung

use sprechfunk_core::VoiceError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Fehlertyp der Signalisierung
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Aufbau oder Betrieb der WebSocket-Verbindung fehlgeschlagen
    #[error("WebSocket-Fehler: {0}")]
    WebSocket(String),

    /// Nachricht konnte nicht serialisiert werden
    #[error("Serialisierungsfehler: {0}")]
    Serialisierung(#[from] serde_json::Error),

    /// Ungueltige Endpunkt-Adresse
    #[error("Ungueltiger Endpunkt: {0}")]
    Endpunkt(String),

    /// Pump-Task beendet, Verbindung ist weg
    #[error("Verbindung getrennt")]
    VerbindungGetrennt,

    /// Kanal wurde mit `zerstoeren` geschlossen
    #[error("Signalkanal wurde zerstoert")]
    Zerstoert,
}

impl From<tungstenite::Error> for SignalingError {
    fn from(e: tungstenite::Error) -> Self {
        Self::WebSocket(e.to_string())
    }
}

impl From<SignalingError> for VoiceError {
    fn from(e: SignalingError) -> Self {
        match e {
            SignalingError::Zerstoert => VoiceError::Zerstoert,
            SignalingError::Serialisierung(e) => VoiceError::Protokoll(e.to_string()),
            SignalingError::Endpunkt(e) => VoiceError::Konfiguration(e),
            andere => VoiceError::Signalisierung(andere.to_string()),
        }
    }
}

/// Result-Typ der Signalisierung
pub type SignalingResult<T> = Result<T, SignalingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zerstoert_bleibt_zerstoert() {
        let v: VoiceError = SignalingError::Zerstoert.into();
        assert_eq!(v, VoiceError::Zerstoert);
        assert!(!v.ist_wiederholbar());
    }

    #[test]
    fn verbindungsfehler_ist_wiederholbar() {
        let v: VoiceError = SignalingError::VerbindungGetrennt.into();
        assert!(v.ist_wiederholbar());
    }

    #[test]
    fn endpunkt_ist_konfigurationsfehler() {
        let v: VoiceError = SignalingError::Endpunkt("ftp://x".into()).into();
        assert!(matches!(v, VoiceError::Konfiguration(_)));
        assert!(!v.ist_wiederholbar());
    }
}
