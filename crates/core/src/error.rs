//! Fehlertypen fuer Sprechfunk
//!
//! Die Taxonomie trennt vier Fehlerklassen: Transport, Protokoll,
//! Lebendigkeit und Kryptografie. Fehler einzelner Pakete erscheinen hier
//! nicht, sie werden an der Komponentengrenze als verworfene Pakete
//! behandelt.
//!
//! Alle Varianten sind `Clone`, damit sie ueber den Ereignis-Broadcast
//! an mehrere Abonnenten verteilt werden koennen.

use thiserror::Error;

/// Globaler Result-Alias fuer Sprechfunk
pub type VoiceResult<T> = std::result::Result<T, VoiceError>;

/// Fehler der UDP-Medienstrecke
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportFehler {
    /// Discovery hat keine Antwort erhalten oder der Socket ist vorher
    /// ausgefallen. Fast immer blockiert eine Firewall oder ein NAT den
    /// UDP-Verkehr.
    #[error(
        "IP-Discovery zu {adresse} fehlgeschlagen ({grund}), \
         bitte Firewall/NAT-Konfiguration fuer ausgehendes UDP pruefen"
    )]
    FirewallOderNat { adresse: String, grund: String },

    #[error("Ungueltige Discovery-Antwort: {0}")]
    UngueltigeAntwort(String),

    #[error("UDP-Socket Fehler: {0}")]
    Socket(String),

    #[error("UDP-Keepalive verloren nach {verpasst} verpassten Antworten")]
    KeepaliveVerloren { verpasst: u32 },

    #[error("Transport geschlossen")]
    Geschlossen,
}

impl From<std::io::Error> for TransportFehler {
    fn from(e: std::io::Error) -> Self {
        Self::Socket(e.to_string())
    }
}

/// Alle Fehler, die eine Sprachsitzung nach aussen meldet
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoiceError {
    // --- Transport ---
    #[error(transparent)]
    Transport(#[from] TransportFehler),

    // --- Signalisierung & Protokoll ---
    #[error("Signalisierungsfehler: {0}")]
    Signalisierung(String),

    #[error("Protokollfehler: {0}")]
    Protokoll(String),

    #[error("Authentifizierung am Voice-Server fehlgeschlagen (Code {code}): {grund}")]
    Authentifizierung { code: u16, grund: String },

    #[error("Verbindung vom Voice-Server endgueltig abgelehnt (Code {code}): {grund}")]
    Abgelehnt { code: u16, grund: String },

    // --- Lebendigkeit ---
    #[error("Heartbeat verloren: {verpasst} aufeinanderfolgende Antworten ausgeblieben")]
    Lebendigkeit { verpasst: u32 },

    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitueberschreitung(String),

    // --- Kryptografie ---
    #[error("Kryptografiefehler: {0}")]
    Krypto(String),

    // --- Lebenszyklus ---
    #[error("Verbindung getrennt: {0}")]
    Getrennt(String),

    #[error("Sitzung wurde bereits zerstoert")]
    Zerstoert,

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),
}

impl VoiceError {
    /// Erstellt einen Protokollfehler aus einer beliebigen Nachricht
    pub fn protokoll(msg: impl Into<String>) -> Self {
        Self::Protokoll(msg.into())
    }

    /// Gibt true zurueck wenn ein erneuter Verbindungsversuch sinnvoll ist
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::Signalisierung(_)
                | Self::Lebendigkeit { .. }
                | Self::Zeitueberschreitung(_)
                | Self::Getrennt(_)
        )
    }

    /// Gibt true zurueck wenn der Fehler die Sitzung endgueltig beendet
    pub fn ist_fatal(&self) -> bool {
        matches!(
            self,
            Self::Authentifizierung { .. } | Self::Abgelehnt { .. } | Self::Zerstoert
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn firewall_diagnose_nennt_ursache() {
        let e = VoiceError::from(TransportFehler::FirewallOderNat {
            adresse: "10.0.0.1:50000".into(),
            grund: "keine Antwort".into(),
        });
        let text = e.to_string();
        assert!(text.contains("Firewall/NAT"));
        assert!(text.contains("10.0.0.1:50000"));
        assert!(e.ist_wiederholbar());
    }

    #[test]
    fn authentifizierung_ist_fatal() {
        let e = VoiceError::Authentifizierung {
            code: 4004,
            grund: "Token ungueltig".into(),
        };
        assert!(e.ist_fatal());
        assert!(!e.ist_wiederholbar());
    }

    #[test]
    fn lebendigkeit_ist_wiederholbar() {
        let e = VoiceError::Lebendigkeit { verpasst: 4 };
        assert!(e.ist_wiederholbar());
        assert!(!e.ist_fatal());
        assert!(e.to_string().contains('4'));
    }

    #[test]
    fn io_fehler_wird_socketfehler() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(
            TransportFehler::from(io),
            TransportFehler::Socket(s) if s.contains("reset")
        ));
    }
}
