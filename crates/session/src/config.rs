//! Sitzungsdaten und Laufzeit-Parameter

use std::time::Duration;

use sprechfunk_core::{GuildId, UserId, VoiceError, VoiceResult};
use sprechfunk_protocol::control::{GatewayNachricht, Identify, Resume};

/// Zugangsdaten einer Sprachsitzung
///
/// Stammen vom Haupt-Gateway der Anwendung (Voice State/Server Update)
/// und werden hier nur durchgereicht.
#[derive(Clone, PartialEq, Eq)]
pub struct SitzungsDaten {
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub session_id: String,
    /// Voice-Endpunkt, mit oder ohne `wss://`
    pub endpoint: String,
    pub token: String,
}

impl SitzungsDaten {
    /// Prueft, dass alle Pflichtfelder gesetzt sind
    pub fn pruefen(&self) -> VoiceResult<()> {
        for (feld, wert) in [
            ("session_id", &self.session_id),
            ("endpoint", &self.endpoint),
            ("token", &self.token),
        ] {
            if wert.trim().is_empty() {
                return Err(VoiceError::Konfiguration(format!("{feld} ist leer")));
            }
        }
        Ok(())
    }

    pub(crate) fn identify(&self) -> GatewayNachricht {
        GatewayNachricht::Identify(Identify {
            server_id: self.guild_id,
            user_id: self.user_id,
            session_id: self.session_id.clone(),
            token: self.token.clone(),
        })
    }

    pub(crate) fn resume(&self) -> GatewayNachricht {
        GatewayNachricht::Resume(Resume {
            server_id: self.guild_id,
            session_id: self.session_id.clone(),
            token: self.token.clone(),
        })
    }
}

impl std::fmt::Debug for SitzungsDaten {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SitzungsDaten")
            .field("guild_id", &self.guild_id)
            .field("user_id", &self.user_id)
            .field("session_id", &self.session_id)
            .field("endpoint", &self.endpoint)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Zeitlimits und Wiederholungsstrategie einer Sitzung
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitzungsConfig {
    /// Wartezeit auf ein Heartbeat-Ack des Gateways
    pub heartbeat_timeout: Duration,
    /// Obergrenze fuer Verbindungsaufbau bis `Bereit`, je Versuch
    pub verbindungs_timeout: Duration,
    /// Wartezeit auf die Discovery-Antwort
    pub entdeckung_timeout: Duration,
    /// Wiederaufnahme-Versuche bevor die Sitzung als getrennt gilt
    pub max_wiederholungen: u32,
    /// Wartezeit vor dem ersten Versuch, verdoppelt sich je Versuch
    pub backoff_basis: Duration,
    pub backoff_max: Duration,
    /// Abstand der UDP-Keepalives, zugleich Leerlauf-Grenze fuer den
    /// Sprechstatus
    pub udp_keepalive_intervall: Duration,
    /// WebSocket-Ping, `None` schaltet ihn ab
    pub ws_ping_intervall: Option<Duration>,
    /// Maximale Anzahl wartender Frames, aelteste werden verworfen
    pub warteschlange_max: usize,
}

impl Default for SitzungsConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(5),
            verbindungs_timeout: Duration::from_secs(20),
            entdeckung_timeout: Duration::from_secs(2),
            max_wiederholungen: 5,
            backoff_basis: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            udp_keepalive_intervall: Duration::from_secs(5),
            ws_ping_intervall: Some(Duration::from_secs(15)),
            warteschlange_max: 500,
        }
    }
}

impl SitzungsConfig {
    /// Wartezeit vor Versuch `versuch` (ab 0)
    pub fn backoff(&self, versuch: u32) -> Duration {
        let faktor = 1u32 << versuch.min(16);
        self.backoff_basis
            .saturating_mul(faktor)
            .min(self.backoff_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn daten() -> SitzungsDaten {
        SitzungsDaten {
            guild_id: GuildId(10),
            user_id: UserId(20),
            session_id: "abc".into(),
            endpoint: "voice.example:443".into(),
            token: "geheim".into(),
        }
    }

    #[test]
    fn backoff_verdoppelt_bis_maximum() {
        let c = SitzungsConfig::default();
        assert_eq!(c.backoff(0), Duration::from_secs(1));
        assert_eq!(c.backoff(1), Duration::from_secs(2));
        assert_eq!(c.backoff(4), Duration::from_secs(16));
        assert_eq!(c.backoff(5), Duration::from_secs(30));
        assert_eq!(c.backoff(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn leere_felder_abgelehnt() {
        assert!(daten().pruefen().is_ok());
        let mut d = daten();
        d.token = " ".into();
        assert!(matches!(d.pruefen(), Err(VoiceError::Konfiguration(_))));
    }

    #[test]
    fn token_nicht_im_debug() {
        let text = format!("{:?}", daten());
        assert!(!text.contains("geheim"));
        assert!(text.contains("REDACTED"));
    }

    #[test]
    fn identify_und_resume_tragen_sitzung() {
        let d = daten();
        assert_eq!(d.identify().opcode(), 0);
        match d.resume() {
            GatewayNachricht::Resume(r) => {
                assert_eq!(r.session_id, "abc");
                assert_eq!(r.server_id, GuildId(10));
            }
            andere => panic!("Erwartet Resume, erhalten {andere:?}"),
        }
    }
}
