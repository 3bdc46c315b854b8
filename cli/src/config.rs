//! Client-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Bis auf die
//! Zugangsdaten in `[verbindung]` haben alle Felder Standardwerte.

use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use sprechfunk_core::{GuildId, UserId};
use sprechfunk_observability::logging::{log_format_gueltig, log_level_gueltig};
use sprechfunk_session::{SitzungsConfig, SitzungsDaten};

/// Vollstaendige Client-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Zugangsdaten vom Haupt-Gateway
    pub verbindung: VerbindungsEinstellungen,
    /// Zeitlimits und Wiederholungen
    pub sitzung: SitzungsEinstellungen,
    /// Sende-Takt
    pub takt: TaktEinstellungen,
    pub logging: LoggingEinstellungen,
    /// Was gesendet wird
    pub wiedergabe: WiedergabeEinstellungen,
}

/// Zugangsdaten einer Sprachsitzung
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VerbindungsEinstellungen {
    /// Voice-Endpunkt aus dem Voice Server Update
    pub endpoint: String,
    pub token: String,
    pub session_id: String,
    pub guild_id: u64,
    pub user_id: u64,
}

impl std::fmt::Debug for VerbindungsEinstellungen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerbindungsEinstellungen")
            .field("endpoint", &self.endpoint)
            .field("token", &"[REDACTED]")
            .field("session_id", &self.session_id)
            .field("guild_id", &self.guild_id)
            .field("user_id", &self.user_id)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SitzungsEinstellungen {
    pub heartbeat_timeout_ms: u64,
    pub verbindungs_timeout_ms: u64,
    pub max_wiederholungen: u32,
    /// Abstand der UDP-Keepalives
    pub keepalive_intervall_ms: u64,
}

impl Default for SitzungsEinstellungen {
    fn default() -> Self {
        let standard = SitzungsConfig::default();
        Self {
            heartbeat_timeout_ms: standard.heartbeat_timeout.as_millis() as u64,
            verbindungs_timeout_ms: standard.verbindungs_timeout.as_millis() as u64,
            max_wiederholungen: standard.max_wiederholungen,
            keepalive_intervall_ms: standard.udp_keepalive_intervall.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaktEinstellungen {
    /// Dauer eines Opus-Frames
    pub frame_dauer_ms: u64,
    /// Frames pro Takt
    pub vielfaches: u32,
}

impl Default for TaktEinstellungen {
    fn default() -> Self {
        Self {
            frame_dauer_ms: 20,
            vielfaches: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WiedergabeEinstellungen {
    /// Frame-Dump (u16-LE-Laenge + Opus-Frame), ohne Datei wird Stille gesendet
    pub frames_datei: Option<String>,
    /// Laufzeit in Sekunden, 0 = bis Ctrl-C
    pub dauer_sekunden: u64,
}

impl AppConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Prueft Werte, die serde allein nicht abfangen kann
    pub fn pruefen(&self) -> anyhow::Result<()> {
        if !log_level_gueltig(&self.logging.level) {
            bail!("Ungueltiges Log-Level: {}", self.logging.level);
        }
        if !log_format_gueltig(&self.logging.format) {
            bail!("Ungueltiges Log-Format: {}", self.logging.format);
        }
        if self.takt.frame_dauer_ms == 0 {
            bail!("takt.frame_dauer_ms muss groesser als 0 sein");
        }
        if self.takt.vielfaches == 0 {
            bail!("takt.vielfaches muss mindestens 1 sein");
        }
        self.sitzungs_daten()
            .pruefen()
            .context("Abschnitt [verbindung] unvollstaendig")?;
        Ok(())
    }

    pub fn sitzungs_daten(&self) -> SitzungsDaten {
        let v = &self.verbindung;
        SitzungsDaten {
            guild_id: GuildId(v.guild_id),
            user_id: UserId(v.user_id),
            session_id: v.session_id.clone(),
            endpoint: v.endpoint.clone(),
            token: v.token.clone(),
        }
    }

    pub fn sitzungs_config(&self) -> SitzungsConfig {
        let s = &self.sitzung;
        SitzungsConfig {
            heartbeat_timeout: Duration::from_millis(s.heartbeat_timeout_ms),
            verbindungs_timeout: Duration::from_millis(s.verbindungs_timeout_ms),
            max_wiederholungen: s.max_wiederholungen,
            udp_keepalive_intervall: Duration::from_millis(s.keepalive_intervall_ms),
            ..SitzungsConfig::default()
        }
    }

    pub fn frame_dauer(&self) -> Duration {
        Duration::from_millis(self.takt.frame_dauer_ms)
    }

    /// Laufzeit der Wiedergabe, `None` = unbegrenzt
    pub fn wiedergabe_dauer(&self) -> Option<Duration> {
        match self.wiedergabe.dauer_sekunden {
            0 => None,
            s => Some(Duration::from_secs(s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_entspricht_sitzungs_standard() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.takt.frame_dauer_ms, 20);
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.sitzungs_config(), SitzungsConfig::default());
        assert_eq!(cfg.wiedergabe_dauer(), None);
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [verbindung]
            endpoint = "eu-west1.discord.media:443"
            token = "abc"
            session_id = "s1"
            guild_id = 41771983423143937
            user_id = 7

            [sitzung]
            max_wiederholungen = 2

            [wiedergabe]
            dauer_sekunden = 30
        "#;
        let cfg: AppConfig = toml::from_str(toml).unwrap();
        assert!(cfg.pruefen().is_ok());
        assert_eq!(cfg.sitzungs_daten().guild_id, GuildId(41771983423143937));
        assert_eq!(cfg.sitzungs_config().max_wiederholungen, 2);
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.sitzung.heartbeat_timeout_ms, 5000);
        assert_eq!(cfg.wiedergabe_dauer(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn ungueltige_werte_abgelehnt() {
        let mut cfg: AppConfig = toml::from_str(
            r#"
            [verbindung]
            endpoint = "host"
            token = "t"
            session_id = "s"
        "#,
        )
        .unwrap();
        assert!(cfg.pruefen().is_ok());

        cfg.logging.level = "laut".into();
        assert!(cfg.pruefen().is_err());
        cfg.logging.level = "debug".into();
        cfg.takt.vielfaches = 0;
        assert!(cfg.pruefen().is_err());
    }

    #[test]
    fn fehlende_zugangsdaten_abgelehnt() {
        let fehler = AppConfig::default().pruefen().unwrap_err();
        assert!(format!("{fehler:#}").contains("session_id ist leer"));
    }

    #[test]
    fn token_nicht_im_debug() {
        let mut cfg = AppConfig::default();
        cfg.verbindung.token = "supergeheim".into();
        assert!(!format!("{cfg:?}").contains("supergeheim"));
    }

    #[test]
    fn fehlende_datei_liefert_standard() {
        let cfg = AppConfig::laden("/nicht/vorhanden/sprechfunk.toml").unwrap();
        assert_eq!(cfg.takt.vielfaches, 1);
    }
}
