//! VoiceManager – eine Sitzung pro Guild
//!
//! - DashMap fuer nebenlaeufigen Zugriff auf die Sitzungsliste
//! - Gemeinsamer Sende-Takt fuer alle Sitzungen
//! - Beim Verbinden wird eine bestehende Sitzung derselben Guild vorher
//!   getrennt

use std::sync::Arc;

use dashmap::DashMap;

use sprechfunk_core::{GuildId, VoiceResult};
use sprechfunk_observability::VoiceMetrics;
use sprechfunk_voice::SendeTakt;

use crate::config::{SitzungsConfig, SitzungsDaten};
use crate::connection::VoiceConnection;

pub struct VoiceManager {
    takt: SendeTakt,
    config: SitzungsConfig,
    verbindungen: DashMap<GuildId, VoiceConnection>,
    metriken: Option<Arc<VoiceMetrics>>,
}

impl VoiceManager {
    /// Erstellt einen Manager ueber einem bereits gebauten Sende-Takt
    pub fn new(takt: SendeTakt, config: SitzungsConfig) -> Self {
        Self {
            takt,
            config,
            verbindungen: DashMap::new(),
            metriken: None,
        }
    }

    pub fn mit_metriken(mut self, metriken: Arc<VoiceMetrics>) -> Self {
        self.metriken = Some(metriken);
        self
    }

    pub fn takt(&self) -> &SendeTakt {
        &self.takt
    }

    pub fn config(&self) -> &SitzungsConfig {
        &self.config
    }

    /// Verbindet mit dem Sprachkanal einer Guild
    ///
    /// Loest auf, sobald die Sitzung `Bereit` ist.
    pub async fn verbinden(&self, daten: SitzungsDaten) -> VoiceResult<VoiceConnection> {
        let guild_id = daten.guild_id;
        if let Some((_, alt)) = self.verbindungen.remove(&guild_id) {
            tracing::debug!(guild_id = %guild_id, "Ersetze bestehende Sitzung");
            let _ = alt.trennen().await;
            self.gauge_aktualisieren();
        }

        let verbindung = VoiceConnection::verbinden(
            daten,
            self.config.clone(),
            self.takt.clone(),
            self.metriken.clone(),
        )
        .await?;

        self.verbindungen.insert(guild_id, verbindung.clone());
        self.gauge_aktualisieren();
        tracing::info!(guild_id = %guild_id, aktiv = self.verbindungen.len(), "Sitzung verbunden");
        Ok(verbindung)
    }

    /// Trennt die Sitzung einer Guild. Gibt false zurueck wenn keine bestand.
    pub async fn trennen(&self, guild_id: GuildId) -> bool {
        let Some((_, verbindung)) = self.verbindungen.remove(&guild_id) else {
            return false;
        };
        let _ = verbindung.trennen().await;
        self.gauge_aktualisieren();
        tracing::info!(guild_id = %guild_id, "Sitzung getrennt");
        true
    }

    /// Aktive Sitzung einer Guild, zerstoerte Eintraege werden entfernt
    pub fn verbindung(&self, guild_id: GuildId) -> Option<VoiceConnection> {
        let verbindung = self.verbindungen.get(&guild_id)?.value().clone();
        if verbindung.status().ist_terminal() {
            self.verbindungen
                .remove_if(&guild_id, |_, v| v.id() == verbindung.id());
            self.gauge_aktualisieren();
            return None;
        }
        Some(verbindung)
    }

    /// Trennt alle Sitzungen
    pub async fn alle_trennen(&self) {
        let guilds: Vec<GuildId> = self.verbindungen.iter().map(|e| *e.key()).collect();
        for guild_id in guilds {
            self.trennen(guild_id).await;
        }
    }

    pub fn anzahl(&self) -> usize {
        self.verbindungen.len()
    }

    fn gauge_aktualisieren(&self) {
        if let Some(m) = &self.metriken {
            m.aktive_sitzungen.set(self.verbindungen.len() as f64);
        }
    }
}
