//! sprechfunk-cli – Bibliotheks-Root
//!
//! Deklariert die Client-Module und stellt den Ablauf fuer `main` bereit.

pub mod config;
pub mod wiedergabe;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};

use config::AppConfig;
use sprechfunk_core::VoiceEvent;
use sprechfunk_observability::VoiceMetrics;
use sprechfunk_session::{VoiceConnection, VoiceManager};
use sprechfunk_voice::SendeTakt;
use wiedergabe::FrameQuelle;

/// Hoechstens so viele Frames liegen in der Sende-Warteschlange
const VORLAUF_FRAMES: usize = 10;

/// Haelt den laufenden Client zusammen
pub struct App {
    pub config: AppConfig,
}

impl App {
    pub fn neu(config: AppConfig) -> Self {
        Self { config }
    }

    /// Verbindet, streamt bis Ende der Quelle, Ablauf der Dauer oder Ctrl-C
    /// und baut danach alles ab
    ///
    /// Reihenfolge:
    /// 1. Metriken und Sende-Takt anlegen
    /// 2. Sitzung ueber den VoiceManager aufbauen
    /// 3. Frames einspeisen
    /// 4. Trennen, Statistik und Metriken ausgeben
    pub async fn starten(self) -> Result<()> {
        let metriken = Arc::new(VoiceMetrics::neu()?);
        let takt = SendeTakt::mit_metriken(
            self.config.frame_dauer(),
            self.config.takt.vielfaches,
            metriken.clone(),
        );
        takt.starten();

        let manager = VoiceManager::new(takt.clone(), self.config.sitzungs_config())
            .mit_metriken(metriken.clone());

        let mut quelle = match &self.config.wiedergabe.frames_datei {
            Some(pfad) => FrameQuelle::aus_datei(pfad)?,
            None => FrameQuelle::Stille,
        };

        let daten = self.config.sitzungs_daten();
        tracing::info!(guild_id = %daten.guild_id, endpoint = %daten.endpoint, "Verbinde");
        let verbindung = manager.verbinden(daten).await?;
        let protokoll = tokio::spawn(ereignisse_protokollieren(verbindung.ereignisse()));

        let ergebnis = self.wiedergeben(&verbindung, &mut quelle).await;

        manager.alle_trennen().await;
        takt.stoppen();
        protokoll.abort();

        let statistik = takt.statistik();
        tracing::info!(
            takte = statistik.takte,
            frames = statistik.frames,
            nachgeholt = statistik.nachgeholt,
            "Sende-Takt beendet"
        );
        match metriken.exportieren() {
            Ok(text) => tracing::info!(metriken = %text, "Metriken beim Beenden"),
            Err(e) => tracing::warn!(fehler = %e, "Metriken nicht exportierbar"),
        }
        ergebnis
    }

    async fn wiedergeben(&self, verbindung: &VoiceConnection, quelle: &mut FrameQuelle) -> Result<()> {
        let frame_dauer = self.config.frame_dauer();
        let ende = self.config.wiedergabe_dauer().map(|d| Instant::now() + d);
        let mut tick = tokio::time::interval(frame_dauer);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let abbruch = tokio::signal::ctrl_c();
        tokio::pin!(abbruch);

        loop {
            tokio::select! {
                _ = &mut abbruch => {
                    tracing::info!("Shutdown-Signal empfangen");
                    return Ok(());
                }
                _ = schlafen_bis(ende) => {
                    tracing::info!("Wiedergabe-Dauer erreicht");
                    return Ok(());
                }
                _ = tick.tick() => {
                    if verbindung.status().ist_terminal() {
                        anyhow::bail!("Sitzung wurde beendet");
                    }
                    if verbindung.warteschlange_laenge() >= VORLAUF_FRAMES {
                        continue;
                    }
                    let Some(frame) = quelle.naechster() else {
                        tracing::info!("Frame-Dump vollstaendig gesendet");
                        // Warteschlange und Stille-Nachlauf abwarten
                        tokio::time::sleep(frame_dauer * (VORLAUF_FRAMES as u32 + 5)).await;
                        return Ok(());
                    };
                    verbindung.frame_senden(frame)?;
                }
            }
        }
    }
}

async fn schlafen_bis(ende: Option<Instant>) {
    match ende {
        Some(ende) => tokio::time::sleep_until(ende).await,
        None => std::future::pending().await,
    }
}

async fn ereignisse_protokollieren(mut rx: broadcast::Receiver<VoiceEvent>) {
    loop {
        match rx.recv().await {
            Ok(VoiceEvent::Latenz { quelle, rtt }) => {
                tracing::debug!(quelle = ?quelle, rtt_ms = rtt.as_millis() as u64, "Latenz");
            }
            Ok(VoiceEvent::Sprechen { .. }) => {}
            Ok(VoiceEvent::Fehler(e)) => tracing::warn!(fehler = %e, "Sitzungsfehler"),
            Ok(ereignis) => {
                let terminal = ereignis.ist_terminal();
                tracing::info!(ereignis = ?ereignis, "Sitzungsereignis");
                if terminal {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!(verpasst = n, "Ereignisse uebersprungen");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
