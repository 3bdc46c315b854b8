//! Handle einer Sprachsitzung

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use sprechfunk_core::{GuildId, SitzungsId, VoiceError, VoiceEvent, VoiceResult};
use sprechfunk_observability::VoiceMetrics;
use sprechfunk_protocol::Sprechstatus;
use sprechfunk_voice::SendeTakt;

use crate::config::{SitzungsConfig, SitzungsDaten};
use crate::driver::{self, Befehl};
use crate::sender::Sendepfad;
use crate::state::Status;

/// Handle auf eine laufende Sitzung
///
/// Klone teilen sich denselben Treiber. Sobald alle Handles freigegeben
/// sind, baut der Treiber die Sitzung ab. Nach `Zerstoert` scheitert jeder
/// Aufruf mit [`VoiceError::Zerstoert`].
#[derive(Clone)]
pub struct VoiceConnection {
    guild_id: GuildId,
    id: SitzungsId,
    befehle: mpsc::UnboundedSender<Befehl>,
    sendepfad: Arc<Sendepfad>,
    ereignisse: broadcast::Sender<VoiceEvent>,
    status: watch::Receiver<Status>,
}

impl VoiceConnection {
    pub(crate) fn neu(
        guild_id: GuildId,
        id: SitzungsId,
        befehle: mpsc::UnboundedSender<Befehl>,
        sendepfad: Arc<Sendepfad>,
        ereignisse: broadcast::Sender<VoiceEvent>,
        status: watch::Receiver<Status>,
    ) -> Self {
        Self {
            guild_id,
            id,
            befehle,
            sendepfad,
            ereignisse,
            status,
        }
    }

    /// Baut eine Sitzung auf und wartet, bis sie `Bereit` ist
    ///
    /// Jeder Fehler vor dem ersten `Bereit` (Discovery, Close-Code,
    /// Zeitueberschreitung) beendet die Sitzung und wird hier zurueckgegeben.
    pub async fn verbinden(
        daten: SitzungsDaten,
        config: SitzungsConfig,
        takt: SendeTakt,
        metriken: Option<Arc<VoiceMetrics>>,
    ) -> VoiceResult<Self> {
        daten.pruefen()?;
        let (verbindung, bereit) = driver::starten(daten, config, takt, metriken);
        match bereit.await {
            Ok(Ok(ssrc)) => {
                tracing::debug!(guild_id = %verbindung.guild_id, ssrc, "Verbindung hergestellt");
                Ok(verbindung)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(VoiceError::Zerstoert),
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn id(&self) -> SitzungsId {
        self.id
    }

    /// Abonniert die Ereignisse der Sitzung ab jetzt
    pub fn ereignisse(&self) -> broadcast::Receiver<VoiceEvent> {
        self.ereignisse.subscribe()
    }

    pub fn status(&self) -> Status {
        *self.status.borrow()
    }

    /// Beobachter fuer Statuswechsel
    pub fn status_beobachten(&self) -> watch::Receiver<Status> {
        self.status.clone()
    }

    fn ist_zerstoert(&self) -> bool {
        self.status().ist_terminal() || self.sendepfad.ist_zerstoert()
    }

    /// Baut die Sitzung endgueltig ab und wartet auf den Abschluss
    pub async fn trennen(&self) -> VoiceResult<()> {
        if self.ist_zerstoert() {
            return Err(VoiceError::Zerstoert);
        }
        let (tx, rx) = oneshot::channel();
        if self.befehle.send(Befehl::Trennen(tx)).is_err() {
            return Err(VoiceError::Zerstoert);
        }
        // Treiber kann sich parallel beendet haben, Ergebnis ist dasselbe
        let _ = rx.await;
        Ok(())
    }

    /// Baut die Sitzung mit neuen Zugangsdaten neu auf (z.B. nach
    /// `Getrennt` oder einem Kanalwechsel)
    pub async fn erneut_beitreten(&self, daten: SitzungsDaten) -> VoiceResult<u32> {
        if self.ist_zerstoert() {
            return Err(VoiceError::Zerstoert);
        }
        daten.pruefen()?;
        if daten.guild_id != self.guild_id {
            return Err(VoiceError::Konfiguration(format!(
                "Sitzung gehoert zu {}, nicht zu {}",
                self.guild_id, daten.guild_id
            )));
        }
        let (tx, rx) = oneshot::channel();
        self.befehle
            .send(Befehl::ErneutBeitreten(daten, tx))
            .map_err(|_| VoiceError::Zerstoert)?;
        rx.await.map_err(|_| VoiceError::Zerstoert)?
    }

    /// Setzt den eigenen Sprechstatus, Wiederholungen senden nichts
    pub fn sprechen_setzen(&self, status: Sprechstatus) -> VoiceResult<()> {
        self.sendepfad.sprechen_setzen(status).map(|_| ())
    }

    pub fn sprechstatus(&self) -> Sprechstatus {
        self.sendepfad.sprechstatus()
    }

    /// Reiht einen Opus-Frame (20 ms) zum Senden ein
    pub fn frame_senden(&self, frame: Bytes) -> VoiceResult<()> {
        self.sendepfad.einreihen(frame)
    }

    /// Anzahl noch nicht gesendeter Frames
    pub fn warteschlange_laenge(&self) -> usize {
        self.sendepfad.laenge()
    }
}

impl std::fmt::Debug for VoiceConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceConnection")
            .field("guild_id", &self.guild_id)
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}
