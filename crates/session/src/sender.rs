//! Sendepfad einer Sitzung
//!
//! Gemeinsamer Zustand zwischen Aufrufer-Handle, Treiber und Sende-Takt:
//! die Frame-Warteschlange, der Sprechstatus und (sobald `Bereit`) Framer
//! und Transport. Der Sende-Takt sieht nur die `AudioQuelle`-Sicht.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use sprechfunk_core::{VoiceError, VoiceEvent, VoiceResult};
use sprechfunk_crypto::{RtpFramer, RtpSequenz};
use sprechfunk_observability::VoiceMetrics;
use sprechfunk_protocol::codec::{STILLE_FRAME, STILLE_FRAMES_NACHLAUF};
use sprechfunk_protocol::Sprechstatus;
use sprechfunk_voice::{AudioQuelle, MedienTransport};

/// Verschluesselung und Socket der Medienstrecke
pub(crate) struct Medienpfad {
    pub framer: RtpFramer,
    pub sequenz: RtpSequenz,
    pub transport: Arc<MedienTransport>,
}

pub(crate) struct Sendepfad {
    warteschlange: Mutex<VecDeque<Bytes>>,
    max: usize,
    uebergelaufen: AtomicU64,
    stille_rest: AtomicU8,
    bereit: AtomicBool,
    zerstoert: AtomicBool,
    medien: Mutex<Option<Medienpfad>>,
    sprechstatus: Mutex<Sprechstatus>,
    letzte_aktivitaet: Mutex<Option<Instant>>,
    sprech_tx: mpsc::UnboundedSender<Sprechstatus>,
    ereignisse: broadcast::Sender<VoiceEvent>,
    metriken: Option<Arc<VoiceMetrics>>,
}

impl Sendepfad {
    pub(crate) fn new(
        max: usize,
        sprech_tx: mpsc::UnboundedSender<Sprechstatus>,
        ereignisse: broadcast::Sender<VoiceEvent>,
        metriken: Option<Arc<VoiceMetrics>>,
    ) -> Self {
        Self {
            warteschlange: Mutex::new(VecDeque::with_capacity(max.min(64))),
            max: max.max(1),
            uebergelaufen: AtomicU64::new(0),
            stille_rest: AtomicU8::new(0),
            bereit: AtomicBool::new(false),
            zerstoert: AtomicBool::new(false),
            medien: Mutex::new(None),
            sprechstatus: Mutex::new(Sprechstatus::Deaktiviert),
            letzte_aktivitaet: Mutex::new(None),
            sprech_tx,
            ereignisse,
            metriken,
        }
    }

    /// Reiht einen Opus-Frame ein, bei voller Warteschlange faellt der
    /// aelteste heraus
    pub(crate) fn einreihen(&self, frame: Bytes) -> VoiceResult<()> {
        if self.zerstoert.load(Ordering::Acquire) {
            return Err(VoiceError::Zerstoert);
        }
        let mut ws = self.warteschlange.lock();
        if ws.len() >= self.max {
            ws.pop_front();
            let n = self.uebergelaufen.fetch_add(1, Ordering::Relaxed) + 1;
            if let Some(m) = &self.metriken {
                m.warteschlange_verworfen_total.inc();
            }
            if n == 1 || n % 100 == 0 {
                tracing::debug!(verworfen = n, "Sende-Warteschlange voll, aeltester Frame verworfen");
            }
        }
        ws.push_back(frame);
        Ok(())
    }

    pub(crate) fn laenge(&self) -> usize {
        self.warteschlange.lock().len()
    }

    /// Setzt den Sprechstatus. Gibt true zurueck wenn er sich geaendert hat.
    pub(crate) fn sprechen_setzen(&self, neu: Sprechstatus) -> VoiceResult<bool> {
        if self.zerstoert.load(Ordering::Acquire) {
            return Err(VoiceError::Zerstoert);
        }
        Ok(self.status_wechseln(neu))
    }

    fn status_wechseln(&self, neu: Sprechstatus) -> bool {
        {
            let mut status = self.sprechstatus.lock();
            if *status == neu {
                return false;
            }
            *status = neu;
        }
        if neu.ist_aktiv() {
            *self.letzte_aktivitaet.lock() = Some(Instant::now());
        }
        // Fehlschlag nur wenn der Treiber schon beendet ist
        let _ = self.sprech_tx.send(neu);
        true
    }

    pub(crate) fn sprechstatus(&self) -> Sprechstatus {
        *self.sprechstatus.lock()
    }

    /// True wenn der Sprechstatus gesetzt ist, aber seit mindestens
    /// `intervall` kein Frame mehr kam
    pub(crate) fn leerlauf_laenger_als(&self, intervall: Duration, jetzt: Instant) -> bool {
        if !self.sprechstatus().ist_aktiv() {
            return false;
        }
        match *self.letzte_aktivitaet.lock() {
            Some(zuletzt) => jetzt.saturating_duration_since(zuletzt) >= intervall,
            None => true,
        }
    }

    pub(crate) fn medien_setzen(&self, medien: Option<Medienpfad>) {
        *self.medien.lock() = medien;
    }

    pub(crate) fn bereit_setzen(&self, bereit: bool) {
        self.bereit.store(bereit, Ordering::Release);
    }

    /// Endgueltiger Abbau: Warteschlange leeren, alle weiteren Aufrufe
    /// scheitern mit `Zerstoert`
    pub(crate) fn abbauen(&self) {
        self.zerstoert.store(true, Ordering::Release);
        self.bereit.store(false, Ordering::Release);
        self.warteschlange.lock().clear();
        self.stille_rest.store(0, Ordering::Relaxed);
        self.medien.lock().take();
    }

    pub(crate) fn ist_zerstoert(&self) -> bool {
        self.zerstoert.load(Ordering::Acquire)
    }
}

impl AudioQuelle for Sendepfad {
    fn sendet_aktiv(&self) -> bool {
        self.bereit.load(Ordering::Acquire)
            && !self.zerstoert.load(Ordering::Acquire)
            && (!self.warteschlange.lock().is_empty()
                || self.stille_rest.load(Ordering::Relaxed) > 0)
    }

    fn naechster_frame(&self) -> Option<Bytes> {
        let frame = self.warteschlange.lock().pop_front();
        if let Some(frame) = frame {
            self.stille_rest
                .store(STILLE_FRAMES_NACHLAUF, Ordering::Relaxed);
            *self.letzte_aktivitaet.lock() = Some(Instant::now());
            if self.sprechstatus() == Sprechstatus::Deaktiviert {
                self.status_wechseln(Sprechstatus::Aktiviert);
            }
            return Some(frame);
        }

        let rest = self.stille_rest.load(Ordering::Relaxed);
        if rest == 0 {
            return None;
        }
        self.stille_rest.store(rest - 1, Ordering::Relaxed);
        Some(Bytes::from_static(&STILLE_FRAME))
    }

    fn frame_senden(&self, frame: &[u8]) {
        let mut medien = self.medien.lock();
        let Some(pfad) = medien.as_mut() else {
            return;
        };
        let paket = match pfad.framer.encode(frame, &mut pfad.sequenz) {
            Ok(paket) => paket,
            Err(e) => {
                tracing::warn!(fehler = %e, "Frame konnte nicht verschluesselt werden");
                return;
            }
        };
        match pfad.transport.senden(&paket) {
            Ok(()) => {
                if let Some(m) = &self.metriken {
                    m.frames_gesendet_total.inc();
                }
            }
            Err(e) => {
                let _ = self.ereignisse.send(VoiceEvent::Fehler(e.into()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pfad(max: usize) -> (Sendepfad, mpsc::UnboundedReceiver<Sprechstatus>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ereignisse, _) = broadcast::channel(8);
        (Sendepfad::new(max, tx, ereignisse, None), rx)
    }

    #[test]
    fn sprechstatus_nur_bei_aenderung() {
        let (p, mut rx) = pfad(10);
        assert!(p.sprechen_setzen(Sprechstatus::Aktiviert).unwrap());
        assert!(!p.sprechen_setzen(Sprechstatus::Aktiviert).unwrap());
        assert!(p.sprechen_setzen(Sprechstatus::Prioritaet).unwrap());
        assert_eq!(rx.try_recv().unwrap(), Sprechstatus::Aktiviert);
        assert_eq!(rx.try_recv().unwrap(), Sprechstatus::Prioritaet);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn erster_frame_aktiviert_sprechen() {
        let (p, mut rx) = pfad(10);
        p.einreihen(Bytes::from_static(b"opus")).unwrap();
        assert_eq!(p.naechster_frame().unwrap(), Bytes::from_static(b"opus"));
        assert_eq!(p.sprechstatus(), Sprechstatus::Aktiviert);
        assert_eq!(rx.try_recv().unwrap(), Sprechstatus::Aktiviert);
    }

    #[test]
    fn volle_warteschlange_verwirft_aeltesten() {
        let metriken = Arc::new(VoiceMetrics::neu().unwrap());
        let (tx, _rx) = mpsc::unbounded_channel();
        let (ereignisse, _) = broadcast::channel(8);
        let p = Sendepfad::new(3, tx, ereignisse, Some(metriken.clone()));
        for i in 0..5u8 {
            p.einreihen(Bytes::from(vec![i])).unwrap();
        }
        assert_eq!(p.laenge(), 3);
        assert_eq!(metriken.warteschlange_verworfen_total.get(), 2.0);
        assert_eq!(p.naechster_frame().unwrap()[0], 2);
    }

    #[test]
    fn stille_nachlauf_nach_leerer_warteschlange() {
        let (p, _rx) = pfad(10);
        p.bereit_setzen(true);
        assert!(!p.sendet_aktiv());
        p.einreihen(Bytes::from_static(b"a")).unwrap();
        assert!(p.sendet_aktiv());
        assert_eq!(p.naechster_frame().unwrap(), Bytes::from_static(b"a"));

        for _ in 0..STILLE_FRAMES_NACHLAUF {
            assert!(p.sendet_aktiv());
            assert_eq!(p.naechster_frame().unwrap().as_ref(), &STILLE_FRAME);
        }
        assert!(!p.sendet_aktiv());
        assert!(p.naechster_frame().is_none());
    }

    #[test]
    fn nicht_bereit_sendet_nicht() {
        let (p, _rx) = pfad(10);
        p.einreihen(Bytes::from_static(b"a")).unwrap();
        assert!(!p.sendet_aktiv());
        p.bereit_setzen(true);
        assert!(p.sendet_aktiv());
    }

    #[test]
    fn nach_abbau_zerstoert() {
        let (p, _rx) = pfad(10);
        p.einreihen(Bytes::from_static(b"a")).unwrap();
        p.abbauen();
        assert_eq!(p.laenge(), 0);
        assert!(matches!(
            p.einreihen(Bytes::from_static(b"b")),
            Err(VoiceError::Zerstoert)
        ));
        assert!(matches!(
            p.sprechen_setzen(Sprechstatus::Aktiviert),
            Err(VoiceError::Zerstoert)
        ));
    }

    #[test]
    fn leerlauf_erkennung() {
        let (p, _rx) = pfad(10);
        let jetzt = Instant::now();
        let intervall = Duration::from_secs(5);
        assert!(!p.leerlauf_laenger_als(intervall, jetzt));

        p.einreihen(Bytes::from_static(b"a")).unwrap();
        p.naechster_frame();
        let start = Instant::now();
        assert!(!p.leerlauf_laenger_als(intervall, start));
        assert!(p.leerlauf_laenger_als(intervall, start + Duration::from_secs(6)));
    }
}
