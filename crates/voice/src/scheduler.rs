//! Sende-Takt – ein Timer fuer alle Sitzungen
//!
//! Statt eines Timers pro Sitzung feuert ein einziger Task im Abstand von
//! `frame_dauer * vielfaches`. Bei jedem Takt wird aus der seit dem Start
//! vergangenen Zeit berechnet, wie viele Frames insgesamt faellig sind.
//! Jede aktive Quelle bekommt die Differenz zum letzten Takt. Kommt ein
//! Takt `k` Perioden zu spaet, gehen `k + 1` Frames als Burst raus, die
//! kumulierte Anzahl bleibt bei `vergangen / frame_dauer`.
//!
//! Nachgeholte Frames landen sofort in `sprechfunk_takt_nachholframes_total`,
//! sofern der Takt mit Metriken erstellt wurde.
//!
//! Die Registry haelt nur `Weak`-Referenzen. Tote Eintraege werden beim
//! naechsten Takt entfernt, registrieren und abmelden sind jederzeit
//! moeglich, auch waehrend ein Takt laeuft.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use sprechfunk_core::SitzungsId;
use sprechfunk_observability::VoiceMetrics;

/// Eine Sitzung aus Sicht des Sende-Takts
pub trait AudioQuelle: Send + Sync {
    /// Soll die Sitzung gerade Audio senden?
    fn sendet_aktiv(&self) -> bool;

    /// Naechster Frame, `None` beendet die Entnahme fuer diesen Takt
    fn naechster_frame(&self) -> Option<Bytes>;

    /// Verschluesselt und versendet einen Frame
    fn frame_senden(&self, frame: &[u8]);
}

/// Ergebnis eines einzelnen Takts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaktErgebnis {
    /// Seit dem vorherigen Takt faellige Frames pro Sitzung
    pub faellig: u64,
    /// Sitzungen, die in diesem Takt gesendet haben
    pub sitzungen: usize,
    /// Insgesamt versendete Frames
    pub frames: u64,
}

/// Kumulierte Zaehler seit Erstellung
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaktStatistik {
    pub takte: u64,
    pub frames: u64,
    /// Frames, die wegen verspaeteter Takte nachgeholt wurden
    pub nachgeholt: u64,
}

/// Gemeinsamer Sende-Takt. Klone teilen denselben Zustand.
#[derive(Clone)]
pub struct SendeTakt {
    inner: Arc<TaktInner>,
}

struct TaktInner {
    frame_dauer: Duration,
    vielfaches: u32,
    quellen: Mutex<BTreeMap<SitzungsId, Weak<dyn AudioQuelle>>>,
    zeit: Mutex<Zeitbasis>,
    task: Mutex<Option<JoinHandle<()>>>,
    takte: AtomicU64,
    frames: AtomicU64,
    nachgeholt: AtomicU64,
    metriken: Option<Arc<VoiceMetrics>>,
}

#[derive(Default)]
struct Zeitbasis {
    start: Option<Instant>,
    bisher: u64,
    // Wiederverwendete Puffer, kein Heap pro Takt
    schnappschuss: Vec<(SitzungsId, Weak<dyn AudioQuelle>)>,
    tot: Vec<SitzungsId>,
}

impl SendeTakt {
    /// Erstellt einen gestoppten Takt
    ///
    /// `vielfaches` wird auf mindestens 1 angehoben.
    pub fn new(frame_dauer: Duration, vielfaches: u32) -> Self {
        Self::bauen(frame_dauer, vielfaches, None)
    }

    /// Wie `new`, zaehlt nachgeholte Frames zusaetzlich in `metriken`
    pub fn mit_metriken(frame_dauer: Duration, vielfaches: u32, metriken: Arc<VoiceMetrics>) -> Self {
        Self::bauen(frame_dauer, vielfaches, Some(metriken))
    }

    fn bauen(frame_dauer: Duration, vielfaches: u32, metriken: Option<Arc<VoiceMetrics>>) -> Self {
        Self {
            inner: Arc::new(TaktInner {
                frame_dauer,
                vielfaches: vielfaches.max(1),
                quellen: Mutex::new(BTreeMap::new()),
                zeit: Mutex::new(Zeitbasis::default()),
                task: Mutex::new(None),
                takte: AtomicU64::new(0),
                frames: AtomicU64::new(0),
                nachgeholt: AtomicU64::new(0),
                metriken,
            }),
        }
    }

    /// Abstand zwischen zwei Takten
    pub fn periode(&self) -> Duration {
        self.inner.periode()
    }

    pub fn frame_dauer(&self) -> Duration {
        self.inner.frame_dauer
    }

    /// Meldet eine Quelle an. Eine bestehende Anmeldung wird ersetzt.
    pub fn registrieren(&self, id: SitzungsId, quelle: Weak<dyn AudioQuelle>) {
        let mut quellen = self.inner.quellen.lock();
        quellen.insert(id, quelle);
        tracing::debug!(sitzung = %id, quellen = quellen.len(), "Quelle im Sende-Takt registriert");
    }

    /// Meldet eine Quelle ab. Unbekannte IDs werden ignoriert.
    pub fn abmelden(&self, id: SitzungsId) {
        let mut quellen = self.inner.quellen.lock();
        if quellen.remove(&id).is_some() {
            tracing::debug!(sitzung = %id, quellen = quellen.len(), "Quelle abgemeldet");
        }
    }

    /// Anzahl registrierter Quellen (inklusive noch nicht bereinigter toter)
    pub fn anzahl(&self) -> usize {
        self.inner.quellen.lock().len()
    }

    /// Fuehrt einen Takt zum Zeitpunkt `jetzt` aus
    pub fn takt(&self, jetzt: Instant) -> TaktErgebnis {
        self.inner.takt(jetzt)
    }

    /// Startet den Timer-Task. Ist er schon aktiv, passiert nichts.
    pub fn starten(&self) {
        let mut task = self.inner.task.lock();
        if task.is_some() {
            return;
        }

        let periode = self.inner.periode();
        let schwach = Arc::downgrade(&self.inner);
        *task = Some(tokio::spawn(async move {
            let mut intervall = tokio::time::interval_at(Instant::now() + periode, periode);
            intervall.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                intervall.tick().await;
                let Some(inner) = schwach.upgrade() else {
                    break;
                };
                inner.takt(Instant::now());
            }
        }));
        tracing::info!(periode_ms = periode.as_millis() as u64, "Sende-Takt gestartet");
    }

    /// Stoppt den Timer-Task und setzt die Zeitbasis zurueck
    pub fn stoppen(&self) {
        if let Some(task) = self.inner.task.lock().take() {
            task.abort();
            tracing::info!("Sende-Takt gestoppt");
        }
        let mut zeit = self.inner.zeit.lock();
        zeit.start = None;
        zeit.bisher = 0;
    }

    pub fn laeuft(&self) -> bool {
        self.inner.task.lock().is_some()
    }

    pub fn statistik(&self) -> TaktStatistik {
        TaktStatistik {
            takte: self.inner.takte.load(Ordering::Relaxed),
            frames: self.inner.frames.load(Ordering::Relaxed),
            nachgeholt: self.inner.nachgeholt.load(Ordering::Relaxed),
        }
    }
}

impl TaktInner {
    fn periode(&self) -> Duration {
        self.frame_dauer * self.vielfaches
    }

    fn takt(&self, jetzt: Instant) -> TaktErgebnis {
        let mut zeit = self.zeit.lock();
        let zeit = &mut *zeit;

        // Erster Takt deckt genau eine Periode ab
        let start = *zeit.start.get_or_insert_with(|| {
            jetzt
                .checked_sub(self.periode())
                .unwrap_or(jetzt)
        });
        let vergangen = jetzt.saturating_duration_since(start);
        let gesamt = (vergangen.as_nanos() / self.frame_dauer.as_nanos().max(1)) as u64;
        let faellig = gesamt.saturating_sub(zeit.bisher);
        zeit.bisher = zeit.bisher.max(gesamt);

        self.takte.fetch_add(1, Ordering::Relaxed);
        let regulaer = u64::from(self.vielfaches);
        if faellig > regulaer {
            let extra = faellig - regulaer;
            self.nachgeholt.fetch_add(extra, Ordering::Relaxed);
            if let Some(m) = &self.metriken {
                m.takt_nachholframes_total.inc_by(extra as f64);
            }
            tracing::debug!(faellig, nachgeholt = extra, "Verspaeteter Takt, sende Burst");
        }

        let mut ergebnis = TaktErgebnis {
            faellig,
            ..TaktErgebnis::default()
        };
        if faellig == 0 {
            return ergebnis;
        }

        // Schnappschuss unter dem Lock, gesendet wird ohne
        zeit.schnappschuss.clear();
        zeit.schnappschuss.extend(
            self.quellen
                .lock()
                .iter()
                .map(|(id, quelle)| (*id, quelle.clone())),
        );

        zeit.tot.clear();
        for (id, schwach) in zeit.schnappschuss.drain(..) {
            let Some(quelle) = schwach.upgrade() else {
                zeit.tot.push(id);
                continue;
            };
            if !quelle.sendet_aktiv() {
                continue;
            }

            let mut gesendet = 0u64;
            while gesendet < faellig {
                let Some(frame) = quelle.naechster_frame() else {
                    break;
                };
                quelle.frame_senden(&frame);
                gesendet += 1;
            }
            if gesendet > 0 {
                ergebnis.sitzungen += 1;
                ergebnis.frames += gesendet;
            }
        }

        if !zeit.tot.is_empty() {
            let mut quellen = self.quellen.lock();
            for id in &zeit.tot {
                // Nur entfernen, wenn nicht inzwischen neu registriert
                if quellen.get(id).is_some_and(|q| q.strong_count() == 0) {
                    quellen.remove(id);
                    tracing::debug!(sitzung = %id, "Tote Quelle aus Sende-Takt entfernt");
                }
            }
        }

        self.frames.fetch_add(ergebnis.frames, Ordering::Relaxed);
        tracing::trace!(
            faellig,
            sitzungen = ergebnis.sitzungen,
            frames = ergebnis.frames,
            "Takt"
        );
        ergebnis
    }
}

impl Drop for TaktInner {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
