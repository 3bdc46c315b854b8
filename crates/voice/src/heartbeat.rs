//! Heartbeat – Senden, Bestaetigen, Timeout
//!
//! Generischer Lebendigkeits-Tracker ohne eigene Timer. Der Besitzer treibt
//! ihn aus seiner `select!`-Schleife:
//!
//! ```text
//! loop {
//!     select! {
//!         _ = sleep_until(hb.naechste_frist()) => hb.fortschreiten(now()),
//!         ack = eingang.recv()                 => hb.ack(now()),
//!     }
//! }
//! ```
//!
//! Da dieselbe Schleife Acks und Frist verarbeitet, wird ein Ack immer vor
//! dem naechsten faelligen Versand ausgewertet. Ueber einen Reconnect
//! entscheiden die Hooks des Besitzers.

use std::time::Duration;

use tokio::time::Instant;

/// Anzahl aufeinanderfolgender Fehlschlaege, ab der ein Besitzer die
/// Verbindung als verloren betrachten darf
pub const MAX_VERPASSTE_HEARTBEATS: u32 = 3;

/// Kleinstes Intervall, kuerzere Werte werden angehoben
pub const MIN_INTERVALL: Duration = Duration::from_millis(10);

/// Rueckrufe des Besitzers
pub trait HeartbeatHooks: Send {
    /// Einen Heartbeat mit der laufenden Nummer `nonce` versenden
    fn senden(&mut self, nonce: u64);

    /// Ein Heartbeat blieb unbeantwortet, `verpasst` zaehlt fortlaufend
    fn bei_timeout(&mut self, verpasst: u32);

    /// Bestaetigung erhalten, `latenz` nur wenn ein Heartbeat offen war
    fn bei_ack(&mut self, latenz: Option<Duration>);
}

/// Zustand eines laufenden oder gestoppten Heartbeats
pub struct Heartbeat<H> {
    hooks: H,
    timeout: Duration,
    intervall: Option<Duration>,
    naechster_versand: Option<Instant>,
    /// Hoechstens eine offene Frist
    offene_frist: Option<Instant>,
    zuletzt_gesendet: Option<Instant>,
    zuletzt_bestaetigt: Option<Instant>,
    verpasst: u32,
    nonce: u64,
}

impl<H: HeartbeatHooks> Heartbeat<H> {
    /// Erstellt einen gestoppten Heartbeat mit festem Timeout pro Versand
    pub fn new(hooks: H, timeout: Duration) -> Self {
        Self {
            hooks,
            timeout,
            intervall: None,
            naechster_versand: None,
            offene_frist: None,
            zuletzt_gesendet: None,
            zuletzt_bestaetigt: None,
            verpasst: 0,
            nonce: 0,
        }
    }

    /// Startet (oder startet neu) mit dem gegebenen Intervall
    ///
    /// Der erste Heartbeat geht nach einem vollen Intervall raus.
    pub fn starten(&mut self, intervall: Duration, jetzt: Instant) {
        let intervall = if intervall < MIN_INTERVALL {
            tracing::warn!(
                intervall_ms = intervall.as_millis() as u64,
                "Heartbeat-Intervall zu kurz, Mindestwert verwendet"
            );
            MIN_INTERVALL
        } else {
            intervall
        };
        self.intervall = Some(intervall);
        self.naechster_versand = Some(jetzt + intervall);
        self.offene_frist = None;
        self.verpasst = 0;
        tracing::trace!(intervall_ms = intervall.as_millis() as u64, "Heartbeat gestartet");
    }

    /// Stoppt alle Fristen. Mehrfacher Aufruf ist unschaedlich.
    pub fn stoppen(&mut self) {
        if self.intervall.take().is_some() {
            tracing::trace!("Heartbeat gestoppt");
        }
        self.naechster_versand = None;
        self.offene_frist = None;
    }

    /// Gibt true zurueck wenn der Heartbeat laeuft
    pub fn laeuft(&self) -> bool {
        self.intervall.is_some()
    }

    /// Verarbeitet eine Bestaetigung
    ///
    /// Loescht die offene Frist und setzt den Fehlschlag-Zaehler zurueck,
    /// unabhaengig davon, wie viele Heartbeats vorher ausgeblieben sind.
    pub fn ack(&mut self, jetzt: Instant) -> Option<Duration> {
        let offen = self.offene_frist.take().is_some();
        self.verpasst = 0;
        self.zuletzt_bestaetigt = Some(jetzt);
        let latenz = match (offen, self.zuletzt_gesendet) {
            (true, Some(gesendet)) => Some(jetzt.saturating_duration_since(gesendet)),
            _ => None,
        };
        self.hooks.bei_ack(latenz);
        latenz
    }

    /// Wie `ack`, aber nur fuer den zuletzt gesendeten Heartbeat
    ///
    /// Eine abweichende Nonce stammt von einem frueheren Heartbeat und
    /// aendert nichts. Bestaetigungen ohne Nonce gelten immer.
    pub fn ack_pruefen(&mut self, nonce: Option<u64>, jetzt: Instant) -> bool {
        match nonce {
            Some(n) if n != self.nonce => false,
            _ => {
                self.ack(jetzt);
                true
            }
        }
    }

    /// Nonce des zuletzt gesendeten Heartbeats (0 vor dem ersten)
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Naechster Zeitpunkt, zu dem `fortschreiten` etwas zu tun hat
    pub fn naechste_frist(&self) -> Option<Instant> {
        match (self.naechster_versand, self.offene_frist) {
            (Some(v), Some(f)) => Some(v.min(f)),
            (v, f) => v.or(f),
        }
    }

    /// Fuehrt alle bis `jetzt` faelligen Schritte aus
    pub fn fortschreiten(&mut self, jetzt: Instant) {
        let Some(intervall) = self.intervall else {
            return;
        };

        if let Some(frist) = self.offene_frist {
            if jetzt >= frist {
                self.offene_frist = None;
                self.fehlschlag();
            }
        }

        let Some(versand) = self.naechster_versand else {
            return;
        };
        if jetzt < versand {
            return;
        }

        // Noch offener Heartbeat bei Timeout > Intervall zaehlt als verpasst
        if self.offene_frist.take().is_some() {
            self.fehlschlag();
        }

        self.nonce = self.nonce.wrapping_add(1);
        self.hooks.senden(self.nonce);
        self.zuletzt_gesendet = Some(jetzt);
        self.offene_frist = Some(jetzt + self.timeout);

        let naechster = versand + intervall;
        self.naechster_versand = Some(if naechster > jetzt {
            naechster
        } else {
            jetzt + intervall
        });
    }

    fn fehlschlag(&mut self) {
        self.verpasst += 1;
        tracing::debug!(verpasst = self.verpasst, "Heartbeat unbeantwortet");
        self.hooks.bei_timeout(self.verpasst);
    }

    /// Aufeinanderfolgende Fehlschlaege seit dem letzten Ack
    pub fn verpasst(&self) -> u32 {
        self.verpasst
    }

    /// Zeitpunkt des letzten Versands
    pub fn zuletzt_gesendet(&self) -> Option<Instant> {
        self.zuletzt_gesendet
    }

    /// Zeitpunkt der letzten Bestaetigung
    pub fn zuletzt_bestaetigt(&self) -> Option<Instant> {
        self.zuletzt_bestaetigt
    }

    /// Konfiguriertes Intervall (None wenn gestoppt)
    pub fn intervall(&self) -> Option<Duration> {
        self.intervall
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Protokoll {
        gesendet: Vec<u64>,
        timeouts: Vec<u32>,
        acks: Vec<Option<Duration>>,
    }

    impl HeartbeatHooks for Protokoll {
        fn senden(&mut self, nonce: u64) {
            self.gesendet.push(nonce);
        }
        fn bei_timeout(&mut self, verpasst: u32) {
            self.timeouts.push(verpasst);
        }
        fn bei_ack(&mut self, latenz: Option<Duration>) {
            self.acks.push(latenz);
        }
    }

    const MS: Duration = Duration::from_millis(1);

    fn gestartet(intervall_ms: u64, timeout_ms: u64) -> (Heartbeat<Protokoll>, Instant) {
        let t0 = Instant::now();
        let mut hb = Heartbeat::new(Protokoll::default(), MS * timeout_ms as u32);
        hb.starten(MS * intervall_ms as u32, t0);
        (hb, t0)
    }

    #[test]
    fn sendet_nach_intervall() {
        let (mut hb, t0) = gestartet(100, 30);
        hb.fortschreiten(t0 + MS * 99);
        assert!(hb.hooks().gesendet.is_empty());
        hb.fortschreiten(t0 + MS * 100);
        assert_eq!(hb.hooks().gesendet, vec![1]);
        assert_eq!(hb.naechste_frist(), Some(t0 + MS * 130));
    }

    #[test]
    fn ack_meldet_latenz_und_loescht_frist() {
        let (mut hb, t0) = gestartet(100, 30);
        hb.fortschreiten(t0 + MS * 100);
        let latenz = hb.ack(t0 + MS * 112);
        assert_eq!(latenz, Some(MS * 12));
        assert_eq!(hb.naechste_frist(), Some(t0 + MS * 200));
        hb.fortschreiten(t0 + MS * 150);
        assert!(hb.hooks().timeouts.is_empty());
    }

    #[test]
    fn ack_setzt_zaehler_immer_zurueck() {
        for vorher in 0..6u32 {
            let (mut hb, t0) = gestartet(100, 30);
            for i in 1..=vorher {
                let t = t0 + MS * (100 * i);
                hb.fortschreiten(t);
                hb.fortschreiten(t + MS * 30);
            }
            assert_eq!(hb.verpasst(), vorher);
            hb.ack(t0 + MS * (100 * vorher + 50));
            assert_eq!(hb.verpasst(), 0);
            // Keine Frist mehr offen, nur noch der naechste Versand
            assert_eq!(hb.naechste_frist(), Some(t0 + MS * (100 * (vorher + 1))));
        }
    }

    #[test]
    fn ack_ohne_offenen_heartbeat_hat_keine_latenz() {
        let (mut hb, t0) = gestartet(100, 30);
        assert_eq!(hb.ack(t0 + MS * 10), None);
        assert_eq!(hb.hooks().acks, vec![None]);
    }

    #[test]
    fn ein_timeout_pro_fehlschlag() {
        let (mut hb, t0) = gestartet(100, 30);
        for i in 1..=4u32 {
            let versand = t0 + MS * (100 * i);
            hb.fortschreiten(versand);
            hb.fortschreiten(versand + MS * 30);
            // Doppelter Aufruf darf keinen weiteren Timeout ausloesen
            hb.fortschreiten(versand + MS * 31);
            assert_eq!(hb.hooks().timeouts.len() as u32, i);
        }
        assert_eq!(hb.hooks().timeouts, vec![1, 2, 3, 4]);
        assert!(hb.verpasst() > MAX_VERPASSTE_HEARTBEATS);
    }

    #[test]
    fn timeout_laenger_als_intervall_zaehlt_beim_naechsten_versand() {
        let (mut hb, t0) = gestartet(50, 200);
        hb.fortschreiten(t0 + MS * 50);
        hb.fortschreiten(t0 + MS * 100);
        assert_eq!(hb.hooks().gesendet, vec![1, 2]);
        assert_eq!(hb.hooks().timeouts, vec![1]);
        // Genau eine offene Frist
        assert_eq!(hb.naechste_frist(), Some(t0 + MS * 150));
    }

    #[test]
    fn stoppen_ist_idempotent() {
        let (mut hb, t0) = gestartet(100, 30);
        hb.fortschreiten(t0 + MS * 100);
        hb.stoppen();
        hb.stoppen();
        assert!(!hb.laeuft());
        assert_eq!(hb.naechste_frist(), None);
        hb.fortschreiten(t0 + MS * 1000);
        assert_eq!(hb.hooks().gesendet, vec![1]);
        assert!(hb.hooks().timeouts.is_empty());
    }

    #[test]
    fn null_intervall_wird_angehoben() {
        let (mut hb, t0) = gestartet(0, 30);
        assert_eq!(hb.intervall(), Some(MIN_INTERVALL));
        for _ in 0..1000 {
            hb.fortschreiten(t0);
        }
        assert!(hb.hooks().gesendet.is_empty());
        assert_eq!(hb.naechste_frist(), Some(t0 + MIN_INTERVALL));

        hb.fortschreiten(t0 + MIN_INTERVALL);
        hb.fortschreiten(t0 + MIN_INTERVALL);
        assert_eq!(hb.hooks().gesendet, vec![1]);
        assert!(hb.naechste_frist().is_some_and(|f| f > t0 + MIN_INTERVALL));
    }

    #[test]
    fn veraltete_nonce_wird_ignoriert() {
        let (mut hb, t0) = gestartet(100, 200);
        hb.fortschreiten(t0 + MS * 100);
        hb.fortschreiten(t0 + MS * 200);
        assert_eq!(hb.hooks().gesendet, vec![1, 2]);
        assert_eq!(hb.nonce(), 2);

        // Ack fuer Heartbeat 1 kommt erst nach Versand von 2
        assert!(!hb.ack_pruefen(Some(1), t0 + MS * 210));
        assert!(hb.hooks().acks.is_empty());
        assert_eq!(hb.naechste_frist(), Some(t0 + MS * 300));
        assert_eq!(hb.verpasst(), 1);

        assert!(hb.ack_pruefen(Some(2), t0 + MS * 220));
        assert_eq!(hb.hooks().acks, vec![Some(MS * 20)]);
        assert_eq!(hb.verpasst(), 0);

        // Ohne Nonce zaehlt jede Bestaetigung
        hb.fortschreiten(t0 + MS * 300);
        assert!(hb.ack_pruefen(None, t0 + MS * 305));
        assert_eq!(hb.hooks().acks.last(), Some(&Some(MS * 5)));
    }

    #[test]
    fn verspaeteter_aufruf_sendet_nur_einmal() {
        let (mut hb, t0) = gestartet(100, 30);
        hb.fortschreiten(t0 + MS * 1000);
        assert_eq!(hb.hooks().gesendet, vec![1]);
        assert_eq!(hb.naechste_frist(), Some(t0 + MS * 1030));
    }
}
