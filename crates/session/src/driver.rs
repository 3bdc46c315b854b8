//! Treiber-Task einer Sitzung
//!
//! Ein Task pro Sitzung besitzt den gesamten veraenderlichen Zustand und
//! verarbeitet in einer `select!`-Schleife:
//! - Befehle der Handles (`trennen`, `erneut_beitreten`)
//! - Sprechstatus-Aenderungen aus dem Sendepfad
//! - Ereignisse des Signalkanals
//! - Datagramme der Medienstrecke
//! - laufender Aufbau (WebSocket-Handshake, Discovery)
//! - Fristen (Heartbeats, Verbindungsaufbau, Wiederaufnahme)
//!
//! Kein Zweig wartet innerhalb der Schleife auf Netzwerk-I/O. Handshake und
//! Discovery laufen als eigener Zweig und werden beim Abbau verworfen.
//!
//! Der Sende-Takt greift nur auf den geteilten [`Sendepfad`] zu.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::Instrument;

use sprechfunk_core::{
    LatenzQuelle, SitzungsId, TransportFehler, VoiceError, VoiceEvent, VoiceResult,
};
use sprechfunk_crypto::{RtpFramer, RtpSequenz, SecretBytes};
use sprechfunk_observability::VoiceMetrics;
use sprechfunk_protocol::control::{
    GatewayNachricht, Ready, SelectProtocol, SessionDescription, Speaking,
};
use sprechfunk_protocol::voice::{keepalive_dekodieren, keepalive_kodieren};
use sprechfunk_protocol::{
    CloseCode, Entdeckung, SchliessVerhalten, Sprechstatus, VerschluesselungsModus,
};
use sprechfunk_signaling::{endpunkt_url, SignalEreignis, SignalKanal};
use sprechfunk_voice::{
    AudioQuelle, Heartbeat, HeartbeatHooks, MedienTransport, SendeTakt, TransportEreignis,
    MAX_VERPASSTE_HEARTBEATS,
};

use crate::config::{SitzungsConfig, SitzungsDaten};
use crate::connection::VoiceConnection;
use crate::receiver::Empfaenger;
use crate::sender::{Medienpfad, Sendepfad};
use crate::state::{Status, Wiederaufnahme, Zustand};

/// Groesse des Ereignis-Broadcasts pro Sitzung
const EREIGNIS_KAPAZITAET: usize = 256;

/// Close-Code beim endgueltigen Trennen
const CLOSE_NORMAL: u16 = 1000;
/// Close-Code vor einer Wiederaufnahme, der Server haelt die Sitzung offen
const CLOSE_WIEDERAUFNAHME: u16 = 4000;

/// Befehle der Handles an den Treiber
pub(crate) enum Befehl {
    Trennen(oneshot::Sender<()>),
    ErneutBeitreten(SitzungsDaten, oneshot::Sender<VoiceResult<u32>>),
}

/// Ergebnis eines laufenden Aufbauschritts
enum Aufbau {
    Signal(VoiceResult<SignalKanal>),
    Medien {
        modus: VerschluesselungsModus,
        ergebnis: Result<(Arc<MedienTransport>, Entdeckung), TransportFehler>,
    },
}

type AufbauFuture = Pin<Box<dyn Future<Output = Aufbau> + Send>>;

// ---------------------------------------------------------------------------
// Heartbeat-Hooks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PulsAktion {
    Senden(u64),
    Timeout(u32),
    Ack(Option<Duration>),
}

/// Sammelt die Rueckrufe eines Heartbeats, der Treiber arbeitet sie
/// nach jedem Schritt ab
#[derive(Debug, Default)]
struct Puls {
    aktionen: Vec<PulsAktion>,
}

impl HeartbeatHooks for Puls {
    fn senden(&mut self, nonce: u64) {
        self.aktionen.push(PulsAktion::Senden(nonce));
    }

    fn bei_timeout(&mut self, verpasst: u32) {
        self.aktionen.push(PulsAktion::Timeout(verpasst));
    }

    fn bei_ack(&mut self, latenz: Option<Duration>) {
        self.aktionen.push(PulsAktion::Ack(latenz));
    }
}

fn aktionen_nehmen(hb: &mut Heartbeat<Puls>) -> Vec<PulsAktion> {
    std::mem::take(&mut hb.hooks_mut().aktionen)
}

/// Ab hier gilt eine Verbindung als tot
pub(crate) fn lebendigkeit_verloren(verpasst: u32) -> bool {
    verpasst > MAX_VERPASSTE_HEARTBEATS
}

// ---------------------------------------------------------------------------
// Start
// ---------------------------------------------------------------------------

/// Startet den Treiber-Task und gibt das Handle sowie die Bereitschafts-
/// Meldung (SSRC oder Fehler) zurueck
pub(crate) fn starten(
    daten: SitzungsDaten,
    config: SitzungsConfig,
    takt: SendeTakt,
    metriken: Option<Arc<VoiceMetrics>>,
) -> (VoiceConnection, oneshot::Receiver<VoiceResult<u32>>) {
    let id = SitzungsId::neu();
    let guild_id = daten.guild_id;
    let (befehle_tx, befehle_rx) = mpsc::unbounded_channel();
    let (sprech_tx, sprech_rx) = mpsc::unbounded_channel();
    let (ereignisse, _) = broadcast::channel(EREIGNIS_KAPAZITAET);
    let (status_tx, status_rx) = watch::channel(Status::Signalisierung);
    let (bereit_tx, bereit_rx) = oneshot::channel();

    let sendepfad = Arc::new(Sendepfad::new(
        config.warteschlange_max,
        sprech_tx,
        ereignisse.clone(),
        metriken.clone(),
    ));

    let treiber = Treiber {
        id,
        signal_hb: Heartbeat::new(Puls::default(), config.heartbeat_timeout),
        // Timeout gleich Intervall: ein Echo muss vor dem naechsten Keepalive da sein
        udp_hb: Heartbeat::new(Puls::default(), config.udp_keepalive_intervall),
        daten,
        config,
        zustand: Zustand::Signalisierung { versuch: 0 },
        war_bereit: false,
        ssrc: 0,
        signal: None,
        aufbau: None,
        gemeldet: Sprechstatus::Deaktiviert,
        transport: None,
        transport_rx: None,
        empfangs_framer: None,
        empfaenger: Empfaenger::new(metriken.clone()),
        sendepfad: sendepfad.clone(),
        takt,
        befehle: befehle_rx,
        sprech_rx,
        ereignisse: ereignisse.clone(),
        status: status_tx,
        bereit_tx: Some(bereit_tx),
        verbindungs_frist: None,
        metriken,
    };

    let span = tracing::info_span!("sitzung", guild_id = %guild_id, sitzung = %id);
    tokio::spawn(treiber.laufen().instrument(span));

    let handle = VoiceConnection::neu(guild_id, id, befehle_tx, sendepfad, ereignisse, status_rx);
    (handle, bereit_rx)
}

// ---------------------------------------------------------------------------
// Treiber
// ---------------------------------------------------------------------------

struct Treiber {
    id: SitzungsId,
    daten: SitzungsDaten,
    config: SitzungsConfig,
    zustand: Zustand,
    /// Mindestens einmal `Bereit` seit Identify
    war_bereit: bool,
    ssrc: u32,

    signal: Option<SignalKanal>,
    signal_hb: Heartbeat<Puls>,
    /// Hoechstens ein Aufbauschritt gleichzeitig
    aufbau: Option<AufbauFuture>,
    /// Zuletzt an das Gateway gemeldeter Sprechstatus
    gemeldet: Sprechstatus,

    transport: Option<Arc<MedienTransport>>,
    transport_rx: Option<mpsc::Receiver<TransportEreignis>>,
    udp_hb: Heartbeat<Puls>,
    empfangs_framer: Option<RtpFramer>,
    empfaenger: Empfaenger,

    sendepfad: Arc<Sendepfad>,
    takt: SendeTakt,

    befehle: mpsc::UnboundedReceiver<Befehl>,
    sprech_rx: mpsc::UnboundedReceiver<Sprechstatus>,
    ereignisse: broadcast::Sender<VoiceEvent>,
    status: watch::Sender<Status>,
    bereit_tx: Option<oneshot::Sender<VoiceResult<u32>>>,
    verbindungs_frist: Option<Instant>,
    metriken: Option<Arc<VoiceMetrics>>,
}

async fn signal_naechstes(kanal: &mut Option<SignalKanal>) -> Option<SignalEreignis> {
    match kanal {
        Some(k) => k.naechstes().await,
        None => std::future::pending().await,
    }
}

async fn aufbau_abwarten(aufbau: &mut Option<AufbauFuture>) -> Aufbau {
    match aufbau {
        Some(f) => f.as_mut().await,
        None => std::future::pending().await,
    }
}

/// Socket binden und die eigene Adresse ermitteln
async fn medien_aufbauen(
    server: SocketAddr,
    ssrc: u32,
    timeout: Duration,
) -> Result<(Arc<MedienTransport>, Entdeckung), TransportFehler> {
    let transport = Arc::new(MedienTransport::binden(server).await?);
    match transport.entdecken_mit_timeout(ssrc, timeout).await {
        Ok(entdeckung) => Ok((transport, entdeckung)),
        Err(e) => {
            transport.schliessen();
            Err(e)
        }
    }
}

async fn transport_naechstes(
    rx: &mut Option<mpsc::Receiver<TransportEreignis>>,
) -> TransportEreignis {
    match rx {
        Some(rx) => rx.recv().await.unwrap_or(TransportEreignis::Geschlossen),
        None => std::future::pending().await,
    }
}

async fn schlafen_bis(frist: Option<Instant>) {
    match frist {
        Some(f) => tokio::time::sleep_until(f).await,
        None => std::future::pending().await,
    }
}

impl Treiber {
    async fn laufen(mut self) {
        tracing::debug!("Treiber gestartet");
        self.identifizieren();

        while !matches!(self.zustand, Zustand::Zerstoert) {
            let frist = self.naechste_frist();
            tokio::select! {
                befehl = self.befehle.recv() => match befehl {
                    Some(befehl) => self.befehl(befehl),
                    None => {
                        tracing::debug!("Alle Handles freigegeben");
                        self.abbauen(None);
                    }
                },
                Some(status) = self.sprech_rx.recv() => self.sprechen_melden(status),
                ereignis = signal_naechstes(&mut self.signal) => {
                    let ereignis = ereignis.unwrap_or(SignalEreignis::Geschlossen { code: None });
                    self.signal_ereignis(ereignis);
                }
                aufbau = aufbau_abwarten(&mut self.aufbau) => {
                    self.aufbau = None;
                    self.aufbau_fertig(aufbau);
                }
                ereignis = transport_naechstes(&mut self.transport_rx) => {
                    self.transport_ereignis(ereignis);
                }
                _ = schlafen_bis(frist) => self.fristen(Instant::now()),
            }
        }
        tracing::debug!("Treiber beendet");
    }

    fn naechste_frist(&self) -> Option<Instant> {
        [
            self.signal_hb.naechste_frist(),
            self.udp_hb.naechste_frist(),
            self.zustand.frist(),
            self.verbindungs_frist,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn melden(&self, ereignis: VoiceEvent) {
        // Ohne Abonnenten geht das Ereignis verloren
        let _ = self.ereignisse.send(ereignis);
    }

    fn zustand_setzen(&mut self, zustand: Zustand) {
        self.zustand = zustand;
        self.status.send_replace(self.zustand.status());
    }

    // -----------------------------------------------------------------------
    // Befehle
    // -----------------------------------------------------------------------

    fn befehl(&mut self, befehl: Befehl) {
        match befehl {
            Befehl::Trennen(antwort) => {
                tracing::info!("Sitzung wird getrennt");
                self.abbauen(None);
                let _ = antwort.send(());
            }
            Befehl::ErneutBeitreten(daten, antwort) => {
                tracing::info!(endpoint = %daten.endpoint, "Erneuter Beitritt");
                self.netz_abbauen();
                self.daten = daten;
                self.war_bereit = false;
                if let Some(alt) = self.bereit_tx.replace(antwort) {
                    let _ = alt.send(Err(VoiceError::Getrennt(
                        "durch erneuten Beitritt ersetzt".into(),
                    )));
                }
                self.zustand_setzen(Zustand::Signalisierung { versuch: 0 });
                self.identifizieren();
            }
        }
    }

    fn sprechen_melden(&mut self, status: Sprechstatus) {
        let Zustand::Bereit { ssrc } = self.zustand else {
            // Wird beim naechsten Bereit nachgeholt
            return;
        };
        if status == self.gemeldet {
            return;
        }
        let Some(signal) = &self.signal else {
            return;
        };
        let nachricht = GatewayNachricht::Speaking(Speaking::eigener(status, ssrc));
        match signal.senden(&nachricht) {
            Ok(()) => {
                self.gemeldet = status;
                tracing::debug!(ssrc, flags = status.flags(), "Sprechstatus gemeldet");
            }
            Err(e) => tracing::warn!(fehler = %e, "Sprechstatus konnte nicht gesendet werden"),
        }
    }

    // -----------------------------------------------------------------------
    // Signalisierung
    // -----------------------------------------------------------------------

    /// Neue Sitzung beim Gateway, der Server kennt danach keinen Sprechstatus
    fn identifizieren(&mut self) {
        self.gemeldet = Sprechstatus::Deaktiviert;
        let identify = self.daten.identify();
        self.oeffnen(identify);
    }

    /// Startet den Verbindungsaufbau zum Gateway
    ///
    /// Der Handshake laeuft als Zweig der Treiber-Schleife. Die
    /// Verbindungsfrist begrenzt ihn zusammen mit allen folgenden Schritten
    /// bis `Bereit`.
    fn oeffnen(&mut self, eroeffnung: GatewayNachricht) {
        let url = match endpunkt_url(&self.daten.endpoint) {
            Ok(url) => url,
            Err(e) => {
                self.fehlschlag(e.into());
                return;
            }
        };
        self.verbindungs_frist = Some(Instant::now() + self.config.verbindungs_timeout);
        self.aufbau = Some(Box::pin(async move {
            let ergebnis = SignalKanal::oeffnen(&url, &eroeffnung).await.map_err(|e| {
                tracing::warn!(url = %url, fehler = %e, "Voice-Gateway nicht erreichbar");
                VoiceError::from(e)
            });
            Aufbau::Signal(ergebnis)
        }));
    }

    fn aufbau_fertig(&mut self, aufbau: Aufbau) {
        match aufbau {
            Aufbau::Signal(Ok(kanal)) => {
                kanal.setze_keepalive(self.config.ws_ping_intervall);
                self.signal = Some(kanal);
            }
            Aufbau::Signal(Err(e)) => self.fehlschlag(e),
            Aufbau::Medien { modus, ergebnis } => self.medien_verbunden(modus, ergebnis),
        }
    }

    fn signal_ereignis(&mut self, ereignis: SignalEreignis) {
        match ereignis {
            SignalEreignis::Hello { intervall } => {
                tracing::debug!(intervall_ms = intervall.as_millis() as u64, "Hello empfangen");
                self.signal_hb.starten(intervall, Instant::now());
            }
            SignalEreignis::Bereit(ready) => self.ready(ready),
            SignalEreignis::Sitzungsbeschreibung(beschreibung) => {
                self.sitzungsbeschreibung(beschreibung)
            }
            SignalEreignis::HeartbeatAck { nonce } => {
                if self.signal_hb.ack_pruefen(nonce, Instant::now()) {
                    tracing::trace!(nonce = ?nonce, "Heartbeat bestaetigt");
                    self.signal_puls();
                } else {
                    tracing::debug!(nonce = ?nonce, "Veraltete Heartbeat-Bestaetigung ignoriert");
                }
            }
            SignalEreignis::Sprechen(speaking) => {
                self.empfaenger
                    .sprecher_setzen(speaking.ssrc, speaking.user_id);
            }
            SignalEreignis::ClientVerbunden(user_ids) => {
                self.melden(VoiceEvent::ClientVerbunden { user_ids });
            }
            SignalEreignis::ClientGetrennt(user_id) => {
                self.empfaenger.user_entfernen(user_id);
                self.melden(VoiceEvent::ClientGetrennt { user_id });
            }
            SignalEreignis::Fortgesetzt => {
                if matches!(
                    self.zustand,
                    Zustand::Wiederaufnahme {
                        modus: Wiederaufnahme::Fortsetzen,
                        ..
                    }
                ) {
                    tracing::info!("Sitzung fortgesetzt");
                    self.bereit_werden(self.ssrc);
                } else {
                    tracing::debug!(status = ?self.zustand.status(), "Unerwartetes Resumed ignoriert");
                }
            }
            SignalEreignis::Geschlossen { code } => self.geschlossen(code),
        }
    }

    fn ready(&mut self, ready: Ready) {
        let Zustand::Signalisierung { versuch } = self.zustand else {
            tracing::debug!(status = ?self.zustand.status(), "Ready ausserhalb der Signalisierung ignoriert");
            return;
        };
        tracing::info!(ssrc = ready.ssrc, ip = %ready.ip, port = ready.port, "Ready empfangen");
        self.ssrc = ready.ssrc;
        self.zustand_setzen(Zustand::Verbindet {
            versuch,
            ssrc: ready.ssrc,
            entdeckung: None,
        });

        let Some(modus) = VerschluesselungsModus::auswaehlen(&ready.modes) else {
            self.abbauen(Some(VoiceError::protokoll(format!(
                "Kein unterstuetzter Verschluesselungsmodus angeboten: {:?}",
                ready.modes
            ))));
            return;
        };

        let ip: IpAddr = match ready.ip.parse() {
            Ok(ip) => ip,
            Err(_) => {
                self.fehlschlag(VoiceError::protokoll(format!(
                    "Ungueltige Server-Adresse: {}",
                    ready.ip
                )));
                return;
            }
        };
        let server = SocketAddr::new(ip, ready.port);
        let ssrc = ready.ssrc;
        let timeout = self.config.entdeckung_timeout;

        self.aufbau = Some(Box::pin(async move {
            let ergebnis = medien_aufbauen(server, ssrc, timeout).await;
            Aufbau::Medien { modus, ergebnis }
        }));
    }

    /// Discovery abgeschlossen: Empfang starten und Protokoll waehlen
    fn medien_verbunden(
        &mut self,
        modus: VerschluesselungsModus,
        ergebnis: Result<(Arc<MedienTransport>, Entdeckung), TransportFehler>,
    ) {
        let Zustand::Verbindet {
            versuch,
            ssrc,
            entdeckung: None,
        } = self.zustand
        else {
            tracing::debug!(status = ?self.zustand.status(), "Discovery-Ergebnis ignoriert");
            return;
        };
        let (transport, entdeckung) = match ergebnis {
            Ok(paar) => paar,
            Err(e) => {
                self.fehlschlag(e.into());
                return;
            }
        };

        self.transport_rx = Some(transport.empfang_starten());
        self.transport = Some(transport);
        self.zustand = Zustand::Verbindet {
            versuch,
            ssrc,
            entdeckung: Some(entdeckung),
        };

        let auswahl = GatewayNachricht::SelectProtocol(SelectProtocol::udp(
            entdeckung.ip.to_string(),
            entdeckung.port,
            modus,
        ));
        if let Some(signal) = &self.signal {
            if let Err(e) = signal.senden(&auswahl) {
                self.fehlschlag(e.into());
                return;
            }
        }
        tracing::debug!(modus = modus.als_str(), "Protokoll gewaehlt");
        self.udp_hb
            .starten(self.config.udp_keepalive_intervall, Instant::now());
    }

    fn sitzungsbeschreibung(&mut self, beschreibung: SessionDescription) {
        let Zustand::Verbindet {
            ssrc,
            entdeckung: Some(_),
            ..
        } = self.zustand
        else {
            tracing::debug!(status = ?self.zustand.status(), "SessionDescription ignoriert");
            return;
        };
        let Some(transport) = self.transport.clone() else {
            return;
        };

        let schluessel = SecretBytes::new(beschreibung.secret_key);
        let modus = beschreibung.mode;
        let framer = RtpFramer::new(modus, &schluessel)
            .and_then(|senden| RtpFramer::new(modus, &schluessel).map(|empf| (senden, empf)));
        let (senden, empfangen) = match framer {
            Ok(paar) => paar,
            Err(e) => {
                self.abbauen(Some(VoiceError::Krypto(e.to_string())));
                return;
            }
        };

        self.sendepfad.medien_setzen(Some(Medienpfad {
            framer: senden,
            sequenz: RtpSequenz::neu(ssrc),
            transport,
        }));
        self.empfangs_framer = Some(empfangen);
        let stark: Arc<dyn AudioQuelle> = self.sendepfad.clone();
        self.takt.registrieren(self.id, Arc::downgrade(&stark));
        self.bereit_werden(ssrc);
    }

    fn bereit_werden(&mut self, ssrc: u32) {
        self.war_bereit = true;
        self.verbindungs_frist = None;
        self.zustand_setzen(Zustand::Bereit { ssrc });
        self.sendepfad.bereit_setzen(true);
        tracing::info!(ssrc, "Sitzung bereit");
        self.melden(VoiceEvent::Bereit { ssrc });
        if let Some(tx) = self.bereit_tx.take() {
            let _ = tx.send(Ok(ssrc));
        }
        // Aenderungen waehrend der Wiederaufnahme nachholen
        let status = self.sendepfad.sprechstatus();
        if status != self.gemeldet {
            self.sprechen_melden(status);
        }
    }

    fn geschlossen(&mut self, code: Option<u16>) {
        self.signal_hb.stoppen();
        if let Some(mut kanal) = self.signal.take() {
            kanal.zerstoeren(None);
        }
        let verhalten = code.map_or(SchliessVerhalten::Fortsetzen, CloseCode::einordnen);
        let grund = match code {
            Some(c) => format!("Gateway hat die Verbindung geschlossen (Code {c})"),
            None => "Gateway-Verbindung abgebrochen".to_string(),
        };
        tracing::warn!(code = ?code, verhalten = ?verhalten, "Signalkanal geschlossen");
        let code = code.unwrap_or_default();

        match verhalten {
            SchliessVerhalten::AuthentifizierungFatal => {
                self.abbauen(Some(VoiceError::Authentifizierung { code, grund }))
            }
            SchliessVerhalten::ProtokollFatal => {
                self.abbauen(Some(VoiceError::Abgelehnt { code, grund }))
            }
            SchliessVerhalten::Getrennt if !self.war_bereit => {
                self.abbauen(Some(VoiceError::Getrennt(grund)))
            }
            SchliessVerhalten::Getrennt => self.getrennt(grund),
            SchliessVerhalten::NeuIdentifizieren | SchliessVerhalten::Fortsetzen => {
                if !self.war_bereit {
                    self.abbauen(Some(VoiceError::Signalisierung(grund)));
                    return;
                }
                let modus = match (&self.zustand, verhalten) {
                    (
                        Zustand::Wiederaufnahme {
                            modus: Wiederaufnahme::Fortsetzen,
                            ..
                        },
                        _,
                    )
                    | (Zustand::Signalisierung { .. } | Zustand::Verbindet { .. }, _)
                    | (_, SchliessVerhalten::NeuIdentifizieren) => {
                        Wiederaufnahme::NeuIdentifizieren
                    }
                    _ => Wiederaufnahme::Fortsetzen,
                };
                self.wiederaufnahme_planen(modus, &grund);
            }
        }
    }

    fn signal_puls(&mut self) {
        for aktion in aktionen_nehmen(&mut self.signal_hb) {
            match aktion {
                PulsAktion::Senden(nonce) => {
                    if let Some(signal) = &self.signal {
                        if let Err(e) = signal.senden(&GatewayNachricht::Heartbeat(nonce)) {
                            tracing::debug!(fehler = %e, "Heartbeat nicht gesendet");
                        }
                    }
                }
                PulsAktion::Timeout(verpasst) => {
                    tracing::warn!(verpasst, "Gateway-Heartbeat unbeantwortet");
                    if lebendigkeit_verloren(verpasst) {
                        self.lebendigkeit_verloren(VoiceError::Lebendigkeit { verpasst });
                    }
                }
                PulsAktion::Ack(Some(rtt)) => {
                    if let Some(m) = &self.metriken {
                        m.rtt_beobachten("signalisierung", rtt);
                    }
                    self.melden(VoiceEvent::Latenz {
                        quelle: LatenzQuelle::Signalisierung,
                        rtt,
                    });
                }
                PulsAktion::Ack(None) => {}
            }
        }
    }

    fn lebendigkeit_verloren(&mut self, fehler: VoiceError) {
        if !self.war_bereit {
            self.abbauen(Some(fehler));
            return;
        }
        let grund = fehler.to_string();
        self.melden(VoiceEvent::Fehler(fehler));
        self.wiederaufnahme_planen(Wiederaufnahme::Fortsetzen, &grund);
    }

    // -----------------------------------------------------------------------
    // Medienstrecke
    // -----------------------------------------------------------------------

    fn transport_ereignis(&mut self, ereignis: TransportEreignis) {
        match ereignis {
            TransportEreignis::Nachricht(daten) => {
                if keepalive_dekodieren(&daten).is_some() {
                    self.udp_hb.ack(Instant::now());
                    self.udp_puls();
                    return;
                }
                if let Some(framer) = self.empfangs_framer.as_mut() {
                    if let Some(ereignis) = self.empfaenger.paket(framer, &daten) {
                        self.melden(ereignis);
                    }
                }
            }
            TransportEreignis::Fehler(e) => {
                tracing::warn!(fehler = %e, "Fehler auf der Medienstrecke");
                self.melden(VoiceEvent::Fehler(e.into()));
            }
            TransportEreignis::Geschlossen => {
                tracing::debug!("Empfangs-Loop beendet");
                self.transport_rx = None;
            }
        }
    }

    fn udp_puls(&mut self) {
        for aktion in aktionen_nehmen(&mut self.udp_hb) {
            match aktion {
                PulsAktion::Senden(zaehler) => {
                    let jetzt = Instant::now();
                    if let Some(transport) = &self.transport {
                        if let Err(e) = transport.senden(&keepalive_kodieren(zaehler as u32)) {
                            self.melden(VoiceEvent::Fehler(e.into()));
                        }
                    }
                    if self
                        .sendepfad
                        .leerlauf_laenger_als(self.config.udp_keepalive_intervall, jetzt)
                    {
                        tracing::debug!("Kein Audio seit einem Intervall, Sprechstatus zurueckgesetzt");
                        let _ = self.sendepfad.sprechen_setzen(Sprechstatus::Deaktiviert);
                    }
                }
                PulsAktion::Timeout(verpasst) => {
                    tracing::debug!(verpasst, "UDP-Keepalive unbeantwortet");
                    if lebendigkeit_verloren(verpasst) {
                        let fehler = VoiceError::from(TransportFehler::KeepaliveVerloren { verpasst });
                        if !self.war_bereit {
                            self.abbauen(Some(fehler));
                            return;
                        }
                        let grund = fehler.to_string();
                        self.melden(VoiceEvent::Fehler(fehler));
                        self.wiederaufnahme_planen(Wiederaufnahme::NeuIdentifizieren, &grund);
                        return;
                    }
                }
                PulsAktion::Ack(Some(rtt)) => {
                    if let Some(m) = &self.metriken {
                        m.rtt_beobachten("udp", rtt);
                    }
                    self.melden(VoiceEvent::Latenz {
                        quelle: LatenzQuelle::Udp,
                        rtt,
                    });
                }
                PulsAktion::Ack(None) => {}
            }
        }
    }

    // -----------------------------------------------------------------------
    // Fristen und Wiederaufnahme
    // -----------------------------------------------------------------------

    fn fristen(&mut self, jetzt: Instant) {
        if self.verbindungs_frist.is_some_and(|f| jetzt >= f) {
            self.verbindungs_frist = None;
            self.fehlschlag(VoiceError::Zeitueberschreitung(format!(
                "Sitzung nach {} ms nicht bereit",
                self.config.verbindungs_timeout.as_millis()
            )));
            return;
        }
        if self.signal_hb.naechste_frist().is_some_and(|f| jetzt >= f) {
            self.signal_hb.fortschreiten(jetzt);
            self.signal_puls();
        }
        if self.udp_hb.naechste_frist().is_some_and(|f| jetzt >= f) {
            self.udp_hb.fortschreiten(jetzt);
            self.udp_puls();
        }
        if self.zustand.frist().is_some_and(|f| jetzt >= f) {
            self.versuch_starten();
        }
    }

    /// Fehlschlag beim Aufbau oder Betrieb
    ///
    /// Vor dem ersten `Bereit` und bei nicht wiederholbaren Fehlern endet
    /// die Sitzung, sonst folgt ein Neuaufbau.
    fn fehlschlag(&mut self, fehler: VoiceError) {
        if !self.war_bereit || !fehler.ist_wiederholbar() {
            self.abbauen(Some(fehler));
            return;
        }
        let grund = fehler.to_string();
        tracing::warn!(fehler = %grund, "Verbindungsaufbau fehlgeschlagen");
        self.melden(VoiceEvent::Fehler(fehler));
        self.wiederaufnahme_planen(Wiederaufnahme::NeuIdentifizieren, &grund);
    }

    fn wiederaufnahme_planen(&mut self, modus: Wiederaufnahme, grund: &str) {
        self.aufbau = None;
        self.signal_hb.stoppen();
        if let Some(mut kanal) = self.signal.take() {
            kanal.zerstoeren(Some(CLOSE_WIEDERAUFNAHME));
        }
        self.verbindungs_frist = None;
        self.sendepfad.bereit_setzen(false);
        if modus == Wiederaufnahme::NeuIdentifizieren {
            self.medien_abbauen();
        }

        let versuch = self.zustand.versuch();
        if versuch >= self.config.max_wiederholungen {
            self.getrennt(format!(
                "Wiederaufnahme nach {versuch} Versuchen aufgegeben: {grund}"
            ));
            return;
        }
        if let Some(m) = &self.metriken {
            m.wiederaufnahmen_total.inc();
        }
        let wartezeit = self.config.backoff(versuch);
        tracing::warn!(
            versuch = versuch + 1,
            modus = ?modus,
            wartezeit_ms = wartezeit.as_millis() as u64,
            grund,
            "Verbindung verloren, Wiederaufnahme geplant"
        );
        self.zustand_setzen(Zustand::Wiederaufnahme {
            versuch: versuch + 1,
            modus,
            naechster_versuch: Some(Instant::now() + wartezeit),
        });
    }

    fn versuch_starten(&mut self) {
        let Zustand::Wiederaufnahme { versuch, modus, .. } = self.zustand else {
            return;
        };
        tracing::info!(versuch, modus = ?modus, "Starte Wiederaufnahme");
        match modus {
            Wiederaufnahme::Fortsetzen => {
                self.zustand = Zustand::Wiederaufnahme {
                    versuch,
                    modus,
                    naechster_versuch: None,
                };
                let resume = self.daten.resume();
                self.oeffnen(resume);
            }
            Wiederaufnahme::NeuIdentifizieren => {
                self.zustand_setzen(Zustand::Signalisierung { versuch });
                self.identifizieren();
            }
        }
    }

    // -----------------------------------------------------------------------
    // Abbau
    // -----------------------------------------------------------------------

    /// Gibt Socket, Framer und Sende-Takt-Eintrag frei
    fn medien_abbauen(&mut self) {
        self.udp_hb.stoppen();
        self.takt.abmelden(self.id);
        self.sendepfad.bereit_setzen(false);
        self.sendepfad.medien_setzen(None);
        self.empfangs_framer = None;
        self.transport_rx = None;
        if let Some(transport) = self.transport.take() {
            transport.schliessen();
        }
    }

    fn netz_abbauen(&mut self) {
        // Laufender Handshake oder Discovery endet mit dem Drop
        self.aufbau = None;
        self.signal_hb.stoppen();
        if let Some(mut kanal) = self.signal.take() {
            kanal.zerstoeren(Some(CLOSE_NORMAL));
        }
        self.verbindungs_frist = None;
        self.medien_abbauen();
    }

    fn getrennt(&mut self, grund: String) {
        tracing::warn!(grund = %grund, "Sitzung getrennt");
        self.netz_abbauen();
        if let Some(tx) = self.bereit_tx.take() {
            let _ = tx.send(Err(VoiceError::Getrennt(grund.clone())));
        }
        self.zustand_setzen(Zustand::Getrennt {
            grund: grund.clone(),
        });
        self.melden(VoiceEvent::Getrennt { grund });
    }

    /// Endgueltiger Abbau in einem Schritt
    fn abbauen(&mut self, fehler: Option<VoiceError>) {
        if matches!(self.zustand, Zustand::Zerstoert) {
            return;
        }
        match &fehler {
            Some(e) => tracing::warn!(fehler = %e, "Sitzung wird abgebaut"),
            None => tracing::info!("Sitzung wird abgebaut"),
        }
        if let Some(tx) = self.bereit_tx.take() {
            let _ = tx.send(Err(fehler.clone().unwrap_or(VoiceError::Zerstoert)));
        }
        self.netz_abbauen();
        self.sendepfad.abbauen();
        if let Some(e) = fehler {
            self.melden(VoiceEvent::Fehler(e));
        }
        self.zustand_setzen(Zustand::Zerstoert);
        self.melden(VoiceEvent::Zerstoert);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vierter_fehlschlag_loest_einmal_aus() {
        let timeout = Duration::from_millis(500);
        let intervall = Duration::from_secs(1);
        let mut hb = Heartbeat::new(Puls::default(), timeout);
        let t0 = Instant::now();
        hb.starten(intervall, t0);

        let mut ausgeloest = 0;
        let mut verpasst = Vec::new();
        for k in 1..=4u32 {
            let versand = t0 + intervall * k;
            hb.fortschreiten(versand);
            hb.fortschreiten(versand + timeout);
            for aktion in aktionen_nehmen(&mut hb) {
                if let PulsAktion::Timeout(n) = aktion {
                    verpasst.push(n);
                    if lebendigkeit_verloren(n) {
                        ausgeloest += 1;
                    }
                }
            }
        }
        assert_eq!(verpasst, vec![1, 2, 3, 4]);
        assert_eq!(ausgeloest, 1);
    }

    #[test]
    fn ack_setzt_zaehler_zurueck() {
        let timeout = Duration::from_millis(500);
        let intervall = Duration::from_secs(1);
        let mut hb = Heartbeat::new(Puls::default(), timeout);
        let t0 = Instant::now();
        hb.starten(intervall, t0);

        for k in 1..=3u32 {
            let versand = t0 + intervall * k;
            hb.fortschreiten(versand);
            hb.fortschreiten(versand + timeout);
        }
        assert_eq!(hb.verpasst(), 3);

        let versand = t0 + intervall * 4;
        hb.fortschreiten(versand);
        hb.ack(versand + Duration::from_millis(20));
        assert_eq!(hb.verpasst(), 0);
        let aktionen = aktionen_nehmen(&mut hb);
        assert_eq!(
            aktionen.last(),
            Some(&PulsAktion::Ack(Some(Duration::from_millis(20))))
        );
        assert!(aktionen
            .iter()
            .all(|a| !matches!(a, PulsAktion::Timeout(n) if lebendigkeit_verloren(*n))));
    }

    #[test]
    fn veraltetes_ack_erzeugt_keine_aktion() {
        let mut hb = Heartbeat::new(Puls::default(), Duration::from_secs(5));
        let t0 = Instant::now();
        hb.starten(Duration::from_secs(1), t0);
        hb.fortschreiten(t0 + Duration::from_secs(1));
        hb.fortschreiten(t0 + Duration::from_secs(2));
        aktionen_nehmen(&mut hb);

        let jetzt = t0 + Duration::from_millis(2010);
        assert!(!hb.ack_pruefen(Some(1), jetzt));
        assert!(aktionen_nehmen(&mut hb).is_empty());
        assert!(hb.ack_pruefen(Some(2), jetzt));
        assert_eq!(
            aktionen_nehmen(&mut hb),
            vec![PulsAktion::Ack(Some(Duration::from_millis(10)))]
        );
    }

    #[test]
    fn puls_sammelt_in_reihenfolge() {
        let mut p = Puls::default();
        p.senden(1);
        p.bei_timeout(1);
        p.bei_ack(None);
        assert_eq!(
            p.aktionen,
            vec![
                PulsAktion::Senden(1),
                PulsAktion::Timeout(1),
                PulsAktion::Ack(None)
            ]
        );
    }
}
