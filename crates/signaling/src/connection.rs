//! Signalkanal – eine WebSocket-Verbindung zum Voice-Gateway
//!
//! Jede Verbindung bekommt einen Pump-Task, der den WebSocket besitzt.
//! Der Besitzer des `SignalKanal` spricht nur ueber zwei Queues mit ihm:
//!
//! ```text
//! SignalKanal::senden ----> Befehl (mpsc) ----+
//!                                             v
//!                                      Pump-Task  <---> WebSocket
//!                                             |
//! SignalKanal::naechstes <-- SignalEreignis --+
//! ```
//!
//! ## Keepalive
//! - Unabhaengig vom Gateway-Heartbeat (op 3) sendet der Pump-Task auf
//!   Wunsch rohe WebSocket-Ping-Frames
//! - Payload ist ein 4-Byte-Zaehler (big-endian), siehe [`PingZaehler`]

use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use sprechfunk_core::UserId;
use sprechfunk_protocol::control::{
    GatewayNachricht, Ready, SessionDescription, Speaking, GATEWAY_VERSION,
    MIN_HEARTBEAT_INTERVALL,
};

use crate::error::{SignalingError, SignalingResult};
use crate::keepalive::PingZaehler;

/// Groesse der Ereignis-Queue zwischen Pump-Task und Besitzer
const EREIGNIS_QUEUE_GROESSE: usize = 64;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ---------------------------------------------------------------------------
// Ereignisse
// ---------------------------------------------------------------------------

/// Eingehende, bereits dekodierte Ereignisse des Voice-Gateways
#[derive(Debug, Clone, PartialEq)]
pub enum SignalEreignis {
    /// Heartbeat-Intervall (op 8)
    Hello { intervall: Duration },
    /// Sitzungsparameter (op 2)
    Bereit(Ready),
    /// Ausgehandelter Modus und Schluessel (op 4)
    Sitzungsbeschreibung(SessionDescription),
    /// Heartbeat bestaetigt (op 6)
    HeartbeatAck { nonce: Option<u64> },
    /// Sprechstatus eines Teilnehmers (op 5)
    Sprechen(Speaking),
    /// Teilnehmer betreten den Kanal (op 11)
    ClientVerbunden(Vec<UserId>),
    /// Teilnehmer verlaesst den Kanal (op 13)
    ClientGetrennt(UserId),
    /// Wiederaufnahme bestaetigt (op 9)
    Fortgesetzt,
    /// Verbindung beendet. Danach folgen keine Ereignisse mehr.
    Geschlossen { code: Option<u16> },
}

impl SignalEreignis {
    /// Ordnet eine eingehende Nachricht einem Ereignis zu
    ///
    /// Nur vom Client gesendete Opcodes und unbekannte Opcodes ergeben
    /// `None`.
    pub fn aus_nachricht(nachricht: GatewayNachricht) -> Option<Self> {
        Some(match nachricht {
            GatewayNachricht::Hello(hello) => {
                let intervall = hello.intervall().unwrap_or_else(|| {
                    tracing::warn!(
                        intervall_ms = hello.heartbeat_interval,
                        "Ungueltiges Heartbeat-Intervall im Hello, Mindestwert verwendet"
                    );
                    MIN_HEARTBEAT_INTERVALL
                });
                Self::Hello { intervall }
            }
            GatewayNachricht::Ready(ready) => Self::Bereit(ready),
            GatewayNachricht::SessionDescription(sd) => Self::Sitzungsbeschreibung(sd),
            GatewayNachricht::HeartbeatAck(nonce) => Self::HeartbeatAck { nonce },
            GatewayNachricht::Speaking(s) => Self::Sprechen(s),
            GatewayNachricht::ClientConnect(c) => Self::ClientVerbunden(c.user_ids),
            GatewayNachricht::ClientDisconnect(c) => Self::ClientGetrennt(c.user_id),
            GatewayNachricht::Resumed => Self::Fortgesetzt,
            andere => {
                tracing::debug!(op = andere.opcode(), "Opcode ignoriert");
                return None;
            }
        })
    }
}

/// Befehle an den Pump-Task
#[derive(Debug)]
enum Befehl {
    Senden(String),
    Keepalive(Option<Duration>),
    Schliessen(Option<u16>),
}

// ---------------------------------------------------------------------------
// Endpunkt
// ---------------------------------------------------------------------------

/// Baut die Gateway-URL aus dem Endpunkt der Sitzungsdaten
///
/// Fehlt das Schema, wird `wss://` angenommen. Die Protokollversion wird
/// als `v`-Parameter angehaengt.
pub fn endpunkt_url(endpunkt: &str) -> SignalingResult<String> {
    let endpunkt = endpunkt.trim();
    if endpunkt.is_empty() {
        return Err(SignalingError::Endpunkt("leerer Endpunkt".into()));
    }

    let mit_schema = if endpunkt.starts_with("ws://") || endpunkt.starts_with("wss://") {
        endpunkt.to_string()
    } else if endpunkt.contains("://") {
        return Err(SignalingError::Endpunkt(format!(
            "nicht unterstuetztes Schema: {endpunkt}"
        )));
    } else {
        format!("wss://{endpunkt}")
    };

    let trenner = if mit_schema.contains('?') { '&' } else { '?' };
    let basis = if mit_schema.contains('?') || mit_schema.ends_with('/') {
        mit_schema
    } else {
        format!("{mit_schema}/")
    };
    Ok(format!("{basis}{trenner}v={GATEWAY_VERSION}"))
}

// ---------------------------------------------------------------------------
// SignalKanal
// ---------------------------------------------------------------------------

/// Handle auf eine offene Gateway-Verbindung
pub struct SignalKanal {
    befehle: mpsc::UnboundedSender<Befehl>,
    ereignisse: mpsc::Receiver<SignalEreignis>,
    zerstoert: bool,
    pumpe: JoinHandle<()>,
}

impl SignalKanal {
    /// Baut die Verbindung auf und sendet sofort `eroeffnung`
    ///
    /// `eroeffnung` ist `Identify` fuer eine neue Sitzung oder `Resume`
    /// fuer eine Wiederaufnahme.
    pub async fn oeffnen(url: &str, eroeffnung: &GatewayNachricht) -> SignalingResult<Self> {
        let erste = eroeffnung.to_json()?;
        tracing::debug!(url, op = eroeffnung.opcode(), "Verbinde mit Voice-Gateway");

        let (mut ws, _antwort) = tokio_tungstenite::connect_async(url).await?;
        ws.send(Message::Text(erste.into())).await?;
        tracing::info!(url, op = eroeffnung.opcode(), "Voice-Gateway verbunden");

        let (befehle_tx, befehle_rx) = mpsc::unbounded_channel();
        let (ereignis_tx, ereignis_rx) = mpsc::channel(EREIGNIS_QUEUE_GROESSE);
        let pumpe = tokio::spawn(pumpen(ws, befehle_rx, ereignis_tx));

        Ok(Self {
            befehle: befehle_tx,
            ereignisse: ereignis_rx,
            zerstoert: false,
            pumpe,
        })
    }

    /// Sendet eine Nachricht an das Gateway
    pub fn senden(&self, nachricht: &GatewayNachricht) -> SignalingResult<()> {
        if self.zerstoert {
            return Err(SignalingError::Zerstoert);
        }
        let json = nachricht.to_json()?;
        tracing::trace!(op = nachricht.opcode(), "Gateway-Nachricht gesendet");
        self.befehle
            .send(Befehl::Senden(json))
            .map_err(|_| SignalingError::VerbindungGetrennt)
    }

    /// Wartet auf das naechste Ereignis
    ///
    /// Gibt `None` zurueck sobald der Kanal zerstoert oder die Verbindung
    /// beendet ist.
    pub async fn naechstes(&mut self) -> Option<SignalEreignis> {
        if self.zerstoert {
            return None;
        }
        self.ereignisse.recv().await
    }

    /// Startet, aendert oder stoppt (`None` oder Null) den Ping-Keepalive
    pub fn setze_keepalive(&self, intervall: Option<Duration>) {
        if self.zerstoert {
            return;
        }
        let intervall = intervall.filter(|d| !d.is_zero());
        let _ = self.befehle.send(Befehl::Keepalive(intervall));
    }

    /// Schliesst die Verbindung. Mehrfacher Aufruf ist unschaedlich.
    ///
    /// Stoppt den Keepalive und sendet einen Close-Frame mit `code`. Noch
    /// nicht abgeholte Ereignisse werden verworfen.
    pub fn zerstoeren(&mut self, code: Option<u16>) {
        if self.zerstoert {
            return;
        }
        self.zerstoert = true;
        let _ = self.befehle.send(Befehl::Keepalive(None));
        let _ = self.befehle.send(Befehl::Schliessen(code));
        self.ereignisse.close();
        tracing::debug!(code = ?code, "Signalkanal zerstoert");
    }

    pub fn ist_zerstoert(&self) -> bool {
        self.zerstoert
    }

    /// Gibt true zurueck solange der Pump-Task laeuft
    pub fn ist_verbunden(&self) -> bool {
        !self.zerstoert && !self.pumpe.is_finished()
    }
}

impl Drop for SignalKanal {
    fn drop(&mut self) {
        // Pump-Task beendet sich selbst, sobald die Befehls-Queue schliesst
        self.zerstoeren(None);
    }
}

// ---------------------------------------------------------------------------
// Pump-Task
// ---------------------------------------------------------------------------

async fn naechster_ping(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(intervall) => {
            intervall.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn pumpen(
    ws: WsStream,
    mut befehle: mpsc::UnboundedReceiver<Befehl>,
    ereignisse: mpsc::Sender<SignalEreignis>,
) {
    let (mut sink, mut stream) = ws.split();
    let mut keepalive: Option<Interval> = None;
    let mut zaehler = PingZaehler::default();

    let code = loop {
        tokio::select! {
            befehl = befehle.recv() => match befehl {
                Some(Befehl::Senden(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        tracing::warn!(fehler = %e, "Senden an Voice-Gateway fehlgeschlagen");
                        break None;
                    }
                }
                Some(Befehl::Keepalive(intervall)) => {
                    keepalive = intervall.map(|d| {
                        let mut iv = tokio::time::interval_at(Instant::now() + d, d);
                        iv.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        iv
                    });
                    tracing::debug!(intervall = ?intervall, "WebSocket-Keepalive gesetzt");
                }
                Some(Befehl::Schliessen(code)) => {
                    let frame = code.map(|c| CloseFrame {
                        code: WsCloseCode::from(c),
                        reason: Utf8Bytes::from_static(""),
                    });
                    let _ = sink.send(Message::Close(frame)).await;
                    // Besitzer wartet nicht mehr auf Ereignisse
                    return;
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
            },

            nachricht = stream.next() => match nachricht {
                Some(Ok(Message::Text(text))) => {
                    match GatewayNachricht::from_json(text.as_str()) {
                        Ok(n) => {
                            let Some(ereignis) = SignalEreignis::aus_nachricht(n) else {
                                continue;
                            };
                            if ereignisse.send(ereignis).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(fehler = %e, "Ungueltige Gateway-Nachricht ignoriert");
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code));
                    tracing::info!(code = ?code, "Voice-Gateway hat die Verbindung geschlossen");
                    break code;
                }
                Some(Ok(Message::Pong(_))) => {
                    tracing::trace!("Pong empfangen");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(fehler = %e, "WebSocket-Fehler");
                    break None;
                }
                None => {
                    tracing::info!("WebSocket-Stream beendet");
                    break None;
                }
            },

            _ = naechster_ping(&mut keepalive) => {
                let payload = Bytes::copy_from_slice(zaehler.naechster());
                if let Err(e) = sink.send(Message::Ping(payload)).await {
                    tracing::warn!(fehler = %e, "Ping fehlgeschlagen");
                    break None;
                }
                tracing::trace!(zaehler = zaehler.wert(), "Ping gesendet");
            }
        }
    };

    let _ = ereignisse.send(SignalEreignis::Geschlossen { code }).await;
}
