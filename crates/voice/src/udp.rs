//! UDP-Medienstrecke – Discovery, Senden und Empfangs-Loop
//!
//! Ein Socket pro Sitzung, verbunden mit dem Voice-Server aus `Ready`.
//!
//! ## Ablauf
//!
//! ```text
//! binden(server)
//!     |
//!     v
//! entdecken(ssrc)        <- Probe senden, genau eine Antwort abwarten
//!     |
//!     v
//! empfang_starten()      <- Task: recv() --> TransportEreignis (mpsc)
//!     |
//!     v
//! senden(paket)          <- fire-and-forget, auch aus dem Sende-Takt
//! ```
//!
//! ## Performance
//! - Empfangspuffer liegt auf dem Stack und wird wiederverwendet
//! - `senden` blockiert nie: `try_send`, ein voller Socket-Puffer verwirft

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::sync::{mpsc, oneshot};

use sprechfunk_core::TransportFehler;
use sprechfunk_protocol::discovery::{self, Entdeckung};

/// Maximale UDP-Paketgroesse (Header 16 + Opus-Maximum + Tag/Nonce + Puffer)
const UDP_BUFFER_SIZE: usize = 1500;

/// Wartezeit auf die Discovery-Antwort
pub const ENTDECKUNG_TIMEOUT: Duration = Duration::from_secs(2);

/// Groesse der Ereignis-Queue zwischen Empfangs-Loop und Besitzer
const EREIGNIS_QUEUE_GROESSE: usize = 256;

/// Ereignisse der Empfangs-Loop
#[derive(Debug, Clone)]
pub enum TransportEreignis {
    /// Eingehendes Datagramm
    Nachricht(Bytes),
    /// Socket-Fehler, die Loop laeuft weiter
    Fehler(TransportFehler),
    /// Loop beendet, danach folgen keine Ereignisse mehr
    Geschlossen,
}

/// Laufende Empfangs-Loop
struct Empfang {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// UDP-Socket einer Sitzung
///
/// Alle Methoden nehmen `&self`, der Transport wird zwischen Sitzung und
/// Sende-Takt als `Arc` geteilt.
pub struct MedienTransport {
    socket: Arc<UdpSocket>,
    server: SocketAddr,
    geschlossen: AtomicBool,
    empfang: Mutex<Option<Empfang>>,
}

impl MedienTransport {
    /// Bindet einen lokalen Socket und verbindet ihn mit dem Voice-Server
    pub async fn binden(server: SocketAddr) -> Result<Self, TransportFehler> {
        let lokal: SocketAddr = if server.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(lokal).await?;
        socket.connect(server).await?;
        tracing::debug!(
            server = %server,
            lokal = ?socket.local_addr().ok(),
            "UDP-Medienstrecke gebunden"
        );

        Ok(Self {
            socket: Arc::new(socket),
            server,
            geschlossen: AtomicBool::new(false),
            empfang: Mutex::new(None),
        })
    }

    /// Adresse des Voice-Servers
    pub fn server_adresse(&self) -> SocketAddr {
        self.server
    }

    /// Gibt die lokale Bind-Adresse zurueck
    pub fn lokale_adresse(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Gibt true zurueck nach `schliessen`
    pub fn ist_geschlossen(&self) -> bool {
        self.geschlossen.load(Ordering::Acquire)
    }

    /// Sendet ein Datagramm ohne zu warten
    ///
    /// Ein voller Sendepuffer verwirft das Paket still (UDP-Semantik),
    /// nur echte Socket-Fehler werden gemeldet.
    pub fn senden(&self, daten: &[u8]) -> Result<(), TransportFehler> {
        if self.ist_geschlossen() {
            return Err(TransportFehler::Geschlossen);
        }
        match self.socket.try_send(daten) {
            Ok(_) => {
                tracing::trace!(bytes = daten.len(), ziel = %self.server, "UDP-Paket gesendet");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                tracing::debug!(ziel = %self.server, "Sendepuffer voll, Paket verworfen");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(fehler = %e, ziel = %self.server, "UDP-Sendefehler");
                Err(e.into())
            }
        }
    }

    /// Ermittelt die oeffentliche Adresse ueber eine Discovery-Probe
    ///
    /// Muss vor `empfang_starten` aufgerufen werden, da die Antwort direkt
    /// vom Socket gelesen wird. Timeout und Socket-Fehler werden als
    /// Firewall/NAT-Diagnose gemeldet.
    pub async fn entdecken(&self, ssrc: u32) -> Result<Entdeckung, TransportFehler> {
        self.entdecken_mit_timeout(ssrc, ENTDECKUNG_TIMEOUT).await
    }

    /// Wie `entdecken`, mit eigenem Timeout
    pub async fn entdecken_mit_timeout(
        &self,
        ssrc: u32,
        timeout: Duration,
    ) -> Result<Entdeckung, TransportFehler> {
        let firewall = |grund: String| TransportFehler::FirewallOderNat {
            adresse: self.server.to_string(),
            grund,
        };

        let probe = discovery::anfrage_kodieren(ssrc);
        self.socket
            .send(&probe)
            .await
            .map_err(|e| firewall(format!("Probe nicht gesendet: {e}")))?;

        let mut buf = [0u8; UDP_BUFFER_SIZE];
        let laenge = match tokio::time::timeout(timeout, self.socket.recv(&mut buf)).await {
            Ok(Ok(laenge)) => laenge,
            Ok(Err(e)) => return Err(firewall(format!("Socket-Fehler: {e}"))),
            Err(_) => {
                return Err(firewall(format!(
                    "keine Antwort nach {} ms",
                    timeout.as_millis()
                )))
            }
        };

        let entdeckung = discovery::antwort_dekodieren(&buf[..laenge])
            .map_err(|e| TransportFehler::UngueltigeAntwort(e.to_string()))?;
        tracing::debug!(
            ip = %entdeckung.ip,
            port = entdeckung.port,
            ssrc,
            "IP-Discovery abgeschlossen"
        );
        Ok(entdeckung)
    }

    /// Startet die Empfangs-Loop und liefert deren Ereignisse
    ///
    /// Ein erneuter Aufruf beendet die vorherige Loop.
    pub fn empfang_starten(&self) -> mpsc::Receiver<TransportEreignis> {
        let (tx, rx) = mpsc::channel(EREIGNIS_QUEUE_GROESSE);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let socket = Arc::clone(&self.socket);
        let server = self.server;

        let task = tokio::spawn(empfangs_loop(socket, server, tx, shutdown_rx));
        let vorher = self.empfang.lock().replace(Empfang { shutdown_tx, task });
        if let Some(alt) = vorher {
            let _ = alt.shutdown_tx.send(());
        }
        rx
    }

    /// Schliesst die Medienstrecke. Mehrfacher Aufruf ist unschaedlich.
    pub fn schliessen(&self) {
        if !self.geschlossen.swap(true, Ordering::AcqRel) {
            tracing::debug!(server = %self.server, "UDP-Medienstrecke geschlossen");
        }
        if let Some(empfang) = self.empfang.lock().take() {
            let _ = empfang.shutdown_tx.send(());
        }
    }
}

impl Drop for MedienTransport {
    fn drop(&mut self) {
        if let Some(empfang) = self.empfang.get_mut().take() {
            empfang.task.abort();
        }
    }
}

async fn empfangs_loop(
    socket: Arc<UdpSocket>,
    server: SocketAddr,
    tx: mpsc::Sender<TransportEreignis>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    // Stack-allokierter Empfangspuffer – wird wiederverwendet (kein Heap pro Paket)
    let mut buf = [0u8; UDP_BUFFER_SIZE];

    tracing::debug!(server = %server, "UDP-Empfangs-Loop gestartet");

    loop {
        tokio::select! {
            result = socket.recv(&mut buf) => {
                let ereignis = match result {
                    Ok(len) => TransportEreignis::Nachricht(Bytes::copy_from_slice(&buf[..len])),
                    Err(e) => {
                        tracing::warn!(fehler = %e, server = %server, "UDP-Empfangsfehler");
                        TransportEreignis::Fehler(e.into())
                    }
                };
                match tx.try_send(ereignis) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!(server = %server, "Ereignis-Queue voll, Datagramm verworfen");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }

            _ = &mut shutdown_rx => {
                let _ = tx.send(TransportEreignis::Geschlossen).await;
                break;
            }
        }
    }

    tracing::debug!(server = %server, "UDP-Empfangs-Loop beendet");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
