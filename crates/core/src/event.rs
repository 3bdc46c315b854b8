//! Ereignisse einer Sprachsitzung
//!
//! Aufrufer abonnieren diese Ereignisse ueber einen
//! `tokio::sync::broadcast`-Kanal der Sitzung.

use std::time::Duration;

use bytes::Bytes;

use crate::error::VoiceError;
use crate::types::UserId;

/// Herkunft einer Latenzmessung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatenzQuelle {
    /// Heartbeat ueber den Signalisierungskanal (WebSocket)
    Signalisierung,
    /// Keepalive-Echo ueber die UDP-Medienstrecke
    Udp,
}

/// Alle Ereignisse, die eine Sitzung an ihre Aufrufer meldet
#[derive(Debug, Clone)]
pub enum VoiceEvent {
    /// Sitzung ist sendebereit (auch nach erfolgreicher Wiederaufnahme)
    Bereit { ssrc: u32 },
    /// Verbindung verloren, keine automatische Wiederherstellung mehr
    Getrennt { grund: String },
    /// Sitzung endgueltig beendet (terminal)
    Zerstoert,
    /// Entschluesseltes Audio eines anderen Teilnehmers
    Sprechen {
        user_id: Option<UserId>,
        ssrc: u32,
        audio: Bytes,
    },
    /// Teilnehmer haben den Kanal betreten
    ClientVerbunden { user_ids: Vec<UserId> },
    /// Ein Teilnehmer hat den Kanal verlassen
    ClientGetrennt { user_id: UserId },
    /// Neue Round-Trip-Messung
    Latenz { quelle: LatenzQuelle, rtt: Duration },
    /// Nicht-terminaler oder terminaler Fehler
    Fehler(VoiceError),
}

impl VoiceEvent {
    /// Gibt true zurueck fuer das letzte Ereignis einer Sitzung
    pub fn ist_terminal(&self) -> bool {
        matches!(self, Self::Zerstoert)
    }
}
