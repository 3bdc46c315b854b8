//! Medien-Protokoll (UDP)
//!
//! Binaere Paketstrukturen der Medienstrecke: RTP-Header und
//! UDP-Keepalive. Die Nutzdaten hinter dem Header sind verschluesselt und
//! werden im Crypto-Crate behandelt.
//!
//! ## RTP-Header (12 Bytes, optional + 4 Bytes Erweiterung)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       1   Version/Flags (0x80, Bit 0x10 = Header-Erweiterung)
//!  1       1   Payload-Typ (0x78 = Opus)
//!  2       2   Sequenznummer (big-endian)
//!  4       4   Zeitstempel (big-endian, 48 kHz-Ticks)
//!  8       4   SSRC (big-endian)
//! 12       2   Erweiterungs-Profil 0xBEDE (nur mit Erweiterungs-Bit)
//! 14       2   Erweiterungslaenge in 4-Byte-Worten (big-endian)
//! ```

use std::io;

/// Erstes Header-Byte: RTP-Version 2, keine Flags
pub const RTP_VERSION_BYTE: u8 = 0x80;

/// Dynamischer Payload-Typ fuer Opus
pub const RTP_PAYLOAD_TYP_OPUS: u8 = 0x78;

/// Bit im ersten Header-Byte, das eine Header-Erweiterung ankuendigt
pub const RTP_ERWEITERUNG_BIT: u8 = 0x10;

/// Profil-Kennung einer Ein-Byte-Header-Erweiterung (RFC 8285)
pub const RTP_ERWEITERUNG_PROFIL: [u8; 2] = [0xBE, 0xDE];

/// Zusaetzliche Header-Laenge bei gesetztem Erweiterungs-Bit
pub const RTP_ERWEITERUNG_KOPF: usize = 4;

/// Laenge eines UDP-Keepalive-Datagramms
pub const KEEPALIVE_LAENGE: usize = 8;

// ---------------------------------------------------------------------------
// RtpHeader
// ---------------------------------------------------------------------------

/// 12-Byte RTP-Header
///
/// Direkte Byte-Serialisierung, kein serde (Performance-kritisch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    /// Erstes Byte inklusive Erweiterungs-Bit
    pub version_flags: u8,
    /// Payload-Typ (ohne Marker-Bit)
    pub payload_typ: u8,
    /// Sequenznummer, laeuft bei 2^16 ueber
    pub sequenz: u16,
    /// Zeitstempel in 48 kHz-Ticks, laeuft bei 2^32 ueber
    pub zeitstempel: u32,
    /// Synchronisation Source
    pub ssrc: u32,
}

impl RtpHeader {
    /// Header-Groesse ohne Erweiterung
    pub const SIZE: usize = 12;

    /// Header eines ausgehenden Opus-Pakets
    pub fn opus(sequenz: u16, zeitstempel: u32, ssrc: u32) -> Self {
        Self {
            version_flags: RTP_VERSION_BYTE,
            payload_typ: RTP_PAYLOAD_TYP_OPUS,
            sequenz,
            zeitstempel,
            ssrc,
        }
    }

    /// Serialisiert den Header (big-endian)
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.version_flags;
        buf[1] = self.payload_typ;
        buf[2..4].copy_from_slice(&self.sequenz.to_be_bytes());
        buf[4..8].copy_from_slice(&self.zeitstempel.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        buf
    }

    /// Liest die festen 12 Header-Bytes
    ///
    /// # Fehler
    /// - `InvalidData` wenn das Slice kuerzer als 12 Bytes ist
    /// - `InvalidData` wenn die RTP-Version nicht 2 ist
    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "RTP-Header zu kurz: {} Bytes (erwartet {})",
                    buf.len(),
                    Self::SIZE
                ),
            ));
        }
        if buf[0] >> 6 != 2 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Ungueltige RTP-Version: {}", buf[0] >> 6),
            ));
        }
        Ok(Self {
            version_flags: buf[0],
            payload_typ: buf[1] & 0x7F,
            sequenz: u16::from_be_bytes([buf[2], buf[3]]),
            zeitstempel: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }

    /// Gibt true zurueck wenn das Erweiterungs-Bit gesetzt ist
    pub fn hat_erweiterung(&self) -> bool {
        self.version_flags & RTP_ERWEITERUNG_BIT != 0
    }
}

/// Unverschluesselte Header-Laenge eines empfangenen Pakets (12 oder 16)
pub fn header_laenge(paket: &[u8]) -> usize {
    match paket.first() {
        Some(b) if b & RTP_ERWEITERUNG_BIT != 0 => RtpHeader::SIZE + RTP_ERWEITERUNG_KOPF,
        _ => RtpHeader::SIZE,
    }
}

/// Laenge der Header-Erweiterung in 4-Byte-Worten
///
/// Nur vorhanden, wenn auf Byte 12 das Profil 0xBEDE folgt. Die Worte
/// selbst stehen verschluesselt am Anfang der Nutzdaten.
pub fn erweiterungs_worte(paket: &[u8]) -> Option<u16> {
    if paket.len() < RtpHeader::SIZE + RTP_ERWEITERUNG_KOPF {
        return None;
    }
    if paket[12..14] != RTP_ERWEITERUNG_PROFIL {
        return None;
    }
    Some(u16::from_be_bytes([paket[14], paket[15]]))
}

/// Gibt true zurueck fuer RTP-Audio (nicht RTCP, nicht Keepalive)
pub fn ist_rtp_audio(paket: &[u8]) -> bool {
    paket.len() >= RtpHeader::SIZE
        && paket[0] >> 6 == 2
        && !(200..=204).contains(&paket[1])
}

// ---------------------------------------------------------------------------
// UDP-Keepalive
// ---------------------------------------------------------------------------

/// Kodiert ein Keepalive-Datagramm (Zaehler little-endian, Rest Null)
///
/// Der Voice-Server sendet das Datagramm unveraendert zurueck.
pub fn keepalive_kodieren(zaehler: u32) -> [u8; KEEPALIVE_LAENGE] {
    let mut buf = [0u8; KEEPALIVE_LAENGE];
    buf[..4].copy_from_slice(&zaehler.to_le_bytes());
    buf
}

/// Liest den Zaehler aus einem zurueckgesendeten Keepalive
pub fn keepalive_dekodieren(buf: &[u8]) -> Option<u32> {
    if buf.len() != KEEPALIVE_LAENGE {
        return None;
    }
    Some(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
