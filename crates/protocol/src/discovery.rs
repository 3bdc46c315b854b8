//! IP-Discovery-Pakete
//!
//! Vor dem ersten RTP-Paket erfragt der Client ueber die Medienstrecke
//! seine oeffentliche Adresse. Der Voice-Server spiegelt die Quelladresse
//! des Probe-Datagramms zurueck, der Port wird danach in `SelectProtocol`
//! angegeben.
//!
//! ## Paketformat (74 Bytes, beide Richtungen)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       2   Typ (0x1 = Anfrage, 0x2 = Antwort, big-endian)
//!  2       2   Laenge ohne Typ/Laenge = 70 (big-endian)
//!  4       4   SSRC (big-endian)
//!  8      64   Adresse, ASCII, NUL-terminiert (Anfrage: Nullen)
//! 72       2   Port (big-endian)
//! ```

use std::io;
use std::net::Ipv4Addr;

/// Gesamtlaenge eines Discovery-Pakets
pub const ENTDECKUNG_PAKET_LAENGE: usize = 74;

/// Wert des Laengenfelds (alles ausser Typ und Laenge)
pub const ENTDECKUNG_NUTZLAENGE: u16 = 70;

/// Typfeld einer Anfrage
pub const ENTDECKUNG_ANFRAGE: u16 = 0x1;

/// Typfeld einer Antwort
pub const ENTDECKUNG_ANTWORT: u16 = 0x2;

const ADRESSE_START: usize = 8;
const PORT_START: usize = 72;

/// Oeffentliche Adresse des Clients aus Sicht des Voice-Servers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entdeckung {
    pub ip: Ipv4Addr,
    pub port: u16,
}

/// Kodiert die Discovery-Anfrage fuer eine SSRC
pub fn anfrage_kodieren(ssrc: u32) -> [u8; ENTDECKUNG_PAKET_LAENGE] {
    let mut buf = [0u8; ENTDECKUNG_PAKET_LAENGE];
    buf[0..2].copy_from_slice(&ENTDECKUNG_ANFRAGE.to_be_bytes());
    buf[2..4].copy_from_slice(&ENTDECKUNG_NUTZLAENGE.to_be_bytes());
    buf[4..8].copy_from_slice(&ssrc.to_be_bytes());
    buf
}

/// Dekodiert die Discovery-Antwort
///
/// # Fehler
/// - `InvalidData` bei falschem Typfeld oder zu kurzer Antwort
/// - `InvalidData` wenn die Adresse fehlt, nicht terminiert ist oder
///   kein IPv4-Literal ist
pub fn antwort_dekodieren(buf: &[u8]) -> io::Result<Entdeckung> {
    if buf.len() < ENTDECKUNG_PAKET_LAENGE {
        return Err(ungueltig(format!(
            "Discovery-Antwort zu kurz: {} Bytes (erwartet {})",
            buf.len(),
            ENTDECKUNG_PAKET_LAENGE
        )));
    }

    let typ = u16::from_be_bytes([buf[0], buf[1]]);
    if typ != ENTDECKUNG_ANTWORT {
        return Err(ungueltig(format!(
            "Unerwarteter Discovery-Typ: {:#x} (erwartet {:#x})",
            typ, ENTDECKUNG_ANTWORT
        )));
    }

    let adressfeld = &buf[ADRESSE_START..PORT_START];
    let ende = adressfeld
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| ungueltig("Adresse nicht NUL-terminiert"))?;
    let text = std::str::from_utf8(&adressfeld[..ende])
        .map_err(|_| ungueltig("Adresse ist kein ASCII"))?;
    let ip: Ipv4Addr = text
        .parse()
        .map_err(|_| ungueltig(format!("Keine IPv4-Adresse: {text:?}")))?;

    let port = u16::from_be_bytes([buf[PORT_START], buf[PORT_START + 1]]);
    Ok(Entdeckung { ip, port })
}

fn ungueltig(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

#[cfg(test)]
pub(crate) fn antwort_bauen(adresse: &str, port: u16) -> [u8; ENTDECKUNG_PAKET_LAENGE] {
    let mut buf = [0u8; ENTDECKUNG_PAKET_LAENGE];
    buf[0..2].copy_from_slice(&ENTDECKUNG_ANTWORT.to_be_bytes());
    buf[2..4].copy_from_slice(&ENTDECKUNG_NUTZLAENGE.to_be_bytes());
    buf[4..8].copy_from_slice(&1234u32.to_be_bytes());
    buf[ADRESSE_START..ADRESSE_START + adresse.len()].copy_from_slice(adresse.as_bytes());
    buf[PORT_START..].copy_from_slice(&port.to_be_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anfrage_hat_festes_format() {
        let buf = anfrage_kodieren(0xDEAD_BEEF);
        assert_eq!(buf.len(), 74);
        assert_eq!(&buf[0..8], &[0x00, 0x01, 0x00, 0x46, 0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(buf[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn antwort_wird_gelesen() {
        let buf = antwort_bauen("203.0.113.7", 50004);
        let e = antwort_dekodieren(&buf).unwrap();
        assert_eq!(e.ip, Ipv4Addr::new(203, 0, 113, 7));
        assert_eq!(e.port, 50004);
    }

    #[test]
    fn falscher_typ_abgelehnt() {
        let mut buf = antwort_bauen("203.0.113.7", 50004);
        buf[1] = 0x1;
        assert!(antwort_dekodieren(&buf).is_err());
    }

    #[test]
    fn ipv6_adresse_abgelehnt() {
        let buf = antwort_bauen("2001:db8::1", 50004);
        assert!(antwort_dekodieren(&buf).is_err());
    }

    #[test]
    fn kaputte_adresse_abgelehnt() {
        for adresse in ["", "300.1.1.1", "1.2.3", "localhost"] {
            let buf = antwort_bauen(adresse, 1);
            assert!(
                antwort_dekodieren(&buf).is_err(),
                "Adresse {adresse:?} haette abgelehnt werden muessen"
            );
        }
    }

    #[test]
    fn fehlender_nul_terminator_abgelehnt() {
        let mut buf = antwort_bauen("1.2.3.4", 1);
        buf[ADRESSE_START..PORT_START].fill(b'1');
        assert!(antwort_dekodieren(&buf).is_err());
    }

    #[test]
    fn zu_kurze_antwort_abgelehnt() {
        let buf = antwort_bauen("1.2.3.4", 1);
        assert!(antwort_dekodieren(&buf[..40]).is_err());
    }
}
