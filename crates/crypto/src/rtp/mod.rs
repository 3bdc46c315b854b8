//! RTP-Framer der Medienstrecke
//!
//! Verpackt Opus-Frames in verschluesselte RTP-Pakete und entpackt
//! empfangene Pakete. Beide unterstuetzten Modi teilen dasselbe Format:
//!
//! ```text
//! [RTP-Header 12/16] [Ciphertext] [Auth-Tag 16] [Nonce-Ende 4]
//! ```
//!
//! Der Header ist unverschluesselt und geht als AAD in die
//! Authentifizierung ein. Die Nonce wird aus den 4 angehaengten Bytes
//! rekonstruiert, der Rest ist mit Nullen aufgefuellt.

mod decrypt;
mod encrypt;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce as AesNonce};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};

use sprechfunk_protocol::codec::SAMPLES_PRO_FRAME;
use sprechfunk_protocol::crypto::SCHLUESSEL_LAENGE;
use sprechfunk_protocol::{RtpHeader, VerschluesselungsModus};

use crate::error::{CryptoError, CryptoResult};
use crate::types::{NonceZaehler, SecretBytes};

/// Groesste Nonce-Laenge aller Modi (XChaCha20)
const MAX_NONCE_LAENGE: usize = 24;

// ---------------------------------------------------------------------------
// RtpSequenz
// ---------------------------------------------------------------------------

/// Fortlaufende RTP-Felder eines Senders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpSequenz {
    pub ssrc: u32,
    pub sequenz: u16,
    pub zeitstempel: u32,
    /// Zeitstempel-Schritt pro Frame (960 bei 20 ms)
    pub schritt: u32,
}

impl RtpSequenz {
    /// Neue Sequenz mit zufaelligem Startwert fuer Sequenz und Zeitstempel
    pub fn neu(ssrc: u32) -> Self {
        Self::mit_start(ssrc, rand::random::<u16>(), rand::random::<u32>())
    }

    /// Neue Sequenz mit festen Startwerten
    pub fn mit_start(ssrc: u32, sequenz: u16, zeitstempel: u32) -> Self {
        Self {
            ssrc,
            sequenz,
            zeitstempel,
            schritt: SAMPLES_PRO_FRAME,
        }
    }

    /// Header fuer das naechste Paket
    pub fn header(&self) -> RtpHeader {
        RtpHeader::opus(self.sequenz, self.zeitstempel, self.ssrc)
    }

    /// Schaltet auf das naechste Paket weiter (mit Ueberlauf)
    pub fn fortschreiten(&mut self) {
        self.sequenz = self.sequenz.wrapping_add(1);
        self.zeitstempel = self.zeitstempel.wrapping_add(self.schritt);
    }
}

// ---------------------------------------------------------------------------
// AEAD-Verfahren
// ---------------------------------------------------------------------------

enum AeadVerfahren {
    Aes256Gcm(Aes256Gcm),
    XChaCha20Poly1305(XChaCha20Poly1305),
}

impl AeadVerfahren {
    fn neu(modus: VerschluesselungsModus, schluessel: &[u8]) -> CryptoResult<Self> {
        if schluessel.len() != SCHLUESSEL_LAENGE {
            return Err(CryptoError::UngueltigeSchluesselLaenge {
                erwartet: SCHLUESSEL_LAENGE,
                erhalten: schluessel.len(),
            });
        }
        let laenge_falsch = |_| CryptoError::UngueltigeSchluesselLaenge {
            erwartet: SCHLUESSEL_LAENGE,
            erhalten: schluessel.len(),
        };
        Ok(match modus {
            VerschluesselungsModus::Aes256GcmRtpsize => {
                Self::Aes256Gcm(Aes256Gcm::new_from_slice(schluessel).map_err(laenge_falsch)?)
            }
            VerschluesselungsModus::XChaCha20Poly1305Rtpsize => Self::XChaCha20Poly1305(
                XChaCha20Poly1305::new_from_slice(schluessel).map_err(laenge_falsch)?,
            ),
        })
    }

    /// Liefert Ciphertext mit angehaengtem 16-Byte-Tag
    fn verschluesseln(&self, nonce: &[u8], aad: &[u8], klartext: &[u8]) -> CryptoResult<Vec<u8>> {
        let payload = Payload {
            msg: klartext,
            aad,
        };
        let ergebnis = match self {
            Self::Aes256Gcm(c) => c.encrypt(AesNonce::from_slice(nonce), payload),
            Self::XChaCha20Poly1305(c) => c.encrypt(XNonce::from_slice(nonce), payload),
        };
        ergebnis.map_err(|e| CryptoError::Verschluesselung(e.to_string()))
    }

    /// Erwartet Ciphertext mit angehaengtem Tag, `None` bei ungueltigem Tag
    fn entschluesseln(&self, nonce: &[u8], aad: &[u8], daten: &[u8]) -> Option<Vec<u8>> {
        let payload = Payload { msg: daten, aad };
        let ergebnis = match self {
            Self::Aes256Gcm(c) => c.decrypt(AesNonce::from_slice(nonce), payload),
            Self::XChaCha20Poly1305(c) => c.decrypt(XNonce::from_slice(nonce), payload),
        };
        ergebnis.ok()
    }
}

// ---------------------------------------------------------------------------
// RtpFramer
// ---------------------------------------------------------------------------

/// Entschluesseltes Paket eines anderen Teilnehmers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmpfangenesPaket {
    pub header: RtpHeader,
    /// Opus-Nutzdaten ohne Header-Erweiterung
    pub audio: Vec<u8>,
}

/// Ver- und Entschluesselung fuer genau eine Sitzung und einen Modus
pub struct RtpFramer {
    modus: VerschluesselungsModus,
    verfahren: AeadVerfahren,
    sende_zaehler: NonceZaehler,
    sende_nonce: [u8; MAX_NONCE_LAENGE],
    empfangs_nonce: [u8; MAX_NONCE_LAENGE],
}

impl RtpFramer {
    /// Erstellt den Framer aus dem Ergebnis von `SessionDescription`
    ///
    /// # Fehler
    /// `UngueltigeSchluesselLaenge` wenn der Schluessel nicht 32 Bytes hat
    pub fn new(modus: VerschluesselungsModus, schluessel: &SecretBytes) -> CryptoResult<Self> {
        let verfahren = AeadVerfahren::neu(modus, schluessel.as_bytes())?;
        tracing::debug!(modus = %modus, "RTP-Framer initialisiert");
        Ok(Self {
            modus,
            verfahren,
            sende_zaehler: NonceZaehler::default(),
            sende_nonce: [0u8; MAX_NONCE_LAENGE],
            empfangs_nonce: [0u8; MAX_NONCE_LAENGE],
        })
    }

    /// Ausgehandelter Modus
    pub fn modus(&self) -> VerschluesselungsModus {
        self.modus
    }

    fn nonce_laenge(&self) -> usize {
        self.modus.nonce_laenge()
    }
}

impl std::fmt::Debug for RtpFramer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtpFramer")
            .field("modus", &self.modus)
            .field("sende_zaehler", &self.sende_zaehler.aktuell())
            .finish_non_exhaustive()
    }
}
