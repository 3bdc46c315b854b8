//! Verschluesselung ausgehender Frames
//!
//! ## Nonce-Aufbau
//! ```text
//! [zaehler(4, big-endian)] [0x00 ...] (12 bzw. 24 Bytes)
//! ```

use crate::error::CryptoResult;
use sprechfunk_protocol::crypto::{NONCE_ENDE_LAENGE, TAG_LAENGE};

use super::{RtpFramer, RtpSequenz};

impl RtpFramer {
    /// Verpackt einen Opus-Frame in ein verschluesseltes RTP-Paket
    ///
    /// Nutzt die aktuellen Felder von `sequenz` und schaltet sie danach
    /// weiter. Jeder Aufruf verwendet eine neue Nonce.
    pub fn encode(&mut self, payload: &[u8], sequenz: &mut RtpSequenz) -> CryptoResult<Vec<u8>> {
        let header = sequenz.header().encode();

        let zaehler = self.sende_zaehler.naechster();
        let nonce_ende = zaehler.to_be_bytes();
        self.sende_nonce[..NONCE_ENDE_LAENGE].copy_from_slice(&nonce_ende);

        let laenge = self.nonce_laenge();
        let verschluesselt = self
            .verfahren
            .verschluesseln(&self.sende_nonce[..laenge], &header, payload)?;

        let mut paket =
            Vec::with_capacity(header.len() + payload.len() + TAG_LAENGE + NONCE_ENDE_LAENGE);
        paket.extend_from_slice(&header);
        paket.extend_from_slice(&verschluesselt);
        paket.extend_from_slice(&nonce_ende);

        sequenz.fortschreiten();
        Ok(paket)
    }
}

#[cfg(test)]
mod tests {
    use crate::rtp::{RtpFramer, RtpSequenz};
    use crate::types::SecretBytes;
    use sprechfunk_protocol::VerschluesselungsModus;

    fn framer(modus: VerschluesselungsModus) -> RtpFramer {
        RtpFramer::new(modus, &SecretBytes::new(vec![7u8; 32])).unwrap()
    }

    #[test]
    fn paket_layout() {
        let mut f = framer(VerschluesselungsModus::Aes256GcmRtpsize);
        let mut seq = RtpSequenz::mit_start(0x0102_0304, 10, 1000);
        let paket = f.encode(b"opus", &mut seq).unwrap();

        // Header + 4 Bytes Ciphertext + 16 Tag + 4 Nonce
        assert_eq!(paket.len(), 12 + 4 + 16 + 4);
        assert_eq!(&paket[..2], &[0x80, 0x78]);
        assert_eq!(&paket[2..4], &10u16.to_be_bytes());
        assert_eq!(&paket[8..12], &[0x01, 0x02, 0x03, 0x04]);
        // Erste Nonce ist 1
        assert_eq!(&paket[paket.len() - 4..], &[0, 0, 0, 1]);
    }

    #[test]
    fn sequenz_und_zeitstempel_schreiten_fort() {
        let mut f = framer(VerschluesselungsModus::XChaCha20Poly1305Rtpsize);
        let mut seq = RtpSequenz::mit_start(1, u16::MAX, u32::MAX - 100);
        f.encode(b"a", &mut seq).unwrap();
        assert_eq!(seq.sequenz, 0);
        assert_eq!(seq.zeitstempel, (u32::MAX - 100).wrapping_add(960));
    }

    #[test]
    fn nonce_aendert_sich_pro_paket() {
        let mut f = framer(VerschluesselungsModus::Aes256GcmRtpsize);
        let mut seq = RtpSequenz::mit_start(1, 0, 0);
        let a = f.encode(b"gleich", &mut seq).unwrap();
        let b = f.encode(b"gleich", &mut seq).unwrap();
        assert_ne!(a[12..a.len() - 4], b[12..b.len() - 4]);
        assert_eq!(&b[b.len() - 4..], &[0, 0, 0, 2]);
    }
}
