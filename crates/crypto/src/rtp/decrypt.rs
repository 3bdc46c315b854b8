//! Entschluesselung empfangener Pakete
//!
//! Jeder Fehler fuehrt zu einem `Verworfen`-Ergebnis. Ein einzelnes
//! kaputtes Paket darf die Sitzung nie beenden.

use sprechfunk_protocol::crypto::{NONCE_ENDE_LAENGE, TAG_LAENGE};
use sprechfunk_protocol::voice::{erweiterungs_worte, header_laenge};
use sprechfunk_protocol::RtpHeader;

use crate::error::Verworfen;

use super::{EmpfangenesPaket, RtpFramer};

impl RtpFramer {
    /// Entpackt ein empfangenes RTP-Paket
    ///
    /// Bei gesetztem Erweiterungs-Bit ist der unverschluesselte Header
    /// 16 Bytes lang. Die Erweiterungsworte selbst liegen verschluesselt
    /// vor den Opus-Daten und werden nach dem Entschluesseln entfernt.
    pub fn decode(&mut self, paket: &[u8]) -> Result<EmpfangenesPaket, Verworfen> {
        let kopf = header_laenge(paket);
        let mindestens = kopf + TAG_LAENGE + NONCE_ENDE_LAENGE;
        if paket.len() < mindestens {
            return Err(Verworfen::ZuKurz {
                laenge: paket.len(),
                mindestens,
            });
        }

        let header = RtpHeader::decode(paket).map_err(|e| Verworfen::Header(e.to_string()))?;

        let nonce_start = paket.len() - NONCE_ENDE_LAENGE;
        self.empfangs_nonce[..NONCE_ENDE_LAENGE].copy_from_slice(&paket[nonce_start..]);

        let laenge = self.nonce_laenge();
        let mut audio = self
            .verfahren
            .entschluesseln(
                &self.empfangs_nonce[..laenge],
                &paket[..kopf],
                &paket[kopf..nonce_start],
            )
            .ok_or(Verworfen::Authentifizierung)?;

        if header.hat_erweiterung() {
            if let Some(worte) = erweiterungs_worte(paket) {
                let erweiterung = 4 * worte as usize;
                if erweiterung > audio.len() {
                    return Err(Verworfen::Erweiterung {
                        worte,
                        verfuegbar: audio.len(),
                    });
                }
                audio.drain(..erweiterung);
            }
        }

        Ok(EmpfangenesPaket { header, audio })
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Verworfen;
    use crate::rtp::{RtpFramer, RtpSequenz};
    use crate::types::SecretBytes;
    use sprechfunk_protocol::voice::RTP_ERWEITERUNG_BIT;
    use sprechfunk_protocol::VerschluesselungsModus;

    const MODI: [VerschluesselungsModus; 2] = [
        VerschluesselungsModus::Aes256GcmRtpsize,
        VerschluesselungsModus::XChaCha20Poly1305Rtpsize,
    ];

    fn paar(modus: VerschluesselungsModus) -> (RtpFramer, RtpFramer) {
        let schluessel = SecretBytes::new((0u8..32).collect());
        (
            RtpFramer::new(modus, &schluessel).unwrap(),
            RtpFramer::new(modus, &schluessel).unwrap(),
        )
    }

    /// Baut ein Paket, wie es ein anderer Teilnehmer mit Erweiterung sendet
    fn paket_mit_erweiterung(framer: &RtpFramer, worte: u16, klartext: &[u8]) -> Vec<u8> {
        let mut header = RtpSequenz::mit_start(99, 5, 4800).header().encode().to_vec();
        header[0] |= RTP_ERWEITERUNG_BIT;
        header.extend_from_slice(&[0xBE, 0xDE]);
        header.extend_from_slice(&worte.to_be_bytes());

        let mut nonce = [0u8; 24];
        nonce[..4].copy_from_slice(&77u32.to_be_bytes());
        let laenge = framer.modus().nonce_laenge();
        let verschluesselt = framer
            .verfahren
            .verschluesseln(&nonce[..laenge], &header, klartext)
            .unwrap();

        let mut paket = header;
        paket.extend_from_slice(&verschluesselt);
        paket.extend_from_slice(&77u32.to_be_bytes());
        paket
    }

    #[test]
    fn roundtrip_fuer_alle_groessen() {
        for modus in MODI {
            let (mut sender, mut empfaenger) = paar(modus);
            let mut seq = RtpSequenz::mit_start(42, 0, 0);
            for groesse in [0usize, 1, 3, 20, 160, 1275] {
                let payload: Vec<u8> = (0..groesse).map(|i| (i % 251) as u8).collect();
                let paket = sender.encode(&payload, &mut seq).unwrap();
                let empfangen = empfaenger.decode(&paket).unwrap();
                assert_eq!(empfangen.audio, payload, "Modus {modus}, Groesse {groesse}");
                assert_eq!(empfangen.header.ssrc, 42);
            }
        }
    }

    #[test]
    fn manipulierter_tag_wird_verworfen() {
        for modus in MODI {
            let (mut sender, mut empfaenger) = paar(modus);
            let mut seq = RtpSequenz::mit_start(1, 0, 0);
            let mut paket = sender.encode(b"Original-Audio", &mut seq).unwrap();
            let tag_byte = paket.len() - 4 - 1;
            paket[tag_byte] ^= 0xFF;
            assert_eq!(empfaenger.decode(&paket), Err(Verworfen::Authentifizierung));
        }
    }

    #[test]
    fn manipulierter_header_wird_verworfen() {
        let (mut sender, mut empfaenger) = paar(MODI[0]);
        let mut seq = RtpSequenz::mit_start(1, 0, 0);
        let mut paket = sender.encode(b"audio", &mut seq).unwrap();
        // SSRC ist Teil der AAD
        paket[11] ^= 0x01;
        assert_eq!(empfaenger.decode(&paket), Err(Verworfen::Authentifizierung));
    }

    #[test]
    fn falscher_schluessel_wird_verworfen() {
        let mut sender =
            RtpFramer::new(MODI[0], &SecretBytes::new(vec![1u8; 32])).unwrap();
        let mut empfaenger =
            RtpFramer::new(MODI[0], &SecretBytes::new(vec![2u8; 32])).unwrap();
        let mut seq = RtpSequenz::mit_start(1, 0, 0);
        let paket = sender.encode(b"geheim", &mut seq).unwrap();
        assert!(empfaenger.decode(&paket).is_err());
    }

    #[test]
    fn zu_kurzes_paket_wird_verworfen() {
        let (_, mut empfaenger) = paar(MODI[1]);
        assert!(matches!(
            empfaenger.decode(&[0x80, 0x78, 0, 1]),
            Err(Verworfen::ZuKurz { laenge: 4, mindestens: 32 })
        ));
        assert!(matches!(empfaenger.decode(&[]), Err(Verworfen::ZuKurz { .. })));
    }

    #[test]
    fn erweiterung_wird_entfernt() {
        for modus in MODI {
            let (_, mut empfaenger) = paar(modus);
            let klartext = [0x10, 0xAA, 0, 0, 1, 2, 3, 4, b'o', b'p', b'u', b's'];
            let paket = paket_mit_erweiterung(&empfaenger, 2, &klartext);
            let empfangen = empfaenger.decode(&paket).unwrap();
            assert!(empfangen.header.hat_erweiterung());
            assert_eq!(empfangen.audio, b"opus");
        }
    }

    #[test]
    fn zu_lange_erweiterung_wird_verworfen() {
        let (_, mut empfaenger) = paar(MODI[0]);
        let paket = paket_mit_erweiterung(&empfaenger, 9, &[0u8; 4]);
        assert_eq!(
            empfaenger.decode(&paket),
            Err(Verworfen::Erweiterung {
                worte: 9,
                verfuegbar: 4
            })
        );
    }

    #[test]
    fn leere_erweiterung_laesst_audio_unveraendert() {
        let (_, mut empfaenger) = paar(MODI[1]);
        let paket = paket_mit_erweiterung(&empfaenger, 0, b"abc");
        assert_eq!(empfaenger.decode(&paket).unwrap().audio, b"abc");
    }
}
