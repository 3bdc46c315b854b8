//! Empfangspfad: entschluesselt eingehende RTP-Pakete und ordnet sie
//! einem Teilnehmer zu

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use sprechfunk_core::{UserId, VoiceEvent};
use sprechfunk_crypto::RtpFramer;
use sprechfunk_observability::VoiceMetrics;
use sprechfunk_protocol::voice::ist_rtp_audio;

#[derive(Default)]
pub(crate) struct Empfaenger {
    sprecher: HashMap<u32, UserId>,
    metriken: Option<Arc<VoiceMetrics>>,
}

impl Empfaenger {
    pub(crate) fn new(metriken: Option<Arc<VoiceMetrics>>) -> Self {
        Self {
            metriken,
            ..Default::default()
        }
    }

    /// Ordnet eine SSRC einem Teilnehmer zu (aus Speaking, op 5)
    pub(crate) fn sprecher_setzen(&mut self, ssrc: u32, user_id: Option<UserId>) {
        match user_id {
            Some(user) => {
                self.sprecher.insert(ssrc, user);
            }
            None => {
                self.sprecher.remove(&ssrc);
            }
        }
    }

    pub(crate) fn user_entfernen(&mut self, user_id: UserId) {
        self.sprecher.retain(|_, u| *u != user_id);
    }

    pub(crate) fn user(&self, ssrc: u32) -> Option<UserId> {
        self.sprecher.get(&ssrc).copied()
    }

    /// Verarbeitet ein Datagramm
    ///
    /// Nicht-Audio (RTCP, Keepalive) wird stillschweigend uebergangen,
    /// nicht entschluesselbare Pakete werden gezaehlt und verworfen.
    pub(crate) fn paket(&mut self, framer: &mut RtpFramer, daten: &[u8]) -> Option<VoiceEvent> {
        if !ist_rtp_audio(daten) {
            return None;
        }
        match framer.decode(daten) {
            Ok(paket) => {
                if let Some(m) = &self.metriken {
                    m.pakete_empfangen_total.inc();
                }
                let ssrc = paket.header.ssrc;
                Some(VoiceEvent::Sprechen {
                    user_id: self.user(ssrc),
                    ssrc,
                    audio: Bytes::from(paket.audio),
                })
            }
            Err(grund) => {
                tracing::trace!(grund = %grund, laenge = daten.len(), "RTP-Paket verworfen");
                if let Some(m) = &self.metriken {
                    m.paket_verworfen(grund.grund());
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprechfunk_crypto::{RtpSequenz, SecretBytes};
    use sprechfunk_protocol::VerschluesselungsModus;

    fn framer() -> RtpFramer {
        RtpFramer::new(
            VerschluesselungsModus::Aes256GcmRtpsize,
            &SecretBytes::new(vec![3; 32]),
        )
        .unwrap()
    }

    #[test]
    fn paket_mit_bekanntem_sprecher() {
        let mut sender = framer();
        let mut seq = RtpSequenz::mit_start(77, 1, 0);
        let paket = sender.encode(b"hallo", &mut seq).unwrap();

        let mut empf = Empfaenger::new(None);
        empf.sprecher_setzen(77, Some(UserId(5)));
        match empf.paket(&mut framer(), &paket) {
            Some(VoiceEvent::Sprechen {
                user_id,
                ssrc,
                audio,
            }) => {
                assert_eq!(user_id, Some(UserId(5)));
                assert_eq!(ssrc, 77);
                assert_eq!(audio.as_ref(), b"hallo");
            }
            andere => panic!("Erwartet Sprechen, erhalten {andere:?}"),
        }

        empf.user_entfernen(UserId(5));
        assert_eq!(empf.user(77), None);
    }

    #[test]
    fn beschaedigtes_paket_verworfen() {
        let metriken = Arc::new(VoiceMetrics::neu().unwrap());
        let mut sender = framer();
        let mut seq = RtpSequenz::mit_start(1, 1, 0);
        let mut paket = sender.encode(b"abc", &mut seq).unwrap();
        let n = paket.len();
        paket[n - 6] ^= 0xFF;

        let mut empf = Empfaenger::new(Some(metriken.clone()));
        assert!(empf.paket(&mut framer(), &paket).is_none());
        assert_eq!(metriken.pakete_empfangen_total.get(), 0.0);
        let wert = metriken
            .pakete_verworfen_total
            .with_label_values(&["authentifizierung"])
            .get();
        assert_eq!(wert, 1);
    }

    #[test]
    fn rtcp_und_keepalive_uebergangen() {
        let metriken = Arc::new(VoiceMetrics::neu().unwrap());
        let mut empf = Empfaenger::new(Some(metriken.clone()));
        let mut rtcp = vec![0u8; 40];
        rtcp[0] = 0x80;
        rtcp[1] = 200;
        assert!(empf.paket(&mut framer(), &rtcp).is_none());
        assert!(empf.paket(&mut framer(), &[1, 0, 0, 0, 0, 0, 0, 0]).is_none());
        assert_eq!(metriken.pakete_empfangen_total.get(), 0.0);
        // Nicht-Audio zaehlt nicht als verworfen, ohne Label kein Export
        let export = metriken.exportieren().unwrap();
        assert!(!export.contains("sprechfunk_pakete_verworfen_total"), "{export}");
    }
}
