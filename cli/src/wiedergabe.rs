//! Frame-Quellen fuer die Wiedergabe
//!
//! Ein Frame-Dump ist eine Folge von `u16`-Laengen (little-endian), jeweils
//! gefolgt von einem Opus-Frame dieser Laenge.

use std::path::Path;

use anyhow::{bail, Context};
use bytes::{Buf, Bytes};

use sprechfunk_protocol::codec::STILLE_FRAME;

/// Liefert die zu sendenden Opus-Frames
#[derive(Debug)]
pub enum FrameQuelle {
    /// Endlos Opus-Stille
    Stille,
    /// Frames aus einem Dump, einmal abgespielt
    Dump { frames: Vec<Bytes>, position: usize },
}

impl FrameQuelle {
    pub fn aus_datei(pfad: impl AsRef<Path>) -> anyhow::Result<Self> {
        let pfad = pfad.as_ref();
        let daten = std::fs::read(pfad)
            .with_context(|| format!("Frame-Dump '{}' nicht lesbar", pfad.display()))?;
        let frames = frames_lesen(Bytes::from(daten))
            .with_context(|| format!("Frame-Dump '{}' beschaedigt", pfad.display()))?;
        tracing::info!(pfad = %pfad.display(), frames = frames.len(), "Frame-Dump geladen");
        Ok(Self::Dump {
            frames,
            position: 0,
        })
    }

    pub fn naechster(&mut self) -> Option<Bytes> {
        match self {
            Self::Stille => Some(Bytes::from_static(&STILLE_FRAME)),
            Self::Dump { frames, position } => {
                let frame = frames.get(*position).cloned();
                *position += 1;
                frame
            }
        }
    }

    /// Verbleibende Frames, `None` bei endloser Quelle
    pub fn verbleibend(&self) -> Option<usize> {
        match self {
            Self::Stille => None,
            Self::Dump { frames, position } => Some(frames.len().saturating_sub(*position)),
        }
    }
}

/// Zerlegt einen Frame-Dump in einzelne Frames
pub fn frames_lesen(mut daten: Bytes) -> anyhow::Result<Vec<Bytes>> {
    let gesamt = daten.len();
    let mut frames = Vec::new();
    while daten.has_remaining() {
        let offset = gesamt - daten.remaining();
        if daten.remaining() < 2 {
            bail!("Laengenfeld bei Offset {offset} abgeschnitten");
        }
        let laenge = daten.get_u16_le() as usize;
        if laenge == 0 {
            bail!("Leerer Frame bei Offset {offset}");
        }
        if daten.remaining() < laenge {
            bail!(
                "Frame bei Offset {offset} abgeschnitten: {laenge} Bytes erwartet, {} vorhanden",
                daten.remaining()
            );
        }
        frames.push(daten.split_to(laenge));
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dump(frames: &[&[u8]]) -> Bytes {
        let mut buf = Vec::new();
        for f in frames {
            buf.extend_from_slice(&(f.len() as u16).to_le_bytes());
            buf.extend_from_slice(f);
        }
        Bytes::from(buf)
    }

    #[test]
    fn dump_wird_zerlegt() {
        let frames = frames_lesen(dump(&[b"abc", b"de", &[0xF8; 300]])).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].as_ref(), b"abc");
        assert_eq!(frames[1].as_ref(), b"de");
        assert_eq!(frames[2].len(), 300);
        assert!(frames_lesen(Bytes::new()).unwrap().is_empty());
    }

    #[test]
    fn abgeschnittener_dump_abgelehnt() {
        let mut daten = dump(&[b"abc", b"defg"]).to_vec();
        daten.truncate(daten.len() - 1);
        let fehler = frames_lesen(Bytes::from(daten)).unwrap_err().to_string();
        assert!(fehler.contains("Offset 5"), "{fehler}");

        assert!(frames_lesen(Bytes::from_static(&[3])).is_err());
        assert!(frames_lesen(Bytes::from_static(&[0, 0])).is_err());
    }

    #[test]
    fn stille_ist_endlos() {
        let mut q = FrameQuelle::Stille;
        for _ in 0..100 {
            assert_eq!(q.naechster().unwrap().as_ref(), &STILLE_FRAME);
        }
        assert_eq!(q.verbleibend(), None);
    }

    #[test]
    fn dump_endet() {
        let mut q = FrameQuelle::Dump {
            frames: frames_lesen(dump(&[b"a", b"b"])).unwrap(),
            position: 0,
        };
        assert_eq!(q.verbleibend(), Some(2));
        assert_eq!(q.naechster().unwrap().as_ref(), b"a");
        assert_eq!(q.naechster().unwrap().as_ref(), b"b");
        assert!(q.naechster().is_none());
        assert_eq!(q.verbleibend(), Some(0));
    }

    #[test]
    fn fehlende_datei_meldet_pfad() {
        let fehler = FrameQuelle::aus_datei("/nicht/vorhanden.dump").unwrap_err();
        assert!(fehler.to_string().contains("/nicht/vorhanden.dump"));
    }
}
