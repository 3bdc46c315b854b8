//! Opus-Taktung der Medienstrecke
//!
//! Das Encoding selbst geschieht ausserhalb. Hier stehen nur die festen
//! Groessen, nach denen Frames getaktet und RTP-Zeitstempel gezaehlt werden.

use std::time::Duration;

/// Abtastrate von Opus auf der Discord-Medienstrecke
pub const ABTASTRATE: u32 = 48_000;

/// Nominale Dauer eines Audio-Frames
pub const FRAME_DAUER: Duration = Duration::from_millis(20);

/// Samples pro Frame (20 ms bei 48 kHz), zugleich Zeitstempel-Schritt
pub const SAMPLES_PRO_FRAME: u32 = 960;

/// Opus-Frame, der Stille kodiert
pub const STILLE_FRAME: [u8; 3] = [0xF8, 0xFF, 0xFE];

/// Anzahl Stille-Frames nach dem Ende einer Sprechsequenz
///
/// Verhindert Interpolations-Artefakte beim Empfaenger.
pub const STILLE_FRAMES_NACHLAUF: u8 = 5;

/// Berechnet die Samples pro Frame fuer eine beliebige Frame-Dauer
pub fn samples_pro_frame(dauer: Duration) -> u32 {
    (dauer.as_micros() as u64 * ABTASTRATE as u64 / 1_000_000) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_frame_hat_960_samples() {
        assert_eq!(samples_pro_frame(FRAME_DAUER), SAMPLES_PRO_FRAME);
    }

    #[test]
    fn samples_fuer_andere_dauern() {
        assert_eq!(samples_pro_frame(Duration::from_millis(10)), 480);
        assert_eq!(samples_pro_frame(Duration::from_millis(60)), 2880);
    }
}
