//! Zaehler fuer WebSocket-Ping-Frames

/// Laufender Ping-Zaehler mit wiederverwendetem 4-Byte-Puffer
///
/// Der Zaehler laeuft bei `u32::MAX` auf 0 ueber und wird big-endian
/// geschrieben.
#[derive(Debug, Default)]
pub struct PingZaehler {
    wert: u32,
    puffer: [u8; 4],
}

impl PingZaehler {
    pub fn ab(start: u32) -> Self {
        Self {
            wert: start,
            puffer: [0; 4],
        }
    }

    /// Erhoeht den Zaehler und gibt den Ping-Payload zurueck
    pub fn naechster(&mut self) -> &[u8; 4] {
        self.wert = self.wert.wrapping_add(1);
        self.puffer = self.wert.to_be_bytes();
        &self.puffer
    }

    pub fn wert(&self) -> u32 {
        self.wert
    }
}
