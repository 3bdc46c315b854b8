//! Gemeinsame Typen fuer das Kryptografie-Subsystem

/// Sicherer Schluessel-Container (wird beim Drop genullt)
#[derive(Clone)]
pub struct SecretBytes(pub Vec<u8>);

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBytes([REDACTED] {} bytes)", self.0.len())
    }
}

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Sende-Nonce der Medienstrecke
///
/// Ein 32-Bit-Zaehler, der big-endian in die ersten 4 Bytes einer sonst
/// mit Nullen gefuellten Nonce voller Laenge geschrieben wird. Nur diese
/// 4 Bytes werden am Paketende uebertragen.
#[derive(Debug, Clone, Default)]
pub struct NonceZaehler {
    wert: u32,
}

impl NonceZaehler {
    /// Zaehler, der mit dem naechsten Aufruf `start + 1` liefert
    pub fn ab(start: u32) -> Self {
        Self { wert: start }
    }

    /// Erhoeht den Zaehler (Ueberlauf bei 2^32 - 1 auf 0) und liefert ihn
    pub fn naechster(&mut self) -> u32 {
        self.wert = self.wert.wrapping_add(1);
        self.wert
    }

    /// Zuletzt vergebener Wert
    pub fn aktuell(&self) -> u32 {
        self.wert
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_bytes_debug_zeigt_keinen_inhalt() {
        let s = SecretBytes::new(vec![0xAB; 32]);
        let text = format!("{s:?}");
        assert!(text.contains("REDACTED"));
        assert!(!text.contains("171"));
        assert_eq!(s.len(), 32);
    }

    #[test]
    fn nonce_zaehler_beginnt_bei_eins() {
        let mut z = NonceZaehler::default();
        assert_eq!(z.naechster(), 1);
        assert_eq!(z.naechster(), 2);
    }

    #[test]
    fn nonce_zaehler_laeuft_auf_null_ueber() {
        let mut z = NonceZaehler::ab(u32::MAX - 1);
        assert_eq!(z.naechster(), u32::MAX);
        assert_eq!(z.naechster(), 0);
        assert_eq!(z.aktuell(), 0);
    }
}
