//! Verschluesselungsmodi der Medienstrecke
//!
//! Der Voice-Server bietet in `Ready` eine Liste von Modi an, der Client
//! waehlt in `SelectProtocol` genau einen aus. Beide Modi sind
//! "rtpsize"-Varianten: der RTP-Header ist unverschluesselt und dient als
//! AAD, die 4 Nonce-Bytes haengen am Paketende.

use serde::{Deserialize, Serialize};

/// Laenge des Authentifizierungs-Tags beider AEAD-Verfahren
pub const TAG_LAENGE: usize = 16;

/// Anzahl der Nonce-Bytes, die unverkuerzt im Paket uebertragen werden
pub const NONCE_ENDE_LAENGE: usize = 4;

/// Laenge des geheimen Schluessels aus `SessionDescription`
pub const SCHLUESSEL_LAENGE: usize = 32;

/// AEAD-Modus fuer die RTP-Nutzdaten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VerschluesselungsModus {
    /// AES-256-GCM, 12-Byte-Nonce
    #[serde(rename = "aead_aes256_gcm_rtpsize")]
    Aes256GcmRtpsize,
    /// XChaCha20-Poly1305, 24-Byte-Nonce
    #[serde(rename = "aead_xchacha20_poly1305_rtpsize")]
    XChaCha20Poly1305Rtpsize,
}

impl VerschluesselungsModus {
    /// Reihenfolge der Praeferenz bei der Auswahl
    pub const BEVORZUGT: [Self; 2] = [Self::Aes256GcmRtpsize, Self::XChaCha20Poly1305Rtpsize];

    /// Name auf dem Draht
    pub fn als_str(&self) -> &'static str {
        match self {
            Self::Aes256GcmRtpsize => "aead_aes256_gcm_rtpsize",
            Self::XChaCha20Poly1305Rtpsize => "aead_xchacha20_poly1305_rtpsize",
        }
    }

    /// Volle Nonce-Laenge des Verfahrens (nach Zero-Padding)
    pub fn nonce_laenge(&self) -> usize {
        match self {
            Self::Aes256GcmRtpsize => 12,
            Self::XChaCha20Poly1305Rtpsize => 24,
        }
    }

    /// Waehlt den ersten bevorzugten Modus, den der Server anbietet
    pub fn auswaehlen<S: AsRef<str>>(angeboten: &[S]) -> Option<Self> {
        Self::BEVORZUGT
            .into_iter()
            .find(|modus| angeboten.iter().any(|a| a.as_ref() == modus.als_str()))
    }
}

impl std::fmt::Display for VerschluesselungsModus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.als_str())
    }
}

impl std::str::FromStr for VerschluesselungsModus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aead_aes256_gcm_rtpsize" => Ok(Self::Aes256GcmRtpsize),
            "aead_xchacha20_poly1305_rtpsize" => Ok(Self::XChaCha20Poly1305Rtpsize),
            other => Err(format!("Unbekannter Verschluesselungsmodus: '{}'", other)),
        }
    }
}
