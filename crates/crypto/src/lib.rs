//! # sprechfunk-crypto
//!
//! Verschluesselung der UDP-Medienstrecke.
//!
//! ## Module
//! - `rtp` - RTP-Framer: AEAD-Verschluesselung der Opus-Nutzdaten
//! - `types` - Gemeinsame Typen (SecretBytes, NonceZaehler)
//! - `error` - Fehlertypen und Verwerfungsgruende

pub mod error;
pub mod rtp;
pub mod types;

// Bequeme Re-Exports
pub use error::{CryptoError, CryptoResult, Verworfen};
pub use rtp::{EmpfangenesPaket, RtpFramer, RtpSequenz};
pub use types::{NonceZaehler, SecretBytes};
