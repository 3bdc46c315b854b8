//! sprechfunk-core – Gemeinsame Typen, Ereignisse und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen Sprechfunk-Crates gemeinsam genutzt werden.

pub mod error;
pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{TransportFehler, VoiceError, VoiceResult};
pub use event::{LatenzQuelle, VoiceEvent};
pub use types::{GuildId, SitzungsId, UserId};
