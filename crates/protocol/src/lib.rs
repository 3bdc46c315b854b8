//! sprechfunk-protocol – Draht-Formate der Sprachverbindung
//!
//! Dieses Crate definiert alle Nachrichten und Paketformate, die zwischen
//! Client und Voice-Server ausgetauscht werden: JSON-Nachrichten des
//! Signalisierungskanals sowie die binaeren Pakete der UDP-Medienstrecke.

pub mod codec;
pub mod control;
pub mod crypto;
pub mod discovery;
pub mod voice;

pub use control::{CloseCode, GatewayNachricht, Opcode, SchliessVerhalten, Sprechstatus};
pub use crypto::VerschluesselungsModus;
pub use discovery::Entdeckung;
pub use voice::RtpHeader;
