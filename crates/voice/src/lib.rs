//! sprechfunk-voice – Medienstrecke einer Voice-Sitzung
//!
//! ## Module
//! - [`udp`] – UDP-Socket, IP-Discovery und Empfangs-Loop
//! - [`heartbeat`] – Timer-freier Lebendigkeits-Tracker
//! - [`scheduler`] – Gemeinsamer 20 ms Sende-Takt aller Sitzungen

pub mod heartbeat;
pub mod scheduler;
pub mod udp;

pub use heartbeat::{Heartbeat, HeartbeatHooks, MAX_VERPASSTE_HEARTBEATS};
pub use scheduler::{AudioQuelle, SendeTakt, TaktErgebnis, TaktStatistik};
pub use udp::{MedienTransport, TransportEreignis};
