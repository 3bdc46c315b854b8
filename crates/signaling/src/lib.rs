//! sprechfunk-signaling – Signalisierung zum Voice-Gateway
//!
//! Eine WebSocket-Verbindung pro Sitzung, JSON-Nachrichten im Format
//! `{"op": .., "d": ..}`. Der Kanal kennt keine Sitzungslogik, er
//! dekodiert nur und leitet weiter.
//!
//! ## Module
//! - [`connection`] – `SignalKanal` mit Pump-Task und Ping-Keepalive
//! - [`keepalive`] – Ping-Zaehler
//! - [`error`] – Fehlertypen

pub mod connection;
pub mod error;
pub mod keepalive;

pub use connection::{endpunkt_url, SignalEreignis, SignalKanal};
pub use error::{SignalingError, SignalingResult};
pub use keepalive::PingZaehler;
