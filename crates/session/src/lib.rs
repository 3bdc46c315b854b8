//! sprechfunk-session – Sprachsitzungen
//!
//! Verbindet Signalisierung, Medienstrecke und Sende-Takt zu einer
//! Sitzung mit eigenem Treiber-Task.
//!
//! ## Module
//! - `config` - Zugangsdaten und Zeitlimits
//! - `state` - Lebenszyklus (`Status`)
//! - `connection` - Handle fuer Aufrufer (`VoiceConnection`)
//! - `manager` - Eine Sitzung pro Guild (`VoiceManager`)
//! - `driver` - Treiber-Task mit der `select!`-Schleife
//! - `sender` / `receiver` - Sende- und Empfangspfad

pub mod config;
pub mod connection;
mod driver;
pub mod manager;
mod receiver;
mod sender;
pub mod state;

pub use config::{SitzungsConfig, SitzungsDaten};
pub use connection::VoiceConnection;
pub use manager::VoiceManager;
pub use state::{Status, Wiederaufnahme};
