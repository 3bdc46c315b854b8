//! Lebenszyklus einer Sitzung

use sprechfunk_protocol::Entdeckung;
use tokio::time::Instant;

/// Oeffentlich sichtbarer Zustand einer Sitzung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Signalisierungskanal wird aufgebaut, Identify laeuft
    Signalisierung,
    /// Medienstrecke (Discovery, Protokollwahl) wird aufgebaut
    Verbindet,
    /// Audio kann gesendet und empfangen werden
    Bereit,
    /// Verbindung verloren, Wiederaufnahme laeuft
    Wiederaufnahme,
    /// Keine automatische Wiederherstellung mehr, `erneut_beitreten` moeglich
    Getrennt,
    /// Terminal
    Zerstoert,
}

impl Status {
    pub fn ist_bereit(&self) -> bool {
        matches!(self, Self::Bereit)
    }

    pub fn ist_terminal(&self) -> bool {
        matches!(self, Self::Zerstoert)
    }
}

/// Art der Wiederaufnahme nach einem Verbindungsverlust
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wiederaufnahme {
    /// Resume mit bestehender Sitzung, Medienstrecke bleibt erhalten
    Fortsetzen,
    /// Vollstaendiger Neuaufbau ab Identify
    NeuIdentifizieren,
}

/// Interner Zustand mit den Daten der jeweiligen Phase
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Zustand {
    Signalisierung {
        versuch: u32,
    },
    Verbindet {
        versuch: u32,
        ssrc: u32,
        entdeckung: Option<Entdeckung>,
    },
    Bereit {
        ssrc: u32,
    },
    Wiederaufnahme {
        versuch: u32,
        modus: Wiederaufnahme,
        /// Zeitpunkt des naechsten Versuchs, `None` solange einer laeuft
        naechster_versuch: Option<Instant>,
    },
    Getrennt {
        grund: String,
    },
    Zerstoert,
}

impl Zustand {
    pub(crate) fn status(&self) -> Status {
        match self {
            Self::Signalisierung { .. } => Status::Signalisierung,
            Self::Verbindet { .. } => Status::Verbindet,
            Self::Bereit { .. } => Status::Bereit,
            Self::Wiederaufnahme { .. } => Status::Wiederaufnahme,
            Self::Getrennt { .. } => Status::Getrennt,
            Self::Zerstoert => Status::Zerstoert,
        }
    }

    /// Zahl der bisherigen Wiederaufnahme-Versuche
    pub(crate) fn versuch(&self) -> u32 {
        match self {
            Self::Signalisierung { versuch }
            | Self::Verbindet { versuch, .. }
            | Self::Wiederaufnahme { versuch, .. } => *versuch,
            _ => 0,
        }
    }

    /// Faelliger Wiederaufnahme-Versuch
    pub(crate) fn frist(&self) -> Option<Instant> {
        match self {
            Self::Wiederaufnahme {
                naechster_versuch, ..
            } => *naechster_versuch,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn status_und_versuch() {
        let z = Zustand::Verbindet {
            versuch: 2,
            ssrc: 1,
            entdeckung: None,
        };
        assert_eq!(z.status(), Status::Verbindet);
        assert_eq!(z.versuch(), 2);
        assert_eq!(Zustand::Bereit { ssrc: 1 }.versuch(), 0);
        assert!(Zustand::Zerstoert.status().ist_terminal());
        assert!(!Zustand::Getrennt { grund: "x".into() }.status().ist_terminal());
    }

    #[test]
    fn frist_nur_bei_wiederaufnahme() {
        let jetzt = Instant::now();
        let z = Zustand::Wiederaufnahme {
            versuch: 1,
            modus: Wiederaufnahme::Fortsetzen,
            naechster_versuch: Some(jetzt + Duration::from_secs(1)),
        };
        assert_eq!(z.frist(), Some(jetzt + Duration::from_secs(1)));
        assert_eq!(Zustand::Signalisierung { versuch: 0 }.frist(), None);
    }
}
