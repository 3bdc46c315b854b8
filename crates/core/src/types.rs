//! Gemeinsame Identifikationstypen fuer Sprechfunk
//!
//! Discord-IDs sind 64-Bit-Snowflakes, die auf dem Draht als Strings
//! uebertragen werden. Das Newtype-Pattern schliesst Verwechslungen
//! zwischen Guild- und Benutzer-IDs zur Compilezeit aus.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

macro_rules! snowflake_id {
    ($(#[$meta:meta])* $name:ident, $praefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            /// Gibt den rohen Snowflake-Wert zurueck
            pub fn inner(&self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(wert: u64) -> Self {
                Self(wert)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($praefix, ":{}"), self.0)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                deserializer.deserialize_any(SnowflakeVisitor).map(Self)
            }
        }
    };
}

snowflake_id!(
    /// Discord-Guild (Server), in der die Sprachverbindung besteht
    GuildId,
    "guild"
);

snowflake_id!(
    /// Discord-Benutzer (auch der eigene Bot-Benutzer)
    UserId,
    "user"
);

/// Akzeptiert Snowflakes als String (Discord-Standard) oder als Zahl
struct SnowflakeVisitor;

impl<'de> Visitor<'de> for SnowflakeVisitor {
    type Value = u64;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("eine Snowflake-ID als String oder Zahl")
    }

    fn visit_u64<E: de::Error>(self, wert: u64) -> Result<u64, E> {
        Ok(wert)
    }

    fn visit_i64<E: de::Error>(self, wert: i64) -> Result<u64, E> {
        u64::try_from(wert).map_err(|_| E::custom(format!("negative Snowflake: {wert}")))
    }

    fn visit_str<E: de::Error>(self, wert: &str) -> Result<u64, E> {
        wert.parse()
            .map_err(|_| E::custom(format!("ungueltige Snowflake: {wert:?}")))
    }
}

/// Prozessweit eindeutige Kennung einer Sitzung
///
/// Wird beim Anlegen vergeben und nie wiederverwendet. Der Sende-Takt
/// sortiert seine Mitglieder nach dieser ID (Registrierungsreihenfolge).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SitzungsId(pub u64);

static NAECHSTE_SITZUNG: AtomicU64 = AtomicU64::new(1);

impl SitzungsId {
    /// Vergibt die naechste freie SitzungsId
    pub fn neu() -> Self {
        Self(NAECHSTE_SITZUNG.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SitzungsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sitzung:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snowflake_als_string_serialisiert() {
        let json = serde_json::to_string(&UserId(80351110224678912)).unwrap();
        assert_eq!(json, "\"80351110224678912\"");
    }

    #[test]
    fn snowflake_aus_string_und_zahl() {
        let a: GuildId = serde_json::from_str("\"41771983423143937\"").unwrap();
        let b: GuildId = serde_json::from_str("41771983423143937").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.inner(), 41771983423143937);
    }

    #[test]
    fn ungueltige_snowflake_abgelehnt() {
        assert!(serde_json::from_str::<UserId>("\"abc\"").is_err());
        assert!(serde_json::from_str::<UserId>("-5").is_err());
    }

    #[test]
    fn sitzungs_ids_steigen_monoton() {
        let a = SitzungsId::neu();
        let b = SitzungsId::neu();
        assert!(b > a);
    }

    #[test]
    fn display_praefix() {
        assert_eq!(GuildId(7).to_string(), "guild:7");
        assert_eq!(UserId(9).to_string(), "user:9");
    }
}
