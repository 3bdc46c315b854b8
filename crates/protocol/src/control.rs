//! Signalisierungs-Protokoll (WebSocket)
//!
//! Jede Nachricht ist ein JSON-Objekt `{ "op": <opcode>, "d": <payload> }`.
//! `GatewayNachricht` bildet die Opcodes typsicher ab, unbekannte Opcodes
//! bleiben als `Unbekannt` erhalten und werden vom Empfaenger ignoriert.

use std::time::Duration;

use serde::de::Error as _;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use sprechfunk_core::{GuildId, UserId};

use crate::crypto::VerschluesselungsModus;

/// Version des Voice-Gateways, die in der URL angefragt wird
pub const GATEWAY_VERSION: u8 = 4;

/// Kuerzestes Heartbeat-Intervall, das aus `Hello` uebernommen wird
pub const MIN_HEARTBEAT_INTERVALL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

/// Opcodes des Voice-Gateways
pub struct Opcode;

impl Opcode {
    pub const IDENTIFY: u8 = 0;
    pub const SELECT_PROTOCOL: u8 = 1;
    pub const READY: u8 = 2;
    pub const HEARTBEAT: u8 = 3;
    pub const SESSION_DESCRIPTION: u8 = 4;
    pub const SPEAKING: u8 = 5;
    pub const HEARTBEAT_ACK: u8 = 6;
    pub const RESUME: u8 = 7;
    pub const HELLO: u8 = 8;
    pub const RESUMED: u8 = 9;
    pub const CLIENT_CONNECT: u8 = 11;
    pub const CLIENT_DISCONNECT: u8 = 13;
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Anmeldung einer neuen Sitzung (op 0)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identify {
    pub server_id: GuildId,
    pub user_id: UserId,
    pub session_id: String,
    pub token: String,
}

/// Wiederaufnahme einer bestehenden Sitzung (op 7)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resume {
    pub server_id: GuildId,
    pub session_id: String,
    pub token: String,
}

/// Adresse und Modus fuer die Medienstrecke
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtokollDaten {
    pub address: String,
    pub port: u16,
    pub mode: VerschluesselungsModus,
}

/// Protokollauswahl nach erfolgreicher Discovery (op 1)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectProtocol {
    pub protocol: String,
    pub data: ProtokollDaten,
}

impl SelectProtocol {
    /// Auswahl der UDP-Medienstrecke
    pub fn udp(address: impl Into<String>, port: u16, mode: VerschluesselungsModus) -> Self {
        Self {
            protocol: "udp".to_string(),
            data: ProtokollDaten {
                address: address.into(),
                port,
                mode,
            },
        }
    }
}

/// Sitzungsparameter vom Server (op 2)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ready {
    pub ssrc: u32,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub modes: Vec<String>,
}

/// Ausgehandelter Modus und Schluessel (op 4)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub mode: VerschluesselungsModus,
    pub secret_key: Vec<u8>,
}

impl std::fmt::Debug for SessionDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDescription")
            .field("mode", &self.mode)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

/// Sprechstatus (op 5), in beide Richtungen
///
/// Ausgehend traegt die Nachricht `delay`, eingehend `user_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Speaking {
    pub speaking: u8,
    pub ssrc: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

/// Sprechstatus einer Sitzung
///
/// Wird als Bitfeld im `speaking`-Feld von op 5 uebertragen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sprechstatus {
    #[default]
    Deaktiviert,
    /// Mikrofon
    Aktiviert,
    /// Soundshare, ohne Sprechanzeige
    Fake,
    /// Mikrofon mit Prioritaet
    Prioritaet,
}

impl Sprechstatus {
    /// Bitfeld fuer das `speaking`-Feld
    pub fn flags(&self) -> u8 {
        match self {
            Self::Deaktiviert => 0,
            Self::Aktiviert => 1 << 0,
            Self::Fake => 1 << 1,
            Self::Prioritaet => (1 << 0) | (1 << 2),
        }
    }

    /// Gibt true zurueck wenn der Status Audio ankuendigt
    pub fn ist_aktiv(&self) -> bool {
        !matches!(self, Self::Deaktiviert)
    }
}

impl Speaking {
    /// Ausgehende Sprechstatus-Nachricht der eigenen SSRC
    pub fn eigener(status: Sprechstatus, ssrc: u32) -> Self {
        Self {
            speaking: status.flags(),
            ssrc,
            delay: Some(0),
            user_id: None,
        }
    }
}

/// Heartbeat-Intervall vom Server (op 8)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    /// Intervall in Millisekunden (Discord sendet eine Gleitkommazahl)
    pub heartbeat_interval: f64,
}

impl Hello {
    /// Intervall als Dauer
    ///
    /// `None` fuer nicht endliche Werte und fuer alles unter
    /// [`MIN_HEARTBEAT_INTERVALL`].
    pub fn intervall(&self) -> Option<Duration> {
        let ms = self.heartbeat_interval;
        if !ms.is_finite() || ms <= 0.0 {
            return None;
        }
        let intervall = Duration::from_micros((ms * 1000.0).round() as u64);
        (intervall >= MIN_HEARTBEAT_INTERVALL).then_some(intervall)
    }
}

/// Teilnehmer haben den Kanal betreten (op 11)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConnect {
    pub user_ids: Vec<UserId>,
}

/// Ein Teilnehmer hat den Kanal verlassen (op 13)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDisconnect {
    pub user_id: UserId,
}

// ---------------------------------------------------------------------------
// Haupt-Enum: GatewayNachricht
// ---------------------------------------------------------------------------

/// Alle Nachrichten des Voice-Gateways
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayNachricht {
    Identify(Identify),
    SelectProtocol(SelectProtocol),
    Ready(Ready),
    /// Heartbeat mit Nonce (ueblicherweise Unix-Millisekunden)
    Heartbeat(u64),
    SessionDescription(SessionDescription),
    Speaking(Speaking),
    /// Bestaetigung, traegt die Nonce des Heartbeats sofern vorhanden
    HeartbeatAck(Option<u64>),
    Resume(Resume),
    Hello(Hello),
    Resumed,
    ClientConnect(ClientConnect),
    ClientDisconnect(ClientDisconnect),
    /// Opcode, den dieser Client nicht auswertet
    Unbekannt { op: u8, d: Value },
}

impl GatewayNachricht {
    /// Opcode der Nachricht
    pub fn opcode(&self) -> u8 {
        match self {
            Self::Identify(_) => Opcode::IDENTIFY,
            Self::SelectProtocol(_) => Opcode::SELECT_PROTOCOL,
            Self::Ready(_) => Opcode::READY,
            Self::Heartbeat(_) => Opcode::HEARTBEAT,
            Self::SessionDescription(_) => Opcode::SESSION_DESCRIPTION,
            Self::Speaking(_) => Opcode::SPEAKING,
            Self::HeartbeatAck(_) => Opcode::HEARTBEAT_ACK,
            Self::Resume(_) => Opcode::RESUME,
            Self::Hello(_) => Opcode::HELLO,
            Self::Resumed => Opcode::RESUMED,
            Self::ClientConnect(_) => Opcode::CLIENT_CONNECT,
            Self::ClientDisconnect(_) => Opcode::CLIENT_DISCONNECT,
            Self::Unbekannt { op, .. } => *op,
        }
    }

    /// Serialisiert die Nachricht als JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialisiert eine Nachricht aus JSON
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    fn payload(&self) -> serde_json::Result<Value> {
        match self {
            Self::Identify(p) => serde_json::to_value(p),
            Self::SelectProtocol(p) => serde_json::to_value(p),
            Self::Ready(p) => serde_json::to_value(p),
            Self::Heartbeat(nonce) => Ok(Value::from(*nonce)),
            Self::SessionDescription(p) => serde_json::to_value(p),
            Self::Speaking(p) => serde_json::to_value(p),
            Self::HeartbeatAck(nonce) => Ok(nonce.map(Value::from).unwrap_or(Value::Null)),
            Self::Resume(p) => serde_json::to_value(p),
            Self::Hello(p) => serde_json::to_value(p),
            Self::Resumed => Ok(Value::Null),
            Self::ClientConnect(p) => serde_json::to_value(p),
            Self::ClientDisconnect(p) => serde_json::to_value(p),
            Self::Unbekannt { d, .. } => Ok(d.clone()),
        }
    }
}

impl Serialize for GatewayNachricht {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::Error as _;
        let d = self.payload().map_err(S::Error::custom)?;
        let mut s = serializer.serialize_struct("GatewayNachricht", 2)?;
        s.serialize_field("op", &self.opcode())?;
        s.serialize_field("d", &d)?;
        s.end()
    }
}

/// Umschlag auf dem Draht, `seq`/`t` neuerer Versionen werden ignoriert
#[derive(Deserialize)]
struct Umschlag {
    op: u8,
    #[serde(default)]
    d: Value,
}

impl<'de> Deserialize<'de> for GatewayNachricht {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let Umschlag { op, d } = Umschlag::deserialize(deserializer)?;
        Self::aus_umschlag(op, d).map_err(D::Error::custom)
    }
}

impl GatewayNachricht {
    fn aus_umschlag(op: u8, d: Value) -> serde_json::Result<Self> {
        let nachricht = match op {
            Opcode::IDENTIFY => Self::Identify(serde_json::from_value(d)?),
            Opcode::SELECT_PROTOCOL => Self::SelectProtocol(serde_json::from_value(d)?),
            Opcode::READY => Self::Ready(serde_json::from_value(d)?),
            Opcode::HEARTBEAT => Self::Heartbeat(
                nonce_lesen(&d).ok_or_else(|| serde_json::Error::custom("Heartbeat ohne Nonce"))?,
            ),
            Opcode::SESSION_DESCRIPTION => Self::SessionDescription(serde_json::from_value(d)?),
            Opcode::SPEAKING => Self::Speaking(serde_json::from_value(d)?),
            Opcode::HEARTBEAT_ACK => Self::HeartbeatAck(nonce_lesen(&d)),
            Opcode::RESUME => Self::Resume(serde_json::from_value(d)?),
            Opcode::HELLO => Self::Hello(serde_json::from_value(d)?),
            Opcode::RESUMED => Self::Resumed,
            Opcode::CLIENT_CONNECT => Self::ClientConnect(serde_json::from_value(d)?),
            Opcode::CLIENT_DISCONNECT => Self::ClientDisconnect(serde_json::from_value(d)?),
            op => Self::Unbekannt { op, d },
        };
        Ok(nachricht)
    }
}

/// Nonce als Zahl (v4) oder als `{ "t": nonce }` (v8)
fn nonce_lesen(d: &Value) -> Option<u64> {
    match d {
        Value::Number(n) => n.as_u64(),
        Value::Object(o) => o.get("t").and_then(Value::as_u64),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Close-Codes
// ---------------------------------------------------------------------------

/// Reaktion der Sitzung auf einen Close-Code des Voice-Servers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchliessVerhalten {
    /// Sitzung mit Resume fortsetzen
    Fortsetzen,
    /// Sitzung ist serverseitig ungueltig, neu identifizieren
    NeuIdentifizieren,
    /// Aus dem Kanal entfernt, keine automatische Wiederherstellung
    Getrennt,
    /// Token oder Sitzung abgelehnt
    AuthentifizierungFatal,
    /// Protokoll, Version oder Modus abgelehnt
    ProtokollFatal,
}

/// Bekannte Close-Codes des Voice-Gateways
pub struct CloseCode;

impl CloseCode {
    pub const NICHT_AUTHENTIFIZIERT: u16 = 4003;
    pub const AUTHENTIFIZIERUNG_FEHLGESCHLAGEN: u16 = 4004;
    pub const SITZUNG_UNGUELTIG: u16 = 4006;
    pub const SITZUNG_ABGELAUFEN: u16 = 4009;
    pub const SERVER_NICHT_GEFUNDEN: u16 = 4011;
    pub const UNBEKANNTES_PROTOKOLL: u16 = 4012;
    pub const GETRENNT: u16 = 4014;
    pub const SERVER_ABGESTUERZT: u16 = 4015;
    pub const UNBEKANNTER_MODUS: u16 = 4016;

    /// Ordnet einen Close-Code einer Reaktion zu
    pub fn einordnen(code: u16) -> SchliessVerhalten {
        match code {
            Self::NICHT_AUTHENTIFIZIERT | Self::AUTHENTIFIZIERUNG_FEHLGESCHLAGEN => {
                SchliessVerhalten::AuthentifizierungFatal
            }
            Self::SERVER_NICHT_GEFUNDEN | Self::UNBEKANNTES_PROTOKOLL | Self::UNBEKANNTER_MODUS => {
                SchliessVerhalten::ProtokollFatal
            }
            Self::SITZUNG_UNGUELTIG | Self::SITZUNG_ABGELAUFEN => {
                SchliessVerhalten::NeuIdentifizieren
            }
            Self::GETRENNT => SchliessVerhalten::Getrennt,
            _ => SchliessVerhalten::Fortsetzen,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_intervall_gueltig_und_ungueltig() {
        let hello = |ms: f64| Hello {
            heartbeat_interval: ms,
        };
        assert_eq!(
            hello(13750.5).intervall(),
            Some(Duration::from_micros(13_750_500))
        );
        assert_eq!(hello(100.0).intervall(), Some(MIN_HEARTBEAT_INTERVALL));
        for ungueltig in [0.0, -41250.0, 99.9, f64::NAN, f64::INFINITY] {
            assert_eq!(hello(ungueltig).intervall(), None, "{ungueltig}");
        }
    }

    #[test]
    fn identify_drahtformat() {
        let msg = GatewayNachricht::Identify(Identify {
            server_id: GuildId(41771983423143937),
            user_id: UserId(104694319306248192),
            session_id: "my_session_id".into(),
            token: "my_token".into(),
        });
        let v: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(v["op"], 0);
        assert_eq!(v["d"]["server_id"], "41771983423143937");
        assert_eq!(v["d"]["user_id"], "104694319306248192");
        assert_eq!(v["d"]["token"], "my_token");
    }

    #[test]
    fn ready_wird_gelesen() {
        let json = r#"{"op":2,"d":{"ssrc":1,"ip":"127.0.0.1","port":1234,
            "modes":["aead_aes256_gcm_rtpsize","xsalsa20_poly1305"],"heartbeat_interval":1}}"#;
        match GatewayNachricht::from_json(json).unwrap() {
            GatewayNachricht::Ready(r) => {
                assert_eq!(r.ssrc, 1);
                assert_eq!(r.port, 1234);
                assert_eq!(r.modes.len(), 2);
            }
            andere => panic!("Erwartet Ready, erhalten {andere:?}"),
        }
    }

    #[test]
    fn select_protocol_drahtformat() {
        let msg = GatewayNachricht::SelectProtocol(SelectProtocol::udp(
            "203.0.113.7",
            50004,
            VerschluesselungsModus::Aes256GcmRtpsize,
        ));
        let v: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(v["op"], 1);
        assert_eq!(v["d"]["protocol"], "udp");
        assert_eq!(v["d"]["data"]["port"], 50004);
        assert_eq!(v["d"]["data"]["mode"], "aead_aes256_gcm_rtpsize");
    }

    #[test]
    fn session_description_mit_schluessel() {
        let schluessel: Vec<u8> = (0..32).collect();
        let json = serde_json::json!({
            "op": 4,
            "d": { "mode": "aead_xchacha20_poly1305_rtpsize", "secret_key": schluessel }
        })
        .to_string();
        match GatewayNachricht::from_json(&json).unwrap() {
            GatewayNachricht::SessionDescription(sd) => {
                assert_eq!(sd.mode, VerschluesselungsModus::XChaCha20Poly1305Rtpsize);
                assert_eq!(sd.secret_key.len(), 32);
                assert!(!format!("{sd:?}").contains("31"));
            }
            andere => panic!("Erwartet SessionDescription, erhalten {andere:?}"),
        }
    }

    #[test]
    fn heartbeat_ack_beide_formen() {
        let v4 = GatewayNachricht::from_json(r#"{"op":6,"d":1501184119561}"#).unwrap();
        assert_eq!(v4, GatewayNachricht::HeartbeatAck(Some(1501184119561)));
        let v8 = GatewayNachricht::from_json(r#"{"op":6,"d":{"t":42}}"#).unwrap();
        assert_eq!(v8, GatewayNachricht::HeartbeatAck(Some(42)));
    }

    #[test]
    fn heartbeat_nonce_als_zahl() {
        let json = GatewayNachricht::Heartbeat(1501184119561).to_json().unwrap();
        assert_eq!(json, r#"{"op":3,"d":1501184119561}"#);
    }

    #[test]
    fn speaking_eingehend_und_ausgehend() {
        let aus = GatewayNachricht::Speaking(Speaking {
            speaking: 1,
            ssrc: 7,
            delay: Some(0),
            user_id: None,
        });
        let v: Value = serde_json::from_str(&aus.to_json().unwrap()).unwrap();
        assert!(v["d"].get("user_id").is_none());
        assert_eq!(v["d"]["delay"], 0);

        let ein = r#"{"op":5,"d":{"user_id":"99","ssrc":12,"speaking":1}}"#;
        match GatewayNachricht::from_json(ein).unwrap() {
            GatewayNachricht::Speaking(s) => assert_eq!(s.user_id, Some(UserId(99))),
            andere => panic!("Erwartet Speaking, erhalten {andere:?}"),
        }
    }

    #[test]
    fn resumed_ohne_payload() {
        let msg = GatewayNachricht::from_json(r#"{"op":9,"d":null}"#).unwrap();
        assert_eq!(msg, GatewayNachricht::Resumed);
    }

    #[test]
    fn unbekannter_opcode_bleibt_erhalten() {
        let msg = GatewayNachricht::from_json(r#"{"op":18,"d":{"any":true}}"#).unwrap();
        assert!(matches!(msg, GatewayNachricht::Unbekannt { op: 18, .. }));
    }

    #[test]
    fn kaputtes_payload_ist_fehler() {
        assert!(GatewayNachricht::from_json(r#"{"op":2,"d":{"ssrc":"x"}}"#).is_err());
        assert!(GatewayNachricht::from_json("kein json").is_err());
    }

    #[test]
    fn close_codes_einordnen() {
        assert_eq!(CloseCode::einordnen(4004), SchliessVerhalten::AuthentifizierungFatal);
        assert_eq!(CloseCode::einordnen(4016), SchliessVerhalten::ProtokollFatal);
        assert_eq!(CloseCode::einordnen(4006), SchliessVerhalten::NeuIdentifizieren);
        assert_eq!(CloseCode::einordnen(4014), SchliessVerhalten::Getrennt);
        assert_eq!(CloseCode::einordnen(4015), SchliessVerhalten::Fortsetzen);
        assert_eq!(CloseCode::einordnen(1006), SchliessVerhalten::Fortsetzen);
    }

    #[test]
    fn sprechstatus_flags() {
        assert_eq!(Sprechstatus::Deaktiviert.flags(), 0);
        assert_eq!(Sprechstatus::Aktiviert.flags(), 1);
        assert_eq!(Sprechstatus::Fake.flags(), 2);
        assert_eq!(Sprechstatus::Prioritaet.flags(), 5);
        assert!(!Sprechstatus::default().ist_aktiv());

        let s = Speaking::eigener(Sprechstatus::Prioritaet, 77);
        assert_eq!((s.speaking, s.ssrc, s.delay), (5, 77, Some(0)));
    }
}
