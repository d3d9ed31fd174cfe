//! Tag identities, protocol families and target metadata.
//!
//! A [`TargetInfo`] is what a reader reports for one tag in its field. It is a
//! closed sum over the supported protocol families; identity and type-name
//! extraction are total functions over it, so nothing downstream needs to
//! guess at a target's shape.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

// =============================================================================
// HEX HELPERS
// =============================================================================

/// Error returned when a hex string cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HexError {
    /// The input has an odd number of hex digits.
    #[error("hex string has odd length ({0} digits)")]
    OddLength(usize),

    /// The input contains a character that is not a hex digit.
    #[error("invalid hex digit '{0}'")]
    InvalidDigit(char),

    /// The input decodes to zero bytes where at least one is required.
    #[error("hex string is empty")]
    Empty,
}

/// Renders bytes as uppercase hex without separators (`04A1B2`).
#[must_use]
pub fn encode_hex(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Parses hex digits into bytes. Whitespace and `:` separators are ignored.
///
/// # Errors
///
/// Returns [`HexError`] if the digit count is odd or a character is not hex.
pub fn decode_hex(input: &str) -> Result<Vec<u8>, HexError> {
    let digits: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();

    hex::decode(&digits).map_err(|e| match e {
        hex::FromHexError::InvalidHexCharacter { c, .. } => HexError::InvalidDigit(c),
        hex::FromHexError::OddLength | hex::FromHexError::InvalidStringLength => {
            HexError::OddLength(digits.chars().count())
        }
    })
}

/// Serde adapter storing byte fields as hex strings.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::encode_hex(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::decode_hex(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// IDENTITY
// =============================================================================

/// Byte-exact identity of a physical tag within one reader session.
///
/// Compared, ordered and hashed as raw bytes; never interpreted numerically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagIdentity(Vec<u8>);

impl TagIdentity {
    /// Wraps raw identity bytes. Returns `None` for an empty slice, which
    /// cannot identify anything.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Option<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            None
        } else {
            Some(Self(bytes))
        }
    }

    /// Parses an identity from hex (`"04A1B2C3"`).
    ///
    /// # Errors
    ///
    /// Returns [`HexError`] for malformed or empty hex.
    pub fn from_hex(input: &str) -> Result<Self, HexError> {
        let bytes = decode_hex(input)?;
        Self::new(bytes).ok_or(HexError::Empty)
    }

    /// The raw identity bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Uppercase hex rendering, same as `Display`.
    #[must_use]
    pub fn to_hex(&self) -> String {
        encode_hex(&self.0)
    }
}

impl fmt::Display for TagIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for TagIdentity {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for TagIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TagIdentity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// PROTOCOL FAMILIES & MODULATIONS
// =============================================================================

/// Contactless protocol family a target answered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolFamily {
    /// ISO/IEC 14443 Type A (MIFARE, NTAG, ...).
    TypeA,
    /// ISO/IEC 14443 Type B.
    TypeB,
    /// Sony FeliCa.
    Felica,
    /// Innovision Jewel / Topaz.
    Jewel,
    /// HID iClass (ISO 14443-2B based).
    #[serde(rename = "iclass")]
    IClass,
}

impl ProtocolFamily {
    /// Every supported family.
    pub const ALL: [Self; 5] = [
        Self::TypeA,
        Self::TypeB,
        Self::Felica,
        Self::Jewel,
        Self::IClass,
    ];

    /// Human-readable type name.
    #[must_use]
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::TypeA => "ISO14443A",
            Self::TypeB => "ISO14443B",
            Self::Felica => "FeliCa",
            Self::Jewel => "Jewel",
            Self::IClass => "ISO14443B iClass",
        }
    }

    /// Baud rates a reader may use to poll this family.
    #[must_use]
    pub const fn supported_baud_rates(self) -> &'static [BaudRate] {
        match self {
            Self::TypeA | Self::TypeB => &[
                BaudRate::Kbps106,
                BaudRate::Kbps212,
                BaudRate::Kbps424,
                BaudRate::Kbps847,
            ],
            Self::Felica => &[BaudRate::Kbps212, BaudRate::Kbps424],
            Self::Jewel | Self::IClass => &[BaudRate::Kbps106],
        }
    }
}

impl fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Air-interface bit rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum BaudRate {
    /// 106 kbps
    Kbps106,
    /// 212 kbps
    Kbps212,
    /// 424 kbps
    Kbps424,
    /// 847 kbps
    Kbps847,
}

impl BaudRate {
    /// Rate in kbps.
    #[must_use]
    pub const fn kbps(self) -> u16 {
        match self {
            Self::Kbps106 => 106,
            Self::Kbps212 => 212,
            Self::Kbps424 => 424,
            Self::Kbps847 => 847,
        }
    }
}

impl TryFrom<u16> for BaudRate {
    type Error = String;

    fn try_from(kbps: u16) -> Result<Self, Self::Error> {
        match kbps {
            106 => Ok(Self::Kbps106),
            212 => Ok(Self::Kbps212),
            424 => Ok(Self::Kbps424),
            847 => Ok(Self::Kbps847),
            other => Err(format!(
                "unsupported baud rate {other} kbps (expected 106, 212, 424 or 847)"
            )),
        }
    }
}

impl From<BaudRate> for u16 {
    fn from(rate: BaudRate) -> Self {
        rate.kbps()
    }
}

/// One (family, baud rate) pair polled during a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Modulation {
    /// Protocol family to poll.
    pub family: ProtocolFamily,
    /// Bit rate to poll it at.
    pub baud_rate: BaudRate,
}

impl Modulation {
    /// Creates a modulation.
    #[must_use]
    pub const fn new(family: ProtocolFamily, baud_rate: BaudRate) -> Self {
        Self { family, baud_rate }
    }

    /// Whether a reader can poll this family at this rate.
    #[must_use]
    pub fn is_supported(self) -> bool {
        self.family.supported_baud_rates().contains(&self.baud_rate)
    }

    /// The default sweep: every family at its usual rate, FeliCa at both.
    #[must_use]
    pub fn default_sweep() -> Vec<Self> {
        vec![
            Self::new(ProtocolFamily::TypeA, BaudRate::Kbps106),
            Self::new(ProtocolFamily::TypeB, BaudRate::Kbps106),
            Self::new(ProtocolFamily::Felica, BaudRate::Kbps212),
            Self::new(ProtocolFamily::Felica, BaudRate::Kbps424),
            Self::new(ProtocolFamily::Jewel, BaudRate::Kbps106),
            Self::new(ProtocolFamily::IClass, BaudRate::Kbps106),
        ]
    }
}

impl fmt::Display for Modulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}kbps", self.family.type_name(), self.baud_rate.kbps())
    }
}

// =============================================================================
// TARGETS
// =============================================================================

/// ISO 14443 Type A target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeATarget {
    /// Answer to request (ATQA), two bytes.
    #[serde(with = "hex_bytes", default)]
    pub atqa: Vec<u8>,
    /// Select acknowledge (SAK).
    #[serde(default)]
    pub sak: u8,
    /// Unique identifier (4, 7 or 10 bytes).
    #[serde(with = "hex_bytes", default)]
    pub uid: Vec<u8>,
    /// Answer to select (ATS), empty for non ISO-DEP tags.
    #[serde(with = "hex_bytes", default)]
    pub ats: Vec<u8>,
}

/// ISO 14443 Type B target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeBTarget {
    /// Pseudo-unique PICC identifier.
    #[serde(with = "hex_bytes", default)]
    pub pupi: Vec<u8>,
    /// Application data from ATQB.
    #[serde(with = "hex_bytes", default)]
    pub application_data: Vec<u8>,
    /// Protocol info from ATQB.
    #[serde(with = "hex_bytes", default)]
    pub protocol_info: Vec<u8>,
}

/// FeliCa target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FelicaTarget {
    /// Manufacture ID (IDm), eight bytes.
    #[serde(with = "hex_bytes", default)]
    pub id: Vec<u8>,
    /// Manufacture parameter (PMm), eight bytes.
    #[serde(with = "hex_bytes", default)]
    pub pad: Vec<u8>,
    /// System code, two bytes.
    #[serde(with = "hex_bytes", default)]
    pub system_code: Vec<u8>,
}

/// Jewel / Topaz target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JewelTarget {
    /// SENS_RES, two bytes.
    #[serde(with = "hex_bytes", default)]
    pub sens_res: Vec<u8>,
    /// Tag identifier, four bytes.
    #[serde(with = "hex_bytes", default)]
    pub id: Vec<u8>,
}

/// HID iClass target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IClassTarget {
    /// Card serial number, eight bytes.
    #[serde(with = "hex_bytes", default)]
    pub uid: Vec<u8>,
}

/// Metadata reported for one tag, one variant per protocol family.
///
/// Produced fresh each poll cycle by a reader; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum TargetInfo {
    /// ISO 14443 Type A.
    TypeA(TypeATarget),
    /// ISO 14443 Type B.
    TypeB(TypeBTarget),
    /// FeliCa.
    Felica(FelicaTarget),
    /// Jewel / Topaz.
    Jewel(JewelTarget),
    /// HID iClass.
    #[serde(rename = "iclass")]
    IClass(IClassTarget),
}

impl TargetInfo {
    /// The family this target answered under.
    #[must_use]
    pub const fn family(&self) -> ProtocolFamily {
        match self {
            Self::TypeA(_) => ProtocolFamily::TypeA,
            Self::TypeB(_) => ProtocolFamily::TypeB,
            Self::Felica(_) => ProtocolFamily::Felica,
            Self::Jewel(_) => ProtocolFamily::Jewel,
            Self::IClass(_) => ProtocolFamily::IClass,
        }
    }

    /// Human-readable type name of the target's family.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.family().type_name()
    }

    /// Raw bytes of the family's identity field.
    #[must_use]
    pub fn identity_bytes(&self) -> &[u8] {
        match self {
            Self::TypeA(t) => &t.uid,
            Self::TypeB(t) => &t.pupi,
            Self::Felica(t) => &t.id,
            Self::Jewel(t) => &t.id,
            Self::IClass(t) => &t.uid,
        }
    }

    /// The tag's identity, or `None` when the identity field is empty.
    #[must_use]
    pub fn identity(&self) -> Option<TagIdentity> {
        TagIdentity::new(self.identity_bytes())
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// A presence transition for one tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TagEvent {
    /// The tag entered the reader's field.
    Arrived {
        /// Identity of the arriving tag.
        identity: TagIdentity,
        /// Metadata reported for it in the cycle it arrived.
        target: TargetInfo,
    },
    /// The tag left the reader's field.
    Departed {
        /// Identity of the departed tag.
        identity: TagIdentity,
    },
}

impl TagEvent {
    /// Identity the event is about.
    #[must_use]
    pub const fn identity(&self) -> &TagIdentity {
        match self {
            Self::Arrived { identity, .. } | Self::Departed { identity } => identity,
        }
    }

    /// Whether this is an arrival.
    #[must_use]
    pub const fn is_arrival(&self) -> bool {
        matches!(self, Self::Arrived { .. })
    }
}

/// A [`TagEvent`] together with where and when it was observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderEvent {
    /// Configured name of the reader.
    pub reader: String,
    /// Device session the event belongs to.
    pub session: Uuid,
    /// When the poll cycle that produced it completed.
    pub observed_at: DateTime<Utc>,
    /// The transition itself.
    #[serde(flatten)]
    pub event: TagEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip_is_uppercase() {
        assert_eq!(encode_hex(&[0x04, 0xa1, 0xff]), "04A1FF");
        assert_eq!(decode_hex("04a1ff").unwrap(), vec![0x04, 0xA1, 0xFF]);
        assert_eq!(decode_hex("04:A1 FF").unwrap(), vec![0x04, 0xA1, 0xFF]);
    }

    #[test]
    fn test_hex_fields_serialize_uppercase_and_accept_separators() {
        let target: TargetInfo =
            toml::from_str("family = \"jewel\"\nsens_res = \"0c:00\"\nid = \"1a 2b 3c 4d\"").unwrap();
        let TargetInfo::Jewel(jewel) = &target else {
            panic!("expected a Jewel target, got {target:?}");
        };
        assert_eq!(jewel.sens_res, vec![0x0C, 0x00]);
        assert_eq!(jewel.id, vec![0x1A, 0x2B, 0x3C, 0x4D]);

        let json = serde_json::to_value(&target).unwrap();
        assert_eq!(json["sens_res"], "0C00");
        assert_eq!(json["id"], "1A2B3C4D");
    }

    #[test]
    fn test_decode_hex_rejects_garbage() {
        assert_eq!(decode_hex("ABC"), Err(HexError::OddLength(3)));
        assert_eq!(decode_hex("ZZ"), Err(HexError::InvalidDigit('Z')));
        assert_eq!(decode_hex("04:G1"), Err(HexError::InvalidDigit('G')));
        assert_eq!(decode_hex("04 A"), Err(HexError::OddLength(3)));
    }

    #[test]
    fn test_identity_is_byte_exact() {
        let a = TagIdentity::from_hex("04A1").unwrap();
        let b = TagIdentity::new(vec![0x04, 0xA1]).unwrap();
        let c = TagIdentity::from_hex("0004A1").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "04A1");
    }

    #[test]
    fn test_empty_identity_is_rejected() {
        assert!(TagIdentity::new(Vec::new()).is_none());
        assert_eq!(TagIdentity::from_hex(""), Err(HexError::Empty));
    }

    #[test]
    fn test_identity_field_per_family() {
        let a = TargetInfo::TypeA(TypeATarget {
            uid: vec![1, 2, 3, 4],
            ..TypeATarget::default()
        });
        let b = TargetInfo::TypeB(TypeBTarget {
            pupi: vec![5, 6, 7, 8],
            application_data: vec![9, 9, 9, 9],
            ..TypeBTarget::default()
        });
        let f = TargetInfo::Felica(FelicaTarget {
            id: vec![1; 8],
            ..FelicaTarget::default()
        });
        let j = TargetInfo::Jewel(JewelTarget {
            sens_res: vec![0, 0x0C],
            id: vec![0xAA; 4],
        });
        let i = TargetInfo::IClass(IClassTarget { uid: vec![0xBB; 8] });

        assert_eq!(a.identity().unwrap().to_hex(), "01020304");
        assert_eq!(b.identity().unwrap().to_hex(), "05060708");
        assert_eq!(f.identity().unwrap().as_bytes(), &[1; 8]);
        assert_eq!(j.identity().unwrap().as_bytes(), &[0xAA; 4]);
        assert_eq!(i.identity().unwrap().as_bytes(), &[0xBB; 8]);
    }

    #[test]
    fn test_target_without_identity() {
        let t = TargetInfo::TypeA(TypeATarget::default());
        assert!(t.identity().is_none());
        assert_eq!(t.type_name(), "ISO14443A");
    }

    #[test]
    fn test_type_names() {
        assert_eq!(ProtocolFamily::TypeB.type_name(), "ISO14443B");
        assert_eq!(ProtocolFamily::Felica.type_name(), "FeliCa");
        assert_eq!(ProtocolFamily::IClass.type_name(), "ISO14443B iClass");
    }

    #[test]
    fn test_default_sweep_is_supported() {
        let sweep = Modulation::default_sweep();
        assert_eq!(sweep.len(), 6);
        assert!(sweep.iter().all(|m| m.is_supported()));
        assert!(!Modulation::new(ProtocolFamily::Felica, BaudRate::Kbps106).is_supported());
    }

    #[test]
    fn test_target_serde_uses_family_tag_and_hex() {
        let target = TargetInfo::TypeA(TypeATarget {
            atqa: vec![0x00, 0x44],
            sak: 0x08,
            uid: vec![0x04, 0xA1],
            ats: Vec::new(),
        });
        let json = serde_json::to_string(&target).unwrap();
        assert!(json.contains("\"family\":\"type_a\""));
        assert!(json.contains("\"uid\":\"04A1\""));

        let back: TargetInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, target);
    }

    #[test]
    fn test_modulation_serde_uses_kbps() {
        let m = Modulation::new(ProtocolFamily::Felica, BaudRate::Kbps424);
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, r#"{"family":"felica","baud_rate":424}"#);

        let bad = serde_json::from_str::<Modulation>(r#"{"family":"felica","baud_rate":300}"#);
        assert!(bad.is_err());
    }
}
