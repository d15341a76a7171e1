//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.
//! They are immutable and can be freely shared.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Largest value representable in the 24-bit VXLAN identifier space.
pub const MAX_VNI: u32 = 0x00FF_FFFF;

/// VXLAN Network Identifier.
///
/// A 24-bit value identifying one overlay segment. At most one active
/// network may hold a given VNI at any time.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Vni(u32);

impl Vni {
    /// Create a VNI, rejecting values outside the 24-bit range.
    pub fn new(value: u32) -> Result<Self, InvalidVni> {
        if value > MAX_VNI {
            return Err(InvalidVni(value));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for Vni {
    type Error = InvalidVni;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl<'de> Deserialize<'de> for Vni {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u32::deserialize(deserializer)?;
        Vni::new(raw).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Vni {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A VNI outside the 24-bit range.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("vni {0} exceeds the 24-bit range")]
pub struct InvalidVni(pub u32);

/// 48-bit hardware address of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for MacAddress {
    type Err = InvalidMacAddress;

    /// Accepts `aa:bb:cc:dd:ee:ff` and the dash-separated form backends report.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(|c| c == ':' || c == '-').collect();
        if parts.len() != 6 {
            return Err(InvalidMacAddress(s.to_string()));
        }

        let mut octets = [0u8; 6];
        for (slot, part) in octets.iter_mut().zip(parts) {
            if part.len() != 2 {
                return Err(InvalidMacAddress(s.to_string()));
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| InvalidMacAddress(s.to_string()))?;
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid mac address {0:?}")]
pub struct InvalidMacAddress(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vni_accepts_24_bit_values() {
        assert_eq!(Vni::new(0).unwrap().value(), 0);
        assert_eq!(Vni::new(4096).unwrap().value(), 4096);
        assert_eq!(Vni::new(MAX_VNI).unwrap().value(), MAX_VNI);
    }

    #[test]
    fn test_vni_rejects_overflow() {
        assert_eq!(Vni::new(MAX_VNI + 1), Err(InvalidVni(MAX_VNI + 1)));
        assert!(Vni::try_from(u32::MAX).is_err());
    }

    #[test]
    fn test_vni_deserialize_validates_range() {
        let ok: Vni = serde_json::from_str("100").unwrap();
        assert_eq!(ok.value(), 100);

        let err = serde_json::from_str::<Vni>("16777216");
        assert!(err.is_err());
    }

    #[test]
    fn test_vni_display() {
        assert_eq!(Vni::new(42).unwrap().to_string(), "42");
    }

    #[test]
    fn test_mac_parse_colon_and_dash() {
        let a: MacAddress = "02:42:ac:11:00:02".parse().unwrap();
        let b: MacAddress = "02-42-AC-11-00-02".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.octets(), [0x02, 0x42, 0xac, 0x11, 0x00, 0x02]);
        assert_eq!(b.to_string(), "02:42:ac:11:00:02");
    }

    #[test]
    fn test_mac_parse_rejects_garbage() {
        assert!("".parse::<MacAddress>().is_err());
        assert!("02:42:ac:11:00".parse::<MacAddress>().is_err());
        assert!("02:42:ac:11:00:zz".parse::<MacAddress>().is_err());
        assert!("002:42:ac:11:00:02".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_mac_serde_as_string() {
        let mac = MacAddress::new([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]);
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"de:ad:be:ef:00:01\"");
        let back: MacAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mac);
    }
}
