//! Ethernet MAC addresses and R-APS node IDs.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 48-bit Ethernet MAC address.
///
/// Addresses order byte-wise, which is the order G.8032 uses when comparing
/// node IDs.
///
/// # Examples
///
/// ```
/// use erps_types::MacAddress;
///
/// let mac: MacAddress = "00:11:22:33:44:55".parse().unwrap();
/// assert_eq!(mac.to_string(), "00:11:22:33:44:55");
///
/// let higher: MacAddress = "00-11-22-33-44-56".parse().unwrap();
/// assert!(mac < higher);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const ZERO: MacAddress = MacAddress([0; 6]);
    pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Reads an address from the start of a frame buffer. Returns `None` if
    /// fewer than six bytes are available.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; 6] = bytes.get(..6)?.try_into().ok()?;
        Some(MacAddress(raw))
    }

    /// Group bit set. Covers broadcast as well.
    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub const fn is_unicast(&self) -> bool {
        !self.is_multicast()
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddress {
    type Err = ParseError;

    /// Accepts `aa:bb:cc:dd:ee:ff` and `aa-bb-cc-dd-ee-ff`. Mixed separators
    /// are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidMacAddress(s.to_string());
        let sep = if s.contains(':') { ':' } else { '-' };

        let mut bytes = [0u8; 6];
        let mut octets = s.split(sep);
        for byte in bytes.iter_mut() {
            let octet = octets.next().ok_or_else(invalid)?;
            if octet.is_empty() || octet.len() > 2 {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(octet, 16).map_err(|_| invalid())?;
        }
        if octets.next().is_some() {
            return Err(invalid());
        }
        Ok(MacAddress(bytes))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> String {
        mac.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_both_separators() {
        let colon: MacAddress = "00:01:c1:0a:0b:ff".parse().unwrap();
        let hyphen: MacAddress = "00-01-C1-0A-0B-FF".parse().unwrap();
        assert_eq!(colon, hyphen);
        assert_eq!(colon.as_bytes(), &[0x00, 0x01, 0xc1, 0x0a, 0x0b, 0xff]);
        assert_eq!(hyphen.to_string(), "00:01:c1:0a:0b:ff");
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["", "invalid", "00:11:22:33:44", "00:11:22:33:44:55:66", "gg:11:22:33:44:55", "00:11-22:33:44:55", "000:1:22:33:44:55"] {
            assert!(bad.parse::<MacAddress>().is_err(), "{bad}");
        }
    }

    #[test]
    fn test_address_classes() {
        let raps_dmac = MacAddress::new([0x01, 0x19, 0xa7, 0x00, 0x00, 0x01]);
        assert!(raps_dmac.is_multicast());
        assert!(MacAddress::BROADCAST.is_multicast());
        assert!(MacAddress::new([0x00, 0x01, 0xc1, 0, 0, 1]).is_unicast());
        assert!(MacAddress::default().is_zero());
        assert!(!MacAddress::new([0, 0, 0, 0, 0, 1]).is_zero());
    }

    #[test]
    fn test_node_id_ordering() {
        let low = MacAddress::new([0x00, 0x01, 0x00, 0x00, 0x00, 0xff]);
        let high = MacAddress::new([0x00, 0x02, 0x00, 0x00, 0x00, 0x00]);
        assert!(low < high);
    }

    #[test]
    fn test_from_frame_slice() {
        let frame = [0x01, 0x19, 0xa7, 0x00, 0x00, 0x05, 0xaa];
        assert_eq!(
            MacAddress::from_slice(&frame),
            Some(MacAddress::new([0x01, 0x19, 0xa7, 0x00, 0x00, 0x05]))
        );
        assert_eq!(MacAddress::from_slice(&frame[..5]), None);
    }

    #[test]
    fn test_serde_as_string() {
        let mac = MacAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(serde_json::to_string(&mac).unwrap(), "\"00:11:22:33:44:55\"");
        let back: MacAddress = serde_json::from_str("\"00-11-22-33-44-55\"").unwrap();
        assert_eq!(back, mac);
        assert!(serde_json::from_str::<MacAddress>("\"nope\"").is_err());
    }
}
