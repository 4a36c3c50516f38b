//! Ring port and switch port identifiers.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the two ring ports of an ERPS instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RingPort {
    #[default]
    Port0,
    Port1,
}

impl RingPort {
    /// Both ring ports, port0 first.
    pub const ALL: [RingPort; 2] = [RingPort::Port0, RingPort::Port1];

    /// Returns the other ring port.
    pub const fn opposite(&self) -> RingPort {
        match self {
            RingPort::Port0 => RingPort::Port1,
            RingPort::Port1 => RingPort::Port0,
        }
    }

    /// Index into per-ring-port arrays.
    pub const fn index(&self) -> usize {
        match self {
            RingPort::Port0 => 0,
            RingPort::Port1 => 1,
        }
    }
}

impl fmt::Display for RingPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RingPort::Port0 => "port0",
            RingPort::Port1 => "port1",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for RingPort {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "port0" | "0" => Ok(RingPort::Port0),
            "port1" | "1" => Ok(RingPort::Port1),
            _ => Err(ParseError::InvalidRingPort(s.to_string())),
        }
    }
}

/// A switch port number, indexing the switch-wide port table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortNo(u32);

impl PortNo {
    pub const fn new(port_no: u32) -> Self {
        PortNo(port_no)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    pub const fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PortNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PortNo {
    fn from(port_no: u32) -> Self {
        PortNo(port_no)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_opposite() {
        assert_eq!(RingPort::Port0.opposite(), RingPort::Port1);
        assert_eq!(RingPort::Port1.opposite(), RingPort::Port0);
    }

    #[test]
    fn test_index_matches_all() {
        for (i, rp) in RingPort::ALL.iter().enumerate() {
            assert_eq!(rp.index(), i);
        }
    }

    #[test]
    fn test_ring_port_parse_and_display() {
        assert_eq!("port1".parse::<RingPort>().unwrap(), RingPort::Port1);
        assert_eq!("PORT0".parse::<RingPort>().unwrap(), RingPort::Port0);
        assert_eq!(RingPort::Port1.to_string(), "port1");
        assert!("port2".parse::<RingPort>().is_err());
    }

    #[test]
    fn test_ring_port_serde() {
        let json = serde_json::to_string(&RingPort::Port1).unwrap();
        assert_eq!(json, "\"port1\"");
    }

    #[test]
    fn test_port_no() {
        let p = PortNo::new(7);
        assert_eq!(p.as_usize(), 7);
        assert_eq!(p.to_string(), "7");
        assert_eq!(serde_json::to_string(&p).unwrap(), "7");
    }
}
