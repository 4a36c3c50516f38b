//! VLAN ID type with validation, and a VLAN membership set.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// IEEE 802.1Q VLAN ID in 1..=4094. Used for control and protected VLANs.
///
/// ```
/// use erps_types::VlanId;
///
/// let vlan: VlanId = "100".parse().unwrap();
/// assert_eq!(vlan.as_u16(), 100);
/// assert!(VlanId::new(4095).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct VlanId(u16);

impl VlanId {
    pub const VALID: RangeInclusive<u16> = 1..=4094;

    pub const fn new(id: u16) -> Result<Self, ParseError> {
        match id {
            1..=4094 => Ok(VlanId(id)),
            _ => Err(ParseError::InvalidVlanId(id)),
        }
    }

    pub const fn as_u16(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for VlanId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u16>()
            .map_err(|_| ParseError::InvalidVlanList(s.to_string()))
            .and_then(VlanId::new)
    }
}

impl TryFrom<u16> for VlanId {
    type Error = ParseError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl From<VlanId> for u16 {
    fn from(vid: VlanId) -> Self {
        vid.as_u16()
    }
}

const VLAN_WORDS: usize = 4096 / 64;

/// A set of VLANs, stored as a 4096-bit mask.
///
/// Serializes as a sorted list of VLAN IDs. Displays and parses in the
/// compact range form used on switch CLIs, e.g. `"10-20,30"`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u16>", into = "Vec<u16>")]
pub struct VlanSet([u64; VLAN_WORDS]);

impl Default for VlanSet {
    fn default() -> Self {
        VlanSet([0; VLAN_WORDS])
    }
}

impl VlanSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, vid: VlanId) -> bool {
        let (w, b) = Self::slot(vid.as_u16());
        let was_set = self.0[w] & b != 0;
        self.0[w] |= b;
        !was_set
    }

    pub fn remove(&mut self, vid: VlanId) -> bool {
        let (w, b) = Self::slot(vid.as_u16());
        let was_set = self.0[w] & b != 0;
        self.0[w] &= !b;
        was_set
    }

    /// Returns true if `vid` is a member. Out-of-range IDs are never members.
    pub fn contains(&self, vid: u16) -> bool {
        if VlanId::new(vid).is_err() {
            return false;
        }

        let (w, b) = Self::slot(vid);
        self.0[w] & b != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|w| *w == 0)
    }

    pub fn len(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns true if the two sets have at least one VLAN in common.
    pub fn intersects(&self, other: &VlanSet) -> bool {
        self.0.iter().zip(other.0.iter()).any(|(a, b)| a & b != 0)
    }

    /// Iterates over members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = VlanId> + '_ {
        VlanId::VALID
            .filter(move |vid| self.contains(*vid))
            .map(VlanId)
    }

    const fn slot(vid: u16) -> (usize, u64) {
        ((vid / 64) as usize, 1u64 << (vid % 64))
    }
}

impl FromIterator<VlanId> for VlanSet {
    fn from_iter<I: IntoIterator<Item = VlanId>>(iter: I) -> Self {
        let mut set = VlanSet::new();
        for vid in iter {
            set.insert(vid);
        }
        set
    }
}

impl fmt::Debug for VlanSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VlanSet({})", self)
    }
}

impl fmt::Display for VlanSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut iter = self.iter().map(|v| v.as_u16()).peekable();

        while let Some(start) = iter.next() {
            let mut end = start;
            while iter.peek() == Some(&(end + 1)) {
                end += 1;
                iter.next();
            }

            if !first {
                write!(f, ",")?;
            }
            first = false;

            if start == end {
                write!(f, "{}", start)?;
            } else {
                write!(f, "{}-{}", start, end)?;
            }
        }

        Ok(())
    }
}

impl FromStr for VlanSet {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = VlanSet::new();
        let invalid = || ParseError::InvalidVlanList(s.to_string());

        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (lo, hi) = match part.split_once('-') {
                Some((lo, hi)) => (lo.trim(), hi.trim()),
                None => (part, part),
            };

            let lo = VlanId::new(lo.parse().map_err(|_| invalid())?)?;
            let hi = VlanId::new(hi.parse().map_err(|_| invalid())?)?;
            if lo > hi {
                return Err(invalid());
            }

            for vid in lo.as_u16()..=hi.as_u16() {
                set.insert(VlanId(vid));
            }
        }

        Ok(set)
    }
}

impl TryFrom<Vec<u16>> for VlanSet {
    type Error = ParseError;

    fn try_from(vids: Vec<u16>) -> Result<Self, Self::Error> {
        vids.into_iter().map(VlanId::new).collect()
    }
}

impl From<VlanSet> for Vec<u16> {
    fn from(set: VlanSet) -> Vec<u16> {
        set.iter().map(|v| v.as_u16()).collect()
    }
}
