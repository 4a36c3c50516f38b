//! R-APS PDU encoding and validation.

use crate::types::RapsRequest;
use erps_types::{MacAddress, RingPort};

pub const CFM_ETHERTYPE: u16 = 0x8902;
pub const RAPS_OPCODE: u8 = 40;
pub const FIRST_TLV_OFFSET: u8 = 32;

/// Minimum Ethernet frame length without FCS.
pub const MIN_FRAME_LEN: usize = 60;

/// Fixed part of the PDU after the EtherType, End TLV included.
const PDU_LEN: usize = 37;

/// Offset of the request/flags bytes in a tagged Tx frame.
pub(crate) const TX_INFO_OFFSET: usize = 22;

const RAPS_DMAC_PREFIX: [u8; 5] = [0x01, 0x19, 0xa7, 0x00, 0x00];

/// Multicast destination of R-APS PDUs for `ring_id`.
pub fn raps_dmac(ring_id: u8) -> MacAddress {
    let p = RAPS_DMAC_PREFIX;
    MacAddress::new([p[0], p[1], p[2], p[3], p[4], ring_id])
}

/// Why a received frame was dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RapsRxError {
    #[error("frame too short: {0} bytes")]
    TooShort(usize),
    #[error("ring ID {0} does not match")]
    RingIdMismatch(u8),
    #[error("not a CFM frame")]
    WrongEtherType,
    #[error("MEG level {0} does not match")]
    LevelMismatch(u8),
    #[error("unexpected opcode {0}")]
    WrongOpcode(u8),
    #[error("first TLV offset {0} is not 32")]
    BadTlvOffset(u8),
    #[error("unknown request/state code {0:#x}")]
    UnknownRequest(u8),
    #[error("EVENT with non-zero sub-code or status")]
    BadEventCode,
    #[error("TLV runs past the end of the frame")]
    TruncatedTlv,
    #[error("no End TLV")]
    MissingEndTlv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VlanTag {
    pub tpid: u16,
    pub pcp: u8,
    pub vid: u16,
}

/// Decoded view of an R-APS PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RapsFrame {
    pub ring_id: u8,
    pub smac: MacAddress,
    pub tag: Option<VlanTag>,
    pub level: u8,
    pub version: u8,
    pub request: RapsRequest,
    pub rb: bool,
    pub dnf: bool,
    pub bpr: RingPort,
    pub node_id: MacAddress,
}

impl RapsFrame {
    /// The two bytes after the first TLV offset: request/sub-code and
    /// RB/DNF/BPR.
    pub fn info_bytes(request: RapsRequest, rb: bool, dnf: bool, bpr: RingPort) -> [u8; 2] {
        let mut flags = 0u8;
        if rb {
            flags |= 0x80;
        }
        if dnf {
            flags |= 0x40;
        }
        if bpr == RingPort::Port1 {
            flags |= 0x20;
        }
        [request.code() << 4, flags]
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(MIN_FRAME_LEN);
        frame.extend_from_slice(raps_dmac(self.ring_id).as_bytes());
        frame.extend_from_slice(self.smac.as_bytes());
        if let Some(tag) = self.tag {
            frame.extend_from_slice(&tag.tpid.to_be_bytes());
            let tci = (u16::from(tag.pcp & 0x7) << 13) | (tag.vid & 0x0fff);
            frame.extend_from_slice(&tci.to_be_bytes());
        }
        frame.extend_from_slice(&CFM_ETHERTYPE.to_be_bytes());
        frame.push((self.level << 5) | (self.version & 0x1f));
        frame.push(RAPS_OPCODE);
        frame.push(0);
        frame.push(FIRST_TLV_OFFSET);
        frame.extend_from_slice(&Self::info_bytes(self.request, self.rb, self.dnf, self.bpr));
        frame.extend_from_slice(self.node_id.as_bytes());
        frame.extend_from_slice(&[0u8; 24]);
        // End TLV
        frame.push(0);
        if frame.len() < MIN_FRAME_LEN {
            frame.resize(MIN_FRAME_LEN, 0);
        }
        frame
    }

    /// Ring ID of an R-APS PDU, judged by the DMAC prefix, the CFM EtherType
    /// (untagged or behind one tag) and the opcode. Other CFM PDUs such as
    /// CCM or LTM give `None`.
    pub fn classify(frame: &[u8]) -> Option<u8> {
        if frame.get(..5)? != &RAPS_DMAC_PREFIX[..] {
            return None;
        }
        let start = cfm_start(frame)?;
        (*frame.get(start + 1)? == RAPS_OPCODE).then_some(frame[5])
    }

    /// Parses `frame` and checks it against the ring's ID and MEG level.
    ///
    /// The EtherType may sit right after the SMAC or after one VLAN tag. The
    /// version field is reported but not checked.
    pub fn validate(frame: &[u8], ring_id: u8, level: u8) -> Result<Self, RapsRxError> {
        let start = match cfm_start(frame) {
            Some(start) => start,
            None if frame.len() < 14 + PDU_LEN => return Err(RapsRxError::TooShort(frame.len())),
            None => return Err(RapsRxError::WrongEtherType),
        };
        let tag = (start == 18).then(|| {
            let tci = u16::from_be_bytes([frame[14], frame[15]]);
            VlanTag {
                tpid: u16::from_be_bytes([frame[12], frame[13]]),
                pcp: (tci >> 13) as u8,
                vid: tci & 0x0fff,
            }
        });

        if frame.len() < start + PDU_LEN {
            return Err(RapsRxError::TooShort(frame.len()));
        }
        if frame[5] != ring_id {
            return Err(RapsRxError::RingIdMismatch(frame[5]));
        }

        let rx_level = frame[start] >> 5;
        let version = frame[start] & 0x1f;
        if rx_level != level {
            return Err(RapsRxError::LevelMismatch(rx_level));
        }
        if frame[start + 1] != RAPS_OPCODE {
            return Err(RapsRxError::WrongOpcode(frame[start + 1]));
        }
        // Flags at start + 2 are ignored.
        let first_tlv_offset = frame[start + 3];
        if first_tlv_offset != FIRST_TLV_OFFSET {
            return Err(RapsRxError::BadTlvOffset(first_tlv_offset));
        }

        let code = frame[start + 4] >> 4;
        let request = RapsRequest::from_code(code).ok_or(RapsRxError::UnknownRequest(code))?;
        let flags = frame[start + 5];
        if request == RapsRequest::Event && (frame[start + 4] & 0x0f != 0 || flags != 0) {
            return Err(RapsRxError::BadEventCode);
        }

        let smac = MacAddress::from_slice(&frame[6..12]).ok_or(RapsRxError::TooShort(frame.len()))?;
        let node_id =
            MacAddress::from_slice(&frame[start + 6..start + 12]).ok_or(RapsRxError::TooShort(frame.len()))?;

        walk_tlvs(frame, start + 4 + usize::from(first_tlv_offset))?;

        Ok(Self {
            ring_id,
            smac,
            tag,
            level: rx_level,
            version,
            request,
            rb: flags & 0x80 != 0,
            dnf: flags & 0x40 != 0,
            bpr: if flags & 0x20 != 0 { RingPort::Port1 } else { RingPort::Port0 },
            node_id,
        })
    }
}

/// Offset of the CFM header, if the frame is CFM.
fn cfm_start(frame: &[u8]) -> Option<usize> {
    if ethertype_at(frame, 12) == Some(CFM_ETHERTYPE) {
        Some(14)
    } else if ethertype_at(frame, 16) == Some(CFM_ETHERTYPE) {
        Some(18)
    } else {
        None
    }
}

fn ethertype_at(frame: &[u8], offset: usize) -> Option<u16> {
    frame
        .get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
}

/// Skips TLVs from `offset` until an End TLV.
fn walk_tlvs(frame: &[u8], mut offset: usize) -> Result<(), RapsRxError> {
    while offset < frame.len() {
        let tlv_type = frame[offset];
        offset += 1;
        if tlv_type == 0 {
            return Ok(());
        }
        let len = frame
            .get(offset..offset + 2)
            .map(|b| usize::from(u16::from_be_bytes([b[0], b[1]])))
            .ok_or(RapsRxError::TruncatedTlv)?;
        offset += 2 + len;
        if offset > frame.len() {
            return Err(RapsRxError::TruncatedTlv);
        }
    }
    Err(RapsRxError::MissingEndTlv)
}
