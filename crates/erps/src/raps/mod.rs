//! R-APS Codec/Transport.
//!
//! [`RapsFrame`] encodes and validates the PDU. The transmit side keeps one
//! encoded PDU per switch port a ring port is bound to, and only the two
//! request/flags bytes are patched when the protocol changes what it sends.

mod pdu;
mod tx;

pub use pdu::{raps_dmac, RapsFrame, RapsRxError, VlanTag, CFM_ETHERTYPE, MIN_FRAME_LEN, RAPS_OPCODE};
pub use tx::TX_PERIOD_MS;

/// R-APS PDUs must be seen within 3.5 Tx periods.
pub const RX_TIMEOUT_MS: u64 = 17_500;
