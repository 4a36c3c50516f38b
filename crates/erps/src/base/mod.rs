//! Base Engine.
//!
//! Runs the G.8032 protocol for one instance: request resolution and the
//! state transition table ([`fsm`]), SF hold-off, R-APS reception and flush
//! logic ([`engine`]), and the hardware side of blocking and activation
//! ([`hw`]). All state lives in [`crate::instance::ErpsState`]; everything
//! else is reached through an [`crate::instance::EngineCtx`].

mod engine;
mod fsm;
mod hw;
mod types;

pub use engine::HISTORY_MAX;
pub use types::{FlushReason, HistoryEntry, NodeIdBpr, Request};
