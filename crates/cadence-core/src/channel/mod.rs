//! Addressable message channel between two processes.
//!
//! `endpoint` covers establishment (bind, accept, connect over localhost
//! TCP), `protocol` the tagged wire format carried on an established
//! connection.

pub mod endpoint;
pub mod protocol;

pub use endpoint::{ChannelListener, DataChannel};
pub use protocol::Message;
