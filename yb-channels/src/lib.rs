//! Messenger adapters for yabot.
//!
//! Adapters are pure I/O: they turn platform events into [`InboundMessage`]s
//! and deliver plain-text responses back to a room.

mod matrix;
mod traits;
mod types;

pub use matrix::MatrixMessenger;
pub use traits::Messenger;
pub use types::{EventId, InboundKind, InboundMessage, RoomId, SenderId};
