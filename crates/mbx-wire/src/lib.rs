//! Wire records for the MBX broker.
//!
//! Registration requests travel from front-end processes to the broker's
//! session dispatcher; reply records travel back. Both are serialized with
//! bincode behind a `[4-byte length][1-byte opcode][payload]` frame, with
//! every string field bounded by a fixed limit checked in both directions.
//!
//! Opcodes: 1 register publisher, 2 register subscriber, 3 create box,
//! 5 remove box, 7 list boxes; replies use 4 (create), 6 (remove), and
//! 8 (list).

pub mod codec;
pub mod error;
pub mod message;

pub use codec::Codec;
pub use error::{WireError, WireResult};
pub use message::{
    BoxSummary, Reply, Request, MAX_BOX_NAME, MAX_ENDPOINT_NAME, MAX_FRAME, MAX_REPLY_MESSAGE,
};
