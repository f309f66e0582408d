//! surfacelink-protocol: Wire definitions for bridge clients and the server
//!
//! Every message is a single JSON object carried in a length-prefixed frame.
//! Clients send [`Request`]s and receive exactly one [`Response`] per request.

pub mod codec;
pub mod messages;
pub mod types;

// Re-export main types at crate root
pub use codec::{
    ClientCodec, CodecError, Decoded, ServerCodec, DEFAULT_MAX_MESSAGE_SIZE, MAX_FRAME_SIZE,
};
pub use messages::{Params, Request, Response};
pub use types::{name_matches, CatalogItem, CatalogNode};

/// Default TCP port the bridge listens on
pub const DEFAULT_PORT: u16 = 9877;
