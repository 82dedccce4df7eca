//! Source addresses and the stream keys derived from them.

mod address;

pub use address::{AddressError, SourceAddress, StreamKey};
