//! DNS wire format: message model, cursor helpers, and the encode/decode
//! pair that every transport and listener shares.

mod codec;
mod io;
mod types;

pub use self::io::{clamp, write_qname, CursorExt, DNSReadExt, SeekExt};
pub use self::types::*;
