//! Cursor helpers for parsing DNS messages.
//!
//! The domain names this crate handles always arrive already
//! IDNA-encoded on the wire (the client did the punycode conversion, if
//! any), so `read_qname` stops at plain ASCII labels and never attempts
//! a puny decode.

use crate::bail;
use crate::wire::types::{Class, Type};
use byteorder::{ReadBytesExt, BE};
use std::convert::TryInto;
use std::io;
use std::io::Cursor;
use std::io::SeekFrom;

pub fn clamp<T: PartialOrd>(v: T, min: T, max: T) -> T {
    assert!(min < max);

    if v < min {
        min
    } else if v > max {
        max
    } else {
        v
    }
}

pub trait SeekExt: io::Seek {
    /// Returns the number of bytes remaining to be consumed. Used to
    /// detect trailing garbage after a message has been fully parsed.
    fn remaining(&mut self) -> io::Result<u64> {
        let pos = self.stream_position()?;
        let len = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(pos))?;
        Ok(len - pos)
    }
}

impl<'a> SeekExt for Cursor<&'a [u8]> {
    fn remaining(self: &mut std::io::Cursor<&'a [u8]>) -> io::Result<u64> {
        let pos = self.position() as usize;
        let len = self.get_ref().len();
        Ok((len - pos).try_into().unwrap())
    }
}

pub trait CursorExt<T> {
    /// A cursor bounded to `[start, end)` of the original buffer.
    fn sub_cursor(&mut self, start: usize, end: usize) -> io::Result<std::io::Cursor<T>>;
}

impl<'a> CursorExt<&'a [u8]> for Cursor<&'a [u8]> {
    fn sub_cursor(&mut self, start: usize, end: usize) -> io::Result<std::io::Cursor<&'a [u8]>> {
        let buf = self.get_ref();
        let start = clamp(start, 0, buf.len());
        let end = clamp(end, start, buf.len());
        Ok(Cursor::new(&buf[start..end]))
    }
}

/// Maximum number of compression pointer hops `read_qname` follows
/// before giving up. Each hop must point strictly backwards, so the
/// chain can't loop, but a crafted message can still chain thousands
/// of decreasing pointers; bounding the hop count bounds the recursion
/// depth independently of message length.
const MAX_POINTER_HOPS: u8 = 10;

impl<R: io::Read + ?Sized + io::Seek> DNSReadExt for R {}

/// Extensions to `io::Read` for parsing DNS wire primitives.
pub trait DNSReadExt: io::Read + io::Seek {
    /// Reads a domain name, following compression pointers (RFC 1035
    /// §4.1.4). Pointers must point strictly backwards of where this name
    /// started, which rules out pointer loops, and hops are capped at
    /// `MAX_POINTER_HOPS`.
    fn read_qname(&mut self) -> io::Result<String> {
        self.read_qname_at_depth(0)
    }

    #[doc(hidden)]
    fn read_qname_at_depth(&mut self, depth: u8) -> io::Result<String> {
        if depth > MAX_POINTER_HOPS {
            bail!(InvalidData, "too many compression pointer hops (max {})", MAX_POINTER_HOPS);
        }

        let mut qname = String::new();
        let start = self.stream_position()?;

        loop {
            let len = self.read_u8()?;
            if len == 0 {
                if qname.is_empty() {
                    qname.push('.');
                }
                break;
            }

            match len & 0xC0 {
                0x00 => {
                    let mut label = vec![0; len.into()];
                    self.read_exact(&mut label)?;

                    if !label.is_ascii() {
                        bail!(InvalidData, "invalid label: not valid ascii");
                    }

                    let label = std::str::from_utf8(&label)
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

                    qname.push_str(label);
                    qname.push('.');
                }

                0xC0 => {
                    let b2 = self.read_u8()? as u16;
                    let ptr = (((len as u16) & !0xC0) << 8 | b2) as u64;

                    if ptr >= start {
                        bail!(
                            InvalidData,
                            "invalid compressed pointer pointing to future bytes"
                        );
                    }

                    let current = self.stream_position()?;
                    self.seek(SeekFrom::Start(ptr))?;
                    qname.push_str(&self.read_qname_at_depth(depth + 1)?);
                    self.seek(SeekFrom::Start(current))?;

                    break;
                }

                _ => bail!(InvalidData, "unsupported label length prefix {:#x}", len),
            }
        }

        Ok(qname)
    }

    /// Reads a DNS Type. Values this crate doesn't name come back as
    /// `Type::Other` rather than an error: a forwarder must relay record
    /// types it has never heard of.
    fn read_type(&mut self) -> io::Result<Type> {
        Ok(Type::from_u16(self.read_u16::<BE>()?))
    }

    /// Reads a DNS Class. See `read_type` for why unknown values aren't
    /// an error.
    fn read_class(&mut self) -> io::Result<Class> {
        Ok(Class::from_u16(self.read_u16::<BE>()?))
    }
}

/// Writes a domain name in wire label format. The encoder never emits
/// compression pointers; every written message re-spells names in full.
pub fn write_qname(buf: &mut Vec<u8>, domain: &str) -> io::Result<()> {
    if !domain.is_empty() && domain != "." {
        for label in domain.split_terminator('.') {
            if label.is_empty() {
                bail!(InvalidData, "empty label in domain name '{}'", domain);
            }
            if label.len() > 63 {
                bail!(InvalidData, "label '{}' longer than 63 characters", label);
            }
            if !label.is_ascii() {
                bail!(InvalidData, "label '{}' is not ascii", label);
            }

            buf.push(label.len() as u8);
            buf.extend_from_slice(label.as_bytes());
        }
    }

    buf.push(0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a buffer holding a chain of `hops` compression pointers,
    /// each pointing at the segment before it, terminating in a root
    /// label. Reading the name starting at the end of the buffer follows
    /// exactly `hops` pointers before reaching the terminator.
    fn pointer_chain(hops: usize) -> Vec<u8> {
        let mut buf = vec![0u8]; // segment 0: root label
        let mut offsets = vec![0u16];

        for _ in 0..hops {
            let offset = buf.len() as u16;
            let target = *offsets.last().unwrap();
            buf.push(0xC0 | ((target >> 8) as u8));
            buf.push((target & 0xFF) as u8);
            offsets.push(offset);
        }

        buf
    }

    #[test]
    fn a_chain_of_exactly_the_hop_limit_succeeds() {
        let buf = pointer_chain(MAX_POINTER_HOPS as usize);
        let mut cur = Cursor::new(buf.as_slice());
        cur.seek(SeekFrom::End(-2)).unwrap();
        assert_eq!(cur.read_qname().unwrap(), ".");
    }

    #[test]
    fn a_chain_one_hop_past_the_limit_is_rejected() {
        let buf = pointer_chain(MAX_POINTER_HOPS as usize + 1);
        let mut cur = Cursor::new(buf.as_slice());
        cur.seek(SeekFrom::End(-2)).unwrap();
        assert!(cur.read_qname().is_err());
    }
}
