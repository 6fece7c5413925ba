//! Wire encoding and decoding of [`Message`].
//!
//! A forwarder has to re-encode full upstream responses, not just
//! build outgoing queries, so every record section round-trips.

use crate::bail;
use crate::wire::io::{write_qname, CursorExt, DNSReadExt, SeekExt};
use crate::wire::types::*;
use byteorder::{ReadBytesExt, BE};
use std::io;
use std::io::BufRead;
use std::io::Cursor;
use std::time::Duration;

#[derive(Copy, Clone, PartialEq)]
enum RecordSection {
    Answers,
    Authorities,
    Additionals,
}

pub(crate) struct MessageParser<'a> {
    cur: Cursor<&'a [u8]>,
    m: Message,
}

impl<'a> MessageParser<'a> {
    fn new(buf: &'a [u8]) -> MessageParser<'a> {
        MessageParser {
            cur: Cursor::new(buf),
            m: Message::default(),
        }
    }

    fn parse(mut self) -> io::Result<Message> {
        self.m.id = self.cur.read_u16::<BE>()?;

        let b = self.cur.read_u8()?;
        self.m.qr = QR::from_bool(0b1000_0000 & b != 0);
        let opcode = (0b0111_1000 & b) >> 3;
        self.m.aa = (0b0000_0100 & b) != 0;
        self.m.tc = (0b0000_0010 & b) != 0;
        self.m.rd = (0b0000_0001 & b) != 0;
        self.m.opcode = Opcode::from_u8(opcode);

        let b = self.cur.read_u8()?;
        self.m.ra = (0b1000_0000 & b) != 0;
        self.m.z = (0b0100_0000 & b) != 0;
        self.m.ad = (0b0010_0000 & b) != 0;
        self.m.cd = (0b0001_0000 & b) != 0;
        self.m.rcode = Rcode::from_u8(0b0000_1111 & b);

        let qd_count = self.cur.read_u16::<BE>()?;
        let an_count = self.cur.read_u16::<BE>()?;
        let ns_count = self.cur.read_u16::<BE>()?;
        let ar_count = self.cur.read_u16::<BE>()?;

        self.read_questions(qd_count)?;
        self.read_records(an_count, RecordSection::Answers)?;
        self.read_records(ns_count, RecordSection::Authorities)?;
        self.read_records(ar_count, RecordSection::Additionals)?;

        if self.cur.remaining()? > 0 {
            bail!(
                Other,
                "finished parsing with {} bytes left over",
                self.cur.remaining()?
            );
        }

        Ok(self.m)
    }

    fn read_questions(&mut self, count: u16) -> io::Result<()> {
        self.m.questions.reserve_exact(count.into());

        for _ in 0..count {
            let name = self.cur.read_qname()?;
            let r#type = self.cur.read_type()?;
            let class = self.cur.read_class()?;

            self.m.questions.push(Question {
                name,
                r#type,
                class,
            });
        }

        Ok(())
    }

    fn read_records(&mut self, count: u16, section: RecordSection) -> io::Result<()> {
        for _ in 0..count {
            let name = self.cur.read_qname()?;
            let r#type = self.cur.read_type()?;

            if section == RecordSection::Additionals && r#type == Type::OPT {
                if self.m.extension.is_some() {
                    bail!(InvalidData, "multiple EDNS(0) extensions, expected one");
                }
                self.m.extension = Some(Extension::parse(&mut self.cur, &name)?);
                continue;
            }

            let class = self.cur.read_class()?;
            let ttl = self.cur.read_u32::<BE>()?;
            let rdlength = self.cur.read_u16::<BE>()?;
            let rdata = read_rdata(&mut self.cur, r#type, rdlength)?;

            let record = Record {
                name,
                r#type,
                class,
                ttl: Duration::from_secs(ttl.into()),
                rdata,
            };

            match section {
                RecordSection::Answers => self.m.answers.push(record),
                RecordSection::Authorities => self.m.authoritys.push(record),
                RecordSection::Additionals => self.m.additionals.push(record),
            }
        }

        Ok(())
    }
}

/// Reads `rdlength` bytes of RDATA. Record types known to embed a domain
/// name are decompressed into a canonical, pointer-free encoding: the raw
/// bytes may contain a compression pointer relative to the *original*
/// message, and once this record is copied into a differently-laid-out
/// response those offsets would no longer be valid. Everything else is
/// opaque and copied verbatim.
fn read_rdata(cur: &mut Cursor<&[u8]>, r#type: Type, rdlength: u16) -> io::Result<Vec<u8>> {
    let start = cur.position();

    let rdata = match r#type {
        Type::CNAME | Type::NS | Type::PTR => {
            let name = cur.read_qname()?;
            let mut buf = Vec::new();
            write_qname(&mut buf, &name)?;
            buf
        }

        Type::MX => {
            let preference = cur.read_u16::<BE>()?;
            let name = cur.read_qname()?;
            let mut buf = Vec::new();
            buf.extend_from_slice(&preference.to_be_bytes());
            write_qname(&mut buf, &name)?;
            buf
        }

        Type::SOA => {
            let mname = cur.read_qname()?;
            let rname = cur.read_qname()?;
            let serial = cur.read_u32::<BE>()?;
            let refresh = cur.read_u32::<BE>()?;
            let retry = cur.read_u32::<BE>()?;
            let expire = cur.read_u32::<BE>()?;
            let minimum = cur.read_u32::<BE>()?;

            let mut buf = Vec::new();
            write_qname(&mut buf, &mname)?;
            write_qname(&mut buf, &rname)?;
            buf.extend_from_slice(&serial.to_be_bytes());
            buf.extend_from_slice(&refresh.to_be_bytes());
            buf.extend_from_slice(&retry.to_be_bytes());
            buf.extend_from_slice(&expire.to_be_bytes());
            buf.extend_from_slice(&minimum.to_be_bytes());
            buf
        }

        Type::SRV => {
            let priority = cur.read_u16::<BE>()?;
            let weight = cur.read_u16::<BE>()?;
            let port = cur.read_u16::<BE>()?;
            let target = cur.read_qname()?;

            let mut buf = Vec::new();
            buf.extend_from_slice(&priority.to_be_bytes());
            buf.extend_from_slice(&weight.to_be_bytes());
            buf.extend_from_slice(&port.to_be_bytes());
            write_qname(&mut buf, &target)?;
            buf
        }

        _ => {
            let mut buf = vec![0; rdlength.into()];
            cur.read_exact(&mut buf)?;
            buf
        }
    };

    // Name-bearing types above don't necessarily consume exactly
    // `rdlength` bytes of the *original* encoding (compression shortens
    // it). Seek to the declared end regardless, so a miscounted read
    // can't desynchronise the rest of the message.
    cur.seek(io::SeekFrom::Start(start + rdlength as u64))?;

    Ok(rdata)
}

impl Message {
    /// Decodes the supplied buffer and returns a [`Message`].
    pub fn from_slice(buf: &[u8]) -> io::Result<Message> {
        MessageParser::new(buf).parse()
    }

    /// Encodes this [`Message`] as bytes ready to be sent on the wire.
    pub fn to_vec(&self) -> io::Result<Vec<u8>> {
        let mut req = Vec::<u8>::with_capacity(512);

        req.extend_from_slice(&self.id.to_be_bytes());

        let mut b = 0_u8;
        b |= if self.qr.to_bool() { 0b1000_0000 } else { 0 };
        b |= (self.opcode.to_u8() << 3) & 0b0111_1000;
        b |= if self.aa { 0b0000_0100 } else { 0 };
        b |= if self.tc { 0b0000_0010 } else { 0 };
        b |= if self.rd { 0b0000_0001 } else { 0 };
        req.push(b);

        let mut b = 0_u8;
        b |= if self.ra { 0b1000_0000 } else { 0 };
        b |= if self.z { 0b0100_0000 } else { 0 };
        b |= if self.ad { 0b0010_0000 } else { 0 };
        b |= if self.cd { 0b0001_0000 } else { 0 };
        b |= self.rcode.to_u8() & 0b0000_1111;
        req.push(b);

        let ar_count = self.additionals.len() as u16 + self.extension.is_some() as u16;

        req.extend_from_slice(&(self.questions.len() as u16).to_be_bytes());
        req.extend_from_slice(&(self.answers.len() as u16).to_be_bytes());
        req.extend_from_slice(&(self.authoritys.len() as u16).to_be_bytes());
        req.extend_from_slice(&ar_count.to_be_bytes());

        for question in &self.questions {
            write_qname(&mut req, &question.name)?;
            req.extend_from_slice(&question.r#type.to_u16().to_be_bytes());
            req.extend_from_slice(&question.class.to_u16().to_be_bytes());
        }

        for record in self.answers.iter().chain(&self.authoritys).chain(&self.additionals) {
            write_record(&mut req, record)?;
        }

        if let Some(e) = &self.extension {
            e.write(&mut req)?;
        }

        Ok(req)
    }

    /// Encodes this message, truncating per RFC 1035 §4.1.1 if the full
    /// encoding would exceed `max_size` bytes: the TC bit is set and
    /// everything past the question section is dropped. Used by
    /// transports (UDP) whose response datagram has a hard size limit;
    /// transports without one (TCP, TLS, HTTPS) should call `to_vec`.
    pub fn to_vec_truncated(&self, max_size: usize) -> io::Result<Vec<u8>> {
        let full = self.to_vec()?;
        if full.len() <= max_size {
            return Ok(full);
        }

        let truncated = Message {
            tc: true,
            answers: Vec::new(),
            authoritys: Vec::new(),
            additionals: Vec::new(),
            extension: None,
            ..self.clone()
        };
        truncated.to_vec()
    }
}

fn write_record(buf: &mut Vec<u8>, record: &Record) -> io::Result<()> {
    write_qname(buf, &record.name)?;
    buf.extend_from_slice(&record.r#type.to_u16().to_be_bytes());
    buf.extend_from_slice(&record.class.to_u16().to_be_bytes());
    buf.extend_from_slice(&(record.ttl.as_secs() as u32).to_be_bytes());

    if record.rdata.len() > u16::MAX as usize {
        bail!(InvalidData, "rdata for '{}' exceeds 65535 bytes", record.name);
    }

    buf.extend_from_slice(&(record.rdata.len() as u16).to_be_bytes());
    buf.extend_from_slice(&record.rdata);

    Ok(())
}

impl Extension {
    fn parse(cur: &mut Cursor<&[u8]>, domain: &str) -> io::Result<Extension> {
        if domain != "." {
            bail!(
                InvalidData,
                "expected root domain for EDNS(0) extension, got '{}'",
                domain
            );
        }

        let payload_size = cur.read_u16::<BE>()?;
        let extend_rcode = cur.read_u8()?;
        let version = cur.read_u8()?;

        let b = cur.read_u8()?;
        let dnssec_ok = b & 0b1000_0000 == 0b1000_0000;
        let _z = cur.read_u8()?;

        let rd_len = cur.read_u16::<BE>()?;
        cur.consume(rd_len.into());

        Ok(Extension {
            payload_size,
            extend_rcode,
            version,
            dnssec_ok,
        })
    }

    fn write(&self, buf: &mut Vec<u8>) -> io::Result<()> {
        buf.push(0); // root domain
        buf.extend_from_slice(&Type::OPT.to_u16().to_be_bytes());
        buf.extend_from_slice(&self.payload_size.to_be_bytes());

        buf.push(self.extend_rcode);
        buf.push(self.version);

        let mut b = 0_u8;
        b |= if self.dnssec_ok { 0b1000_0000 } else { 0 };
        buf.push(b);
        buf.push(0);

        buf.push(0); // RDLENGTH, no options emitted
        buf.push(0);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn query_round_trips() {
        let mut m = Message {
            id: 0x1234,
            rd: true,
            ..Message::default()
        };
        m.add_question("example.com", Type::A, Class::Internet);

        let bytes = m.to_vec().unwrap();
        let decoded = Message::from_slice(&bytes).unwrap();

        assert_eq!(decoded.id, 0x1234);
        assert_eq!(decoded.questions.len(), 1);
        assert_eq!(decoded.questions[0].name, "example.com");
        assert_eq!(decoded.questions[0].r#type, Type::A);
    }

    #[test]
    fn response_with_answer_round_trips() {
        let mut m = Message {
            id: 7,
            qr: QR::Response,
            rcode: Rcode::NoError,
            ..Message::default()
        };
        m.add_question("example.com", Type::A, Class::Internet);
        m.answers.push(Record {
            name: "example.com".to_string(),
            r#type: Type::A,
            class: Class::Internet,
            ttl: Duration::from_secs(300),
            rdata: vec![93, 184, 216, 34],
        });

        let bytes = m.to_vec().unwrap();
        let decoded = Message::from_slice(&bytes).unwrap();

        assert_eq!(decoded.answers.len(), 1);
        assert_eq!(decoded.answers[0].rdata, vec![93, 184, 216, 34]);
        assert_eq!(decoded.answers[0].ttl, Duration::from_secs(300));
        assert!(decoded.answers_query(&m));
    }

    #[test]
    fn cname_rdata_is_decompressed_on_decode() {
        // A response whose single CNAME answer points its RDATA name at
        // the question name via a compression pointer: byte 12 is where
        // the question's qname starts in a message with no header
        // surprises, so 0xC0 0x0C is "pointer to offset 12".
        let mut m = Message {
            id: 1,
            qr: QR::Response,
            ..Message::default()
        };
        m.add_question("a.example.com", Type::CNAME, Class::Internet);

        let mut raw = m.to_vec().unwrap();
        // Append one answer: name = pointer to the question (0xC0 0x0C),
        // type CNAME, class IN, ttl 60, rdlength 2, rdata = pointer to
        // question name again.
        raw.extend_from_slice(&[0xC0, 0x0C]);
        raw.extend_from_slice(&Type::CNAME.to_u16().to_be_bytes());
        raw.extend_from_slice(&Class::Internet.to_u16().to_be_bytes());
        raw.extend_from_slice(&60u32.to_be_bytes());
        raw.extend_from_slice(&2u16.to_be_bytes());
        raw.extend_from_slice(&[0xC0, 0x0C]);
        raw[7] = 1; // ANCOUNT = 1

        let decoded = Message::from_slice(&raw).unwrap();
        assert_eq!(decoded.answers.len(), 1);

        // The decompressed rdata must re-encode as a literal qname, not a
        // dangling pointer, so it survives being copied into a response
        // that doesn't share the original's byte layout.
        let reencoded = decoded.to_vec().unwrap();
        let reparsed = Message::from_slice(&reencoded).unwrap();
        assert_eq!(reparsed.answers[0].rdata, decoded.answers[0].rdata);
        assert!(!reparsed.answers[0].rdata.starts_with(&[0xC0]));
    }

    #[test]
    fn an_oversized_response_is_truncated_with_tc_set() {
        let mut m = Message {
            id: 1,
            qr: QR::Response,
            ..Message::default()
        };
        m.add_question("example.com", Type::A, Class::Internet);
        for i in 0..100 {
            m.answers.push(Record {
                name: format!("host{}.example.com", i),
                r#type: Type::A,
                class: Class::Internet,
                ttl: Duration::from_secs(300),
                rdata: vec![10, 0, 0, i as u8],
            });
        }

        let full = m.to_vec().unwrap();
        assert!(full.len() > 512);

        let truncated = m.to_vec_truncated(512).unwrap();
        assert!(truncated.len() <= 512);

        let decoded = Message::from_slice(&truncated).unwrap();
        assert!(decoded.tc);
        assert!(decoded.answers.is_empty());
        assert_eq!(decoded.questions.len(), 1);
        assert_eq!(decoded.questions[0].name, "example.com");
    }

    #[test]
    fn a_response_within_the_limit_is_not_truncated() {
        let mut m = Message {
            id: 1,
            qr: QR::Response,
            ..Message::default()
        };
        m.add_question("example.com", Type::A, Class::Internet);

        let truncated = m.to_vec_truncated(512).unwrap();
        let decoded = Message::from_slice(&truncated).unwrap();
        assert!(!decoded.tc);
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let m = Message::default();
        let mut bytes = m.to_vec().unwrap();
        bytes.push(0xFF);
        assert!(Message::from_slice(&bytes).is_err());
    }
}
