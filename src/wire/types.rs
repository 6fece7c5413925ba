//! The DNS message model shared by every transport and listener.
//!
//! [`Record`] carries its resource data as opaque bytes rather than a
//! typed `Resource` enum: a forwarder never interprets an answer, it
//! only relays it, and an opaque `rdata` lets unknown or future record
//! types pass through untouched. [`Type`] and [`Class`] keep a
//! `Display`-able enum shape but fall back to an `Other(u16)` variant
//! instead of erroring, since a forwarder must not refuse to relay a
//! record type it doesn't recognise.

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant, SystemTime};

/// DNS message: a query received from a client, or a response received
/// from (and about to be relayed back from) an upstream server.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub id: u16,
    pub rd: bool,
    pub tc: bool,
    pub aa: bool,
    pub opcode: Opcode,
    pub qr: QR,
    pub rcode: Rcode,
    pub cd: bool,
    pub ad: bool,
    pub z: bool,
    pub ra: bool,

    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
    pub authoritys: Vec<Record>,
    pub additionals: Vec<Record>,

    /// EDNS(0) pseudo-RR, parsed separately from `additionals`.
    pub extension: Option<Extension>,

    /// Populated by the client transport after a successful exchange.
    pub stats: Option<Stats>,
}

impl Default for Message {
    fn default() -> Self {
        Message {
            id: Message::random_id(),
            rd: true,
            tc: false,
            aa: false,
            opcode: Opcode::Query,
            qr: QR::Query,
            rcode: Rcode::NoError,
            cd: false,
            ad: false,
            z: false,
            ra: false,

            questions: Vec::new(),
            answers: Vec::new(),
            authoritys: Vec::new(),
            additionals: Vec::new(),
            extension: None,
            stats: None,
        }
    }
}

impl Message {
    /// Returns a random u16 suitable for the [`Message`] id field.
    pub fn random_id() -> u16 {
        rand::random()
    }

    pub fn add_question(&mut self, name: &str, r#type: Type, class: Class) {
        self.questions.push(Question {
            name: name.to_string(),
            r#type,
            class,
        });
    }

    /// True if `self` is a plausible response to `query`: matching id and
    /// an echoed first question (name compared case-insensitively, per
    /// RFC 1035 §2.3.3). Upstream clients use this to reject
    /// cache-poisoning or off-path garbage before it is handed back to a
    /// client.
    pub fn answers_query(&self, query: &Message) -> bool {
        if self.id != query.id {
            return false;
        }
        if self.qr != QR::Response {
            return false;
        }

        match (self.questions.first(), query.questions.first()) {
            (Some(a), Some(b)) => {
                a.r#type == b.r#type
                    && a.class == b.class
                    && a.name.eq_ignore_ascii_case(&b.name)
            }
            (None, None) => true,
            _ => false,
        }
    }
}

/// A single question: what the client asked for.
#[derive(Clone, Debug, PartialEq)]
pub struct Question {
    pub name: String,
    pub r#type: Type,
    pub class: Class,
}

/// A resource record, stored as opaque RDATA. See the module docs for why.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub name: String,
    pub r#type: Type,
    pub class: Class,
    pub ttl: Duration,
    pub rdata: Vec<u8>,
}

/// EDNS(0) pseudo-record, as defined by RFC 6891.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Extension {
    pub payload_size: u16,
    pub extend_rcode: u8,
    pub version: u8,
    pub dnssec_ok: bool,
}

impl Default for Extension {
    fn default() -> Self {
        Extension {
            payload_size: 4096,
            extend_rcode: 0,
            version: 0,
            dnssec_ok: false,
        }
    }
}

/// Timing and endpoint metadata about one upstream exchange, unrelated to
/// the wire format itself. Attached to the response [`Message`] so the
/// forwarder can log which endpoint answered and how long it took.
#[derive(Clone, Debug, PartialEq)]
pub struct Stats {
    pub start: SystemTime,
    pub duration: Duration,
    pub server: SocketAddr,
    pub request_size: usize,
    pub response_size: usize,
}

pub(crate) struct StatsBuilder {
    start: SystemTime,
    timer: Instant,
    request_size: usize,
}

impl StatsBuilder {
    pub fn start(request_size: usize) -> StatsBuilder {
        StatsBuilder {
            start: SystemTime::now(),
            timer: Instant::now(),
            request_size,
        }
    }

    pub fn end(self, server: SocketAddr, response_size: usize) -> Stats {
        Stats {
            start: self.start,
            duration: self.timer.elapsed(),
            request_size: self.request_size,
            server,
            response_size,
        }
    }
}

/// Query or Response bit.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum QR {
    Query,
    Response,
}

impl QR {
    pub fn from_bool(b: bool) -> QR {
        if b {
            QR::Response
        } else {
            QR::Query
        }
    }

    pub fn to_bool(self) -> bool {
        matches!(self, QR::Response)
    }
}

/// Kind of query, per RFC 1035 and the IANA DNS Parameters registry.
/// Anything outside the assigned range we've bothered to name is kept as
/// `Other`, since a forwarder must relay opcodes it doesn't itself use.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Opcode {
    Query,
    IQuery,
    Status,
    Notify,
    Update,
    DSO,
    Other(u8),
}

impl Opcode {
    pub fn from_u8(v: u8) -> Opcode {
        match v {
            0 => Opcode::Query,
            1 => Opcode::IQuery,
            2 => Opcode::Status,
            4 => Opcode::Notify,
            5 => Opcode::Update,
            6 => Opcode::DSO,
            other => Opcode::Other(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Opcode::Query => 0,
            Opcode::IQuery => 1,
            Opcode::Status => 2,
            Opcode::Notify => 4,
            Opcode::Update => 5,
            Opcode::DSO => 6,
            Opcode::Other(v) => v,
        }
    }
}

impl Default for Opcode {
    fn default() -> Self {
        Opcode::Query
    }
}

/// Response code. Kept alongside `Other` so the forwarder can relay an
/// upstream's extended RCODE even if it post-dates this list.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Rcode {
    NoError,
    FormErr,
    ServFail,
    NXDomain,
    NotImp,
    Refused,
    YXDomain,
    YXRRSet,
    NXRRSet,
    NotAuth,
    NotZone,
    Other(u8),
}

impl Rcode {
    pub fn from_u8(v: u8) -> Rcode {
        match v {
            0 => Rcode::NoError,
            1 => Rcode::FormErr,
            2 => Rcode::ServFail,
            3 => Rcode::NXDomain,
            4 => Rcode::NotImp,
            5 => Rcode::Refused,
            6 => Rcode::YXDomain,
            7 => Rcode::YXRRSet,
            8 => Rcode::NXRRSet,
            9 => Rcode::NotAuth,
            10 => Rcode::NotZone,
            other => Rcode::Other(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Rcode::NoError => 0,
            Rcode::FormErr => 1,
            Rcode::ServFail => 2,
            Rcode::NXDomain => 3,
            Rcode::NotImp => 4,
            Rcode::Refused => 5,
            Rcode::YXDomain => 6,
            Rcode::YXRRSet => 7,
            Rcode::NXRRSet => 8,
            Rcode::NotAuth => 9,
            Rcode::NotZone => 10,
            Rcode::Other(v) => v,
        }
    }

    /// Acceptable per the upstream response-validation rule of
    /// NOERROR, NXDOMAIN, SERVFAIL, REFUSED and FORMERR are all still a
    /// valid (if unhelpful) answer from a live server, not grounds to
    /// retry. FORMERR is remapped to SERVFAIL by the forwarder when
    /// relaying, not rejected here.
    pub fn acceptable(self) -> bool {
        matches!(
            self,
            Rcode::NoError | Rcode::NXDomain | Rcode::ServFail | Rcode::Refused | Rcode::FormErr
        )
    }
}

impl Default for Rcode {
    fn default() -> Self {
        Rcode::NoError
    }
}

impl fmt::Display for Rcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Rcode::NoError => "NOERROR",
            Rcode::FormErr => "FORMERR",
            Rcode::ServFail => "SERVFAIL",
            Rcode::NXDomain => "NXDOMAIN",
            Rcode::NotImp => "NOTIMP",
            Rcode::Refused => "REFUSED",
            Rcode::YXDomain => "YXDOMAIN",
            Rcode::YXRRSet => "YXRRSET",
            Rcode::NXRRSet => "NXRRSET",
            Rcode::NotAuth => "NOTAUTH",
            Rcode::NotZone => "NOTZONE",
            Rcode::Other(v) => return write!(f, "RCODE{}", v),
        };
        f.write_str(s)
    }
}

/// Resource record type. `Other` carries through any value this crate
/// hasn't bothered to name; since a `Record`'s `rdata` is already opaque,
/// there's nothing further it would need `Type` for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[allow(clippy::upper_case_acronyms)]
pub enum Type {
    A,
    NS,
    CNAME,
    SOA,
    PTR,
    MX,
    TXT,
    AAAA,
    SRV,
    OPT,
    ANY,
    Other(u16),
}

impl Type {
    pub fn from_u16(v: u16) -> Type {
        match v {
            1 => Type::A,
            2 => Type::NS,
            5 => Type::CNAME,
            6 => Type::SOA,
            12 => Type::PTR,
            15 => Type::MX,
            16 => Type::TXT,
            28 => Type::AAAA,
            33 => Type::SRV,
            41 => Type::OPT,
            255 => Type::ANY,
            other => Type::Other(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            Type::A => 1,
            Type::NS => 2,
            Type::CNAME => 5,
            Type::SOA => 6,
            Type::PTR => 12,
            Type::MX => 15,
            Type::TXT => 16,
            Type::AAAA => 28,
            Type::SRV => 33,
            Type::OPT => 41,
            Type::ANY => 255,
            Type::Other(v) => v,
        }
    }
}

impl Default for Type {
    fn default() -> Self {
        Type::ANY
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Type::A => "A",
            Type::NS => "NS",
            Type::CNAME => "CNAME",
            Type::SOA => "SOA",
            Type::PTR => "PTR",
            Type::MX => "MX",
            Type::TXT => "TXT",
            Type::AAAA => "AAAA",
            Type::SRV => "SRV",
            Type::OPT => "OPT",
            Type::ANY => "ANY",
            Type::Other(v) => return write!(f, "TYPE{}", v),
        };
        f.write_str(s)
    }
}

/// Resource record class.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Class {
    Internet,
    CsNet,
    Chaos,
    Hesiod,
    None,
    Any,
    Other(u16),
}

impl Class {
    pub fn from_u16(v: u16) -> Class {
        match v {
            1 => Class::Internet,
            2 => Class::CsNet,
            3 => Class::Chaos,
            4 => Class::Hesiod,
            254 => Class::None,
            255 => Class::Any,
            other => Class::Other(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            Class::Internet => 1,
            Class::CsNet => 2,
            Class::Chaos => 3,
            Class::Hesiod => 4,
            Class::None => 254,
            Class::Any => 255,
            Class::Other(v) => v,
        }
    }
}

impl Default for Class {
    fn default() -> Self {
        Class::Internet
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Class::Internet => "IN",
            Class::CsNet => "CS",
            Class::Chaos => "CH",
            Class::Hesiod => "HS",
            Class::None => "NONE",
            Class::Any => "ANY",
            Class::Other(v) => return write!(f, "CLASS{}", v),
        };
        f.write_str(s)
    }
}
