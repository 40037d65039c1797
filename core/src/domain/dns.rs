// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! RFC 1035 message types. Wire encoding lives in
//! [`crate::infrastructure::dns_codec`]; this module holds the typed,
//! in-memory representation the codec round-trips.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpCode {
    Query,
    IQuery,
    Status,
    Notify,
    Update,
    Reserved(u8),
}

impl OpCode {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => OpCode::Query,
            1 => OpCode::IQuery,
            2 => OpCode::Status,
            4 => OpCode::Notify,
            5 => OpCode::Update,
            other => OpCode::Reserved(other),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            OpCode::Query => 0,
            OpCode::IQuery => 1,
            OpCode::Status => 2,
            OpCode::Notify => 4,
            OpCode::Update => 5,
            OpCode::Reserved(v) => *v,
        }
    }
}

/// RCODEs, through the extended range (0-23).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RCode {
    NoError,
    FormatError,
    ServerFailure,
    NonExistentDomain,
    NotImplemented,
    Refused,
    YxDomain,
    YxRrSet,
    NxRrSet,
    NotAuth,
    NotZone,
    BadVers,
    BadKey,
    BadTime,
    BadMode,
    BadName,
    BadAlg,
    BadTrunc,
    BadCookie,
    Other(u8),
}

impl RCode {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => RCode::NoError,
            1 => RCode::FormatError,
            2 => RCode::ServerFailure,
            3 => RCode::NonExistentDomain,
            4 => RCode::NotImplemented,
            5 => RCode::Refused,
            6 => RCode::YxDomain,
            7 => RCode::YxRrSet,
            8 => RCode::NxRrSet,
            9 => RCode::NotAuth,
            10 => RCode::NotZone,
            16 => RCode::BadVers,
            17 => RCode::BadKey,
            18 => RCode::BadTime,
            19 => RCode::BadMode,
            20 => RCode::BadName,
            21 => RCode::BadAlg,
            22 => RCode::BadTrunc,
            23 => RCode::BadCookie,
            other => RCode::Other(other),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            RCode::NoError => 0,
            RCode::FormatError => 1,
            RCode::ServerFailure => 2,
            RCode::NonExistentDomain => 3,
            RCode::NotImplemented => 4,
            RCode::Refused => 5,
            RCode::YxDomain => 6,
            RCode::YxRrSet => 7,
            RCode::NxRrSet => 8,
            RCode::NotAuth => 9,
            RCode::NotZone => 10,
            RCode::BadVers => 16,
            RCode::BadKey => 17,
            RCode::BadTime => 18,
            RCode::BadMode => 19,
            RCode::BadAlg => 21,
            RCode::BadTrunc => 22,
            RCode::BadCookie => 23,
            RCode::BadName => 20,
            RCode::Other(v) => *v,
        }
    }
}

/// Record types, including the well-known codes through 65, plus the
/// 256/257 AXFR/ANY query-only extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RrType {
    A,
    Ns,
    Cname,
    Soa,
    Ptr,
    Mx,
    Txt,
    Aaaa,
    Srv,
    Opt,
    Svcb,
    Https,
    Any,
    Axfr,
    Other(u16),
}

impl RrType {
    pub fn from_u16(v: u16) -> Self {
        match v {
            1 => RrType::A,
            2 => RrType::Ns,
            5 => RrType::Cname,
            6 => RrType::Soa,
            12 => RrType::Ptr,
            15 => RrType::Mx,
            16 => RrType::Txt,
            28 => RrType::Aaaa,
            33 => RrType::Srv,
            41 => RrType::Opt,
            64 => RrType::Svcb,
            65 => RrType::Https,
            252 => RrType::Axfr,
            255 => RrType::Any,
            other => RrType::Other(other),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            RrType::A => 1,
            RrType::Ns => 2,
            RrType::Cname => 5,
            RrType::Soa => 6,
            RrType::Ptr => 12,
            RrType::Mx => 15,
            RrType::Txt => 16,
            RrType::Aaaa => 28,
            RrType::Srv => 33,
            RrType::Opt => 41,
            RrType::Svcb => 64,
            RrType::Https => 65,
            RrType::Axfr => 252,
            RrType::Any => 255,
            RrType::Other(v) => *v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RrClass {
    In,
    Any,
    Other(u16),
}

impl RrClass {
    pub fn from_u16(v: u16) -> Self {
        match v {
            1 => RrClass::In,
            255 => RrClass::Any,
            other => RrClass::Other(other),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            RrClass::In => 1,
            RrClass::Any => 255,
            RrClass::Other(v) => *v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub name: String,
    pub qtype: RrType,
    pub qclass: RrClass,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RData {
    A(std::net::Ipv4Addr),
    Aaaa(std::net::Ipv6Addr),
    Cname(String),
    Ns(String),
    Ptr(String),
    Txt(Vec<String>),
    Mx { preference: u16, exchange: String },
    Raw(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub name: String,
    pub rtype: RrType,
    pub rclass: RrClass,
    pub ttl: u32,
    pub rdata: RData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: u16,
    pub opcode: OpCode,
    pub qr: bool,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub rcode: RCode,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub authorities: Vec<ResourceRecord>,
    pub additionals: Vec<ResourceRecord>,
}

impl Message {
    pub fn query(id: u16, question: Question) -> Self {
        Self {
            id,
            opcode: OpCode::Query,
            qr: false,
            aa: false,
            tc: false,
            rd: true,
            ra: false,
            rcode: RCode::NoError,
            questions: vec![question],
            answers: Vec::new(),
            authorities: Vec::new(),
            additionals: Vec::new(),
        }
    }

    /// Build a response echoing `self`'s id and opcode.
    pub fn reply(&self, rcode: RCode, answers: Vec<ResourceRecord>) -> Self {
        Self {
            id: self.id,
            opcode: self.opcode,
            qr: true,
            aa: true,
            tc: false,
            rd: self.rd,
            ra: true,
            rcode,
            questions: self.questions.clone(),
            answers,
            authorities: Vec::new(),
            additionals: Vec::new(),
        }
    }

    /// NODATA vs NXDOMAIN distinction. Upgrades
    /// an empty-answer non-`NoError` response to `NonExistentDomain`; a
    /// `NoError` response with empty answers is left alone as NODATA,
    /// since musl libc treats empty-AAAA-with-A-present as NODATA, not
    /// "domain absent". `NotImplemented` is exempt: it means the server
    /// declined the query outright (unsupported qtype/opcode), not that
    /// the queried domain doesn't exist, so it is left as-is.
    pub fn normalize_empty_answer_rcode(mut self) -> Self {
        if self.answers.is_empty() && !matches!(self.rcode, RCode::NoError | RCode::NotImplemented) {
            self.rcode = RCode::NonExistentDomain;
        }
        self
    }
}
