// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! RFC 1035 wire encoding for [`crate::domain::dns::Message`]: the
//! 12-byte header, label sequences with pointer compression on encode
//! and pointer-following on decode, and the handful of RDATA formats
//! this server actually serves.

use crate::domain::dns::{Message, OpCode, Question, RCode, RData, ResourceRecord, RrClass, RrType};
use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;

/// UDP is capped to the conservative 512-byte classic limit.
pub const MAX_UDP_MESSAGE_SIZE: usize = 512;
/// TCP messages are length-prefixed with a 2-byte length field, but
/// this server enforces a tighter cap than the 16-bit wire maximum: a
/// frame whose declared length exceeds this is treated as framing
/// desync and the connection is closed without a response.
pub const MAX_TCP_MESSAGE_SIZE: usize = 4096;
/// The 2-byte length-prefix field's actual wire ceiling, kept distinct
/// from [`MAX_TCP_MESSAGE_SIZE`] so the two concerns (protocol limit vs.
/// this server's policy limit) don't get conflated.
pub const MAX_TCP_WIRE_LENGTH: usize = u16::MAX as usize;
const MAX_LABEL_LEN: usize = 63;
const MAX_POINTER_JUMPS: usize = 64;
const POINTER_FLAG: u8 = 0b1100_0000;

#[derive(Debug, Error)]
pub enum DnsCodecError {
    #[error("message truncated")]
    Truncated,
    #[error("label too long: {0} bytes")]
    LabelTooLong(usize),
    #[error("name too long")]
    NameTooLong,
    #[error("too many compression pointer jumps")]
    PointerLoop,
    #[error("invalid compression pointer")]
    InvalidPointer,
}

struct Writer {
    buf: Vec<u8>,
    name_offsets: HashMap<String, u16>,
}

impl Writer {
    fn new() -> Self {
        Self { buf: Vec::new(), name_offsets: HashMap::new() }
    }

    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Writes a domain name, using a compression pointer to a
    /// previously-written suffix when one exists and is reachable
    /// within the 14-bit pointer offset space.
    fn name(&mut self, name: &str) -> Result<(), DnsCodecError> {
        let normalized = name.trim_end_matches('.').to_ascii_lowercase();
        if normalized.is_empty() {
            self.buf.push(0);
            return Ok(());
        }

        let labels: Vec<&str> = normalized.split('.').collect();
        for i in 0..labels.len() {
            let suffix = labels[i..].join(".");
            if let Some(&offset) = self.name_offsets.get(&suffix) {
                self.u16(POINTER_FLAG as u16 * 256 + offset);
                return Ok(());
            }
            if self.buf.len() <= 0x3FFF {
                self.name_offsets.insert(suffix, self.buf.len() as u16);
            }

            let label = labels[i].as_bytes();
            if label.len() > MAX_LABEL_LEN {
                return Err(DnsCodecError::LabelTooLong(label.len()));
            }
            self.buf.push(label.len() as u8);
            self.buf.extend_from_slice(label);
        }
        self.buf.push(0);
        Ok(())
    }

    fn question(&mut self, q: &Question) -> Result<(), DnsCodecError> {
        self.name(&q.name)?;
        self.u16(q.qtype.as_u16());
        self.u16(q.qclass.as_u16());
        Ok(())
    }

    fn record(&mut self, rr: &ResourceRecord) -> Result<(), DnsCodecError> {
        self.name(&rr.name)?;
        self.u16(rr.rtype.as_u16());
        self.u16(rr.rclass.as_u16());
        self.u32(rr.ttl);

        let rdata_start = self.buf.len();
        self.u16(0); // placeholder RDLENGTH
        let data_start = self.buf.len();
        match &rr.rdata {
            RData::A(addr) => self.buf.extend_from_slice(&addr.octets()),
            RData::Aaaa(addr) => self.buf.extend_from_slice(&addr.octets()),
            RData::Cname(target) | RData::Ns(target) | RData::Ptr(target) => {
                self.name(target)?;
            }
            RData::Mx { preference, exchange } => {
                self.u16(*preference);
                self.name(exchange)?;
            }
            RData::Txt(strings) => {
                for s in strings {
                    let bytes = s.as_bytes();
                    let chunk = &bytes[..bytes.len().min(255)];
                    self.buf.push(chunk.len() as u8);
                    self.buf.extend_from_slice(chunk);
                }
            }
            RData::Raw(bytes) => self.buf.extend_from_slice(bytes),
        }
        let rdlength = (self.buf.len() - data_start) as u16;
        self.buf[rdata_start..rdata_start + 2].copy_from_slice(&rdlength.to_be_bytes());
        Ok(())
    }
}

pub fn encode(message: &Message) -> Result<Vec<u8>, DnsCodecError> {
    let mut w = Writer::new();
    w.u16(message.id);

    let mut flags: u16 = 0;
    if message.qr {
        flags |= 1 << 15;
    }
    flags |= (message.opcode.as_u8() as u16 & 0b1111) << 11;
    if message.aa {
        flags |= 1 << 10;
    }
    if message.tc {
        flags |= 1 << 9;
    }
    if message.rd {
        flags |= 1 << 8;
    }
    if message.ra {
        flags |= 1 << 7;
    }
    flags |= message.rcode.as_u8() as u16 & 0b1111;
    w.u16(flags);

    w.u16(message.questions.len() as u16);
    w.u16(message.answers.len() as u16);
    w.u16(message.authorities.len() as u16);
    w.u16(message.additionals.len() as u16);

    for q in &message.questions {
        w.question(q)?;
    }
    for rr in &message.answers {
        w.record(rr)?;
    }
    for rr in &message.authorities {
        w.record(rr)?;
    }
    for rr in &message.additionals {
        w.record(rr)?;
    }

    Ok(w.buf)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn u8(&mut self) -> Result<u8, DnsCodecError> {
        let b = *self.buf.get(self.pos).ok_or(DnsCodecError::Truncated)?;
        self.pos += 1;
        Ok(b)
    }

    fn u16(&mut self) -> Result<u16, DnsCodecError> {
        let hi = self.u8()? as u16;
        let lo = self.u8()? as u16;
        Ok((hi << 8) | lo)
    }

    fn u32(&mut self) -> Result<u32, DnsCodecError> {
        let hi = self.u16()? as u32;
        let lo = self.u16()? as u32;
        Ok((hi << 16) | lo)
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], DnsCodecError> {
        let end = self.pos.checked_add(n).ok_or(DnsCodecError::Truncated)?;
        let slice = self.buf.get(self.pos..end).ok_or(DnsCodecError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    /// Reads a (possibly compressed) domain name starting at the
    /// current position, following pointers without permanently moving
    /// `self.pos` past the first pointer encountered.
    fn name(&mut self) -> Result<String, DnsCodecError> {
        let mut labels: Vec<String> = Vec::new();
        let mut cursor = self.pos;
        let mut jumps = 0;
        let mut advanced_past: Option<usize> = None;

        loop {
            let len = *self.buf.get(cursor).ok_or(DnsCodecError::Truncated)?;
            if len == 0 {
                cursor += 1;
                if advanced_past.is_none() {
                    advanced_past = Some(cursor);
                }
                break;
            }
            if len & POINTER_FLAG == POINTER_FLAG {
                if jumps >= MAX_POINTER_JUMPS {
                    return Err(DnsCodecError::PointerLoop);
                }
                let b2 = *self.buf.get(cursor + 1).ok_or(DnsCodecError::Truncated)?;
                let offset = (((len & !POINTER_FLAG) as usize) << 8) | b2 as usize;
                if offset >= cursor {
                    return Err(DnsCodecError::InvalidPointer);
                }
                if advanced_past.is_none() {
                    advanced_past = Some(cursor + 2);
                }
                cursor = offset;
                jumps += 1;
                continue;
            }

            let label_len = len as usize;
            if label_len > MAX_LABEL_LEN {
                return Err(DnsCodecError::LabelTooLong(label_len));
            }
            let start = cursor + 1;
            let end = start + label_len;
            let label_bytes = self.buf.get(start..end).ok_or(DnsCodecError::Truncated)?;
            labels.push(String::from_utf8_lossy(label_bytes).into_owned());
            cursor = end;

            if labels.iter().map(|l| l.len() + 1).sum::<usize>() > 255 {
                return Err(DnsCodecError::NameTooLong);
            }
        }

        self.pos = advanced_past.expect("loop always sets this before breaking or erroring");
        Ok(labels.join("."))
    }

    fn question(&mut self) -> Result<Question, DnsCodecError> {
        let name = self.name()?;
        let qtype = RrType::from_u16(self.u16()?);
        let qclass = RrClass::from_u16(self.u16()?);
        Ok(Question { name, qtype, qclass })
    }

    fn record(&mut self) -> Result<ResourceRecord, DnsCodecError> {
        let name = self.name()?;
        let rtype = RrType::from_u16(self.u16()?);
        let rclass = RrClass::from_u16(self.u16()?);
        let ttl = self.u32()?;
        let rdlength = self.u16()? as usize;
        let rdata_start = self.pos;

        let rdata = match rtype {
            RrType::A => {
                let bytes = self.bytes(4)?;
                RData::A(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]))
            }
            RrType::Aaaa => {
                let bytes = self.bytes(16)?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(bytes);
                RData::Aaaa(Ipv6Addr::from(octets))
            }
            RrType::Cname => RData::Cname(self.name()?),
            RrType::Ns => RData::Ns(self.name()?),
            RrType::Ptr => RData::Ptr(self.name()?),
            RrType::Mx => {
                let preference = self.u16()?;
                let exchange = self.name()?;
                RData::Mx { preference, exchange }
            }
            RrType::Txt => {
                let mut strings = Vec::new();
                let end = rdata_start + rdlength;
                while self.pos < end {
                    let len = self.u8()? as usize;
                    let bytes = self.bytes(len)?;
                    strings.push(String::from_utf8_lossy(bytes).into_owned());
                }
                RData::Txt(strings)
            }
            _ => RData::Raw(self.bytes(rdlength)?.to_vec()),
        };

        // Any fixed-size RDATA parser above may have left `pos` short of
        // or exactly at rdata_start + rdlength; names can use
        // compression pointers that jump backwards, so re-anchor here
        // rather than trust the parser's final cursor.
        self.pos = rdata_start + rdlength;

        Ok(ResourceRecord { name, rtype, rclass, ttl, rdata })
    }
}

pub fn decode(bytes: &[u8]) -> Result<Message, DnsCodecError> {
    let mut r = Reader { buf: bytes, pos: 0 };

    let id = r.u16()?;
    let flags = r.u16()?;
    let qr = flags & (1 << 15) != 0;
    let opcode = OpCode::from_u8(((flags >> 11) & 0b1111) as u8);
    let aa = flags & (1 << 10) != 0;
    let tc = flags & (1 << 9) != 0;
    let rd = flags & (1 << 8) != 0;
    let ra = flags & (1 << 7) != 0;
    let rcode = RCode::from_u8((flags & 0b1111) as u8);

    let qdcount = r.u16()?;
    let ancount = r.u16()?;
    let nscount = r.u16()?;
    let arcount = r.u16()?;

    let mut questions = Vec::with_capacity(qdcount as usize);
    for _ in 0..qdcount {
        questions.push(r.question()?);
    }
    let mut answers = Vec::with_capacity(ancount as usize);
    for _ in 0..ancount {
        answers.push(r.record()?);
    }
    let mut authorities = Vec::with_capacity(nscount as usize);
    for _ in 0..nscount {
        authorities.push(r.record()?);
    }
    let mut additionals = Vec::with_capacity(arcount as usize);
    for _ in 0..arcount {
        additionals.push(r.record()?);
    }

    Ok(Message { id, opcode, qr, aa, tc, rd, ra, rcode, questions, answers, authorities, additionals })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dns::{Message, Question};

    #[test]
    fn query_round_trips() {
        let msg = Message::query(
            0x1234,
            Question { name: "example.com".into(), qtype: RrType::A, qclass: RrClass::In },
        );
        let bytes = encode(&msg).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.id, 0x1234);
        assert_eq!(decoded.questions[0].name, "example.com");
        assert_eq!(decoded.questions[0].qtype, RrType::A);
        assert!(decoded.rd);
        assert!(!decoded.qr);
    }

    #[test]
    fn reply_with_a_record_round_trips() {
        let query = Message::query(
            7,
            Question { name: "host.podhost.local".into(), qtype: RrType::A, qclass: RrClass::In },
        );
        let reply = query.reply(
            RCode::NoError,
            vec![ResourceRecord {
                name: "host.podhost.local".into(),
                rtype: RrType::A,
                rclass: RrClass::In,
                ttl: 30,
                rdata: RData::A(Ipv4Addr::new(10, 0, 0, 5)),
            }],
        );
        let bytes = encode(&reply).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert!(decoded.qr);
        assert!(decoded.aa);
        assert_eq!(decoded.answers.len(), 1);
        assert_eq!(decoded.answers[0].rdata, RData::A(Ipv4Addr::new(10, 0, 0, 5)));
    }

    #[test]
    fn repeated_suffix_uses_compression_pointer() {
        let mut msg = Message::query(
            1,
            Question { name: "a.example.com".into(), qtype: RrType::A, qclass: RrClass::In },
        );
        msg.answers.push(ResourceRecord {
            name: "b.example.com".into(),
            rtype: RrType::Cname,
            rclass: RrClass::In,
            ttl: 60,
            rdata: RData::Cname("a.example.com".into()),
        });
        let bytes = encode(&msg).unwrap();

        // uncompressed size would be far larger than two full names
        assert!(bytes.len() < 70);

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.answers[0].name, "b.example.com");
        assert_eq!(decoded.answers[0].rdata, RData::Cname("a.example.com".into()));
    }

    #[test]
    fn truncated_message_is_rejected() {
        let bytes = vec![0u8; 5];
        assert!(matches!(decode(&bytes), Err(DnsCodecError::Truncated)));
    }

    #[test]
    fn label_over_63_bytes_is_rejected_on_encode() {
        let long_label = "a".repeat(64);
        let msg = Message::query(
            1,
            Question { name: format!("{long_label}.com"), qtype: RrType::A, qclass: RrClass::In },
        );
        assert!(matches!(encode(&msg), Err(DnsCodecError::LabelTooLong(_))));
    }
}
