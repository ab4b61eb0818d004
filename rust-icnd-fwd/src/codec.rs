//! Wire codecs.
//!
//! Packet serialization is pluggable behind [`PacketCodec`]. The
//! canonical codec is a simple textual form; a compact serde/bincode
//! codec is available for links where byte count matters. The core
//! treats encoded frames as opaque bytes either way.

use bytes::{BufMut, Bytes, BytesMut};
use rust_icnd_common::{
    name::Name,
    packet::{Content, Interest, Nack, NackReason, Packet},
    Error, Result,
};

/// Encoder/decoder seam between the link layer and the packet pipeline.
pub trait PacketCodec: Send + Sync {
    fn encode(&self, packet: &Packet) -> Result<Bytes>;
    fn decode(&self, bytes: &[u8]) -> Result<Packet>;
}

/* ---------------------------------------------------------------- *\
 * Textual codec
\* ---------------------------------------------------------------- */

/// The canonical textual wire form.
///
/// One UTF-8 header line per packet; names are percent-escaped so they
/// never contain whitespace:
///
/// ```text
/// I <name>\n
/// C <name> <payload_len>\n<payload bytes>
/// N <reason> <name>\n[I <name>\n]
/// ```
///
/// The trailing `I` line of a Nack carries the originating Interest when
/// it is preserved.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl TextCodec {
    pub fn new() -> Self {
        Self
    }
}

impl PacketCodec for TextCodec {
    fn encode(&self, packet: &Packet) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        match packet {
            Packet::Interest(interest) => {
                buf.put_slice(format!("I {}\n", interest.name).as_bytes());
            }
            Packet::Content(content) => {
                buf.put_slice(
                    format!("C {} {}\n", content.name, content.payload.len()).as_bytes(),
                );
                buf.put_slice(&content.payload);
            }
            Packet::Nack(nack) => {
                buf.put_slice(format!("N {} {}\n", nack.reason, nack.name).as_bytes());
                if let Some(interest) = &nack.interest {
                    buf.put_slice(format!("I {}\n", interest.name).as_bytes());
                }
            }
        }
        Ok(buf.freeze())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Packet> {
        let newline = bytes
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| Error::Wire("missing header line".into()))?;
        let header = std::str::from_utf8(&bytes[..newline])
            .map_err(|_| Error::Wire("header is not UTF-8".into()))?;
        let rest = &bytes[newline + 1..];
        let mut fields = header.split(' ');

        match fields.next() {
            Some("I") => {
                let name = take_name(&mut fields)?;
                expect_end(&mut fields)?;
                expect_empty(rest)?;
                Ok(Packet::Interest(Interest::new(name)))
            }
            Some("C") => {
                let name = take_name(&mut fields)?;
                let len: usize = fields
                    .next()
                    .ok_or_else(|| Error::Wire("content header missing length".into()))?
                    .parse()
                    .map_err(|_| Error::Wire("content length is not a number".into()))?;
                expect_end(&mut fields)?;
                if rest.len() != len {
                    return Err(Error::Wire(format!(
                        "content length mismatch: header says {len}, got {}",
                        rest.len()
                    )));
                }
                Ok(Packet::Content(Content::new(
                    name,
                    Bytes::copy_from_slice(rest),
                )))
            }
            Some("N") => {
                let reason: NackReason = fields
                    .next()
                    .ok_or_else(|| Error::Wire("nack header missing reason".into()))?
                    .parse()?;
                let name = take_name(&mut fields)?;
                expect_end(&mut fields)?;
                let mut nack = Nack::new(name, reason);
                if !rest.is_empty() {
                    match self.decode(rest)? {
                        Packet::Interest(interest) => nack.interest = Some(interest),
                        other => {
                            return Err(Error::Wire(format!(
                                "nack trailer must be an Interest, got {}",
                                other.packet_type()
                            )))
                        }
                    }
                }
                Ok(Packet::Nack(nack))
            }
            Some(other) => Err(Error::Wire(format!("unknown packet tag: {other}"))),
            None => Err(Error::Wire("empty header line".into())),
        }
    }
}

fn take_name<'a>(fields: &mut impl Iterator<Item = &'a str>) -> Result<Name> {
    let text = fields
        .next()
        .ok_or_else(|| Error::Wire("header missing name".into()))?;
    Ok(Name::from_string(text))
}

fn expect_end<'a>(fields: &mut impl Iterator<Item = &'a str>) -> Result<()> {
    match fields.next() {
        None => Ok(()),
        Some(extra) => Err(Error::Wire(format!("trailing header field: {extra}"))),
    }
}

fn expect_empty(rest: &[u8]) -> Result<()> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(Error::Wire("unexpected trailing bytes".into()))
    }
}

/* ---------------------------------------------------------------- *\
 * Bincode codec
\* ---------------------------------------------------------------- */

/// Compact binary codec over the serde representation of [`Packet`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl BincodeCodec {
    pub fn new() -> Self {
        Self
    }
}

impl PacketCodec for BincodeCodec {
    fn encode(&self, packet: &Packet) -> Result<Bytes> {
        let encoded = bincode::serialize(packet).map_err(|e| Error::Wire(e.to_string()))?;
        Ok(Bytes::from(encoded))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Packet> {
        bincode::deserialize(bytes).map_err(|e| Error::Wire(e.to_string()))
    }
}
