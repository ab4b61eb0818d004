//! ICN packet types.
//!
//! A packet is one of three variants: an Interest requesting named
//! content, a Content object carrying named bytes, or a Nack rejecting an
//! Interest with a reason. Every packet carries a name.

use crate::name::Name;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A request for named content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interest {
    pub name: Name,
}

impl Interest {
    pub fn new(name: Name) -> Self {
        Self { name }
    }
}

/// A response carrying named bytes. The payload is opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub name: Name,
    pub payload: Bytes,
}

impl Content {
    pub fn new(name: Name, payload: impl Into<Bytes>) -> Self {
        Self {
            name,
            payload: payload.into(),
        }
    }
}

/// Reason carried by a [`Nack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NackReason {
    NoContent,
    NoRoute,
    Duplicate,
    CompQueueFull,
    CompParamUnavailable,
    CompException,
}

impl fmt::Display for NackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NackReason::NoContent => "NO_CONTENT",
            NackReason::NoRoute => "NO_ROUTE",
            NackReason::Duplicate => "DUPLICATE",
            NackReason::CompQueueFull => "COMP_QUEUE_FULL",
            NackReason::CompParamUnavailable => "COMP_PARAM_UNAVAILABLE",
            NackReason::CompException => "COMP_EXCEPTION",
        };
        f.write_str(s)
    }
}

impl FromStr for NackReason {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NO_CONTENT" => Ok(NackReason::NoContent),
            "NO_ROUTE" => Ok(NackReason::NoRoute),
            "DUPLICATE" => Ok(NackReason::Duplicate),
            "COMP_QUEUE_FULL" => Ok(NackReason::CompQueueFull),
            "COMP_PARAM_UNAVAILABLE" => Ok(NackReason::CompParamUnavailable),
            "COMP_EXCEPTION" => Ok(NackReason::CompException),
            other => Err(crate::Error::Packet(format!(
                "unknown nack reason: {other}"
            ))),
        }
    }
}

/// A negative acknowledgment, optionally carrying the Interest it answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nack {
    pub name: Name,
    pub reason: NackReason,
    pub interest: Option<Interest>,
}

impl Nack {
    pub fn new(name: Name, reason: NackReason) -> Self {
        Self {
            name,
            reason,
            interest: None,
        }
    }

    pub fn with_interest(mut self, interest: Interest) -> Self {
        self.interest = Some(interest);
        self
    }
}

/// An ICN packet that can cross a face.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Packet {
    Interest(Interest),
    Content(Content),
    Nack(Nack),
}

impl Packet {
    /// The name carried by the packet, whatever the variant.
    pub fn name(&self) -> &Name {
        match self {
            Packet::Interest(interest) => &interest.name,
            Packet::Content(content) => &content.name,
            Packet::Nack(nack) => &nack.name,
        }
    }

    /// The variant as a string, for logging.
    pub fn packet_type(&self) -> &'static str {
        match self {
            Packet::Interest(_) => "Interest",
            Packet::Content(_) => "Content",
            Packet::Nack(_) => "Nack",
        }
    }
}

impl From<Interest> for Packet {
    fn from(interest: Interest) -> Self {
        Packet::Interest(interest)
    }
}

impl From<Content> for Packet {
    fn from(content: Content) -> Self {
        Packet::Content(content)
    }
}

impl From<Nack> for Packet {
    fn from(nack: Nack) -> Self {
        Packet::Nack(nack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_name_accessor() {
        let name = Name::from_string("/a/b");
        let packet: Packet = Interest::new(name.clone()).into();
        assert_eq!(packet.name(), &name);
        assert_eq!(packet.packet_type(), "Interest");

        let packet: Packet = Content::new(name.clone(), "payload").into();
        assert_eq!(packet.name(), &name);

        let packet: Packet = Nack::new(name.clone(), NackReason::NoRoute).into();
        assert_eq!(packet.name(), &name);
        assert_eq!(packet.packet_type(), "Nack");
    }

    #[test]
    fn nack_reason_text_round_trip() {
        for reason in [
            NackReason::NoContent,
            NackReason::NoRoute,
            NackReason::Duplicate,
            NackReason::CompQueueFull,
            NackReason::CompParamUnavailable,
            NackReason::CompException,
        ] {
            assert_eq!(reason.to_string().parse::<NackReason>().unwrap(), reason);
        }
        assert!("BOGUS".parse::<NackReason>().is_err());
    }

    #[test]
    fn nack_preserves_interest() {
        let interest = Interest::new(Name::from_string("/x"));
        let nack = Nack::new(interest.name.clone(), NackReason::Duplicate)
            .with_interest(interest.clone());
        assert_eq!(nack.interest.as_ref().unwrap(), &interest);
    }
}
