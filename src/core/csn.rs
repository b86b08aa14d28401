//! Change sequence numbers.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::error::{CoreError, InvalidId};

/// Identifier of one replica (server) within a replicated domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(u16);

impl ServerId {
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    pub fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A change sequence number: `(timestamp, sequence number, server id)`.
///
/// Within one replica CSNs follow commit order. Across replicas they are the
/// merge key: timestamp first, then sequence number, then server id.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Csn {
    timestamp_ms: u64,
    seq: u32,
    server_id: ServerId,
}

const CSN_HEX_LEN: usize = 28;

impl Csn {
    pub const fn new(timestamp_ms: u64, seq: u32, server_id: ServerId) -> Self {
        Self {
            timestamp_ms,
            seq,
            server_id,
        }
    }

    pub fn timestamp_ms(self) -> u64 {
        self.timestamp_ms
    }

    pub fn seq(self) -> u32 {
        self.seq
    }

    pub fn server_id(self) -> ServerId {
        self.server_id
    }

    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let invalid = |reason: &str| {
            CoreError::from(InvalidId::Csn {
                raw: raw.to_string(),
                reason: reason.to_string(),
            })
        };
        if raw.len() != CSN_HEX_LEN {
            return Err(invalid("expected 28 hexadecimal digits"));
        }
        if !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid("non-hexadecimal digit"));
        }
        let timestamp_ms =
            u64::from_str_radix(&raw[0..16], 16).map_err(|_| invalid("bad timestamp"))?;
        let server_id =
            u16::from_str_radix(&raw[16..20], 16).map_err(|_| invalid("bad server id"))?;
        let seq = u32::from_str_radix(&raw[20..28], 16).map_err(|_| invalid("bad sequence"))?;
        Ok(Self::new(timestamp_ms, seq, ServerId::new(server_id)))
    }
}

impl Ord for Csn {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp_ms
            .cmp(&other.timestamp_ms)
            .then(self.seq.cmp(&other.seq))
            .then(self.server_id.cmp(&other.server_id))
    }
}

impl PartialOrd for Csn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Csn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:016x}{:04x}{:08x}",
            self.timestamp_ms,
            self.server_id.get(),
            self.seq
        )
    }
}

impl fmt::Debug for Csn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Csn({self})")
    }
}

impl FromStr for Csn {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Csn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Csn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Csn::parse(&raw).map_err(serde::de::Error::custom)
    }
}
