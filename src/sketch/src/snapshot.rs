//! Framing of embedded sketch snapshots.
//!
//! Snapshot's header: | magic number(4B) | VERSION(1B) | kind(1B) |
//! followed by a kind specific payload.

use bytes::{Buf, BufMut};

use crate::error::{Result, SketchError};

/// MAGIC_NUMBER is written as the first 4 bytes of every snapshot.
const MAGIC_NUMBER: u32 = 0x5044_5331;

/// VERSION indicates the version of the snapshot format.
const VERSION: u8 = 1;

/// size in bytes of the snapshot header
pub const HEADER_SIZE: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SnapshotKind {
    BloomFilter = 1,
    HyperLogLog = 2,
}

impl SnapshotKind {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(SnapshotKind::BloomFilter),
            2 => Some(SnapshotKind::HyperLogLog),
            _ => None,
        }
    }
}

/// encode frames `payload` as a snapshot of `kind`.
pub fn encode(kind: SnapshotKind, payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(HEADER_SIZE + payload.len());
    data.put_u32(MAGIC_NUMBER);
    data.put_u8(VERSION);
    data.put_u8(kind as u8);
    data.extend_from_slice(payload);
    data
}

/// decode checks the header of `data` and returns the payload.
pub fn decode(expected: SnapshotKind, data: &[u8]) -> Result<&[u8]> {
    let mut buf = data;
    if buf.remaining() < HEADER_SIZE {
        return Err(SketchError::Deserialization(format!(
            "snapshot too short: {} bytes",
            data.len()
        )));
    }

    let magic = buf.get_u32();
    if magic != MAGIC_NUMBER {
        return Err(SketchError::Deserialization(format!(
            "bad snapshot magic number {:#x}",
            magic
        )));
    }

    let version = buf.get_u8();
    if version != VERSION {
        return Err(SketchError::Deserialization(format!(
            "unsupported snapshot version {}",
            version
        )));
    }

    let kind = buf.get_u8();
    match SnapshotKind::from_u8(kind) {
        Some(kind) if kind == expected => Ok(buf),
        Some(kind) => Err(SketchError::Deserialization(format!(
            "snapshot holds a {:?}, expected a {:?}",
            kind, expected
        ))),
        None => Err(SketchError::Deserialization(format!(
            "unknown snapshot kind {}",
            kind
        ))),
    }
}
