//! Persisted calibration records
//!
//! Each record is stored as its own blob under `(kind, device address)`:
//!
//! ```text
//! postcard(Envelope { magic, version, body }) ++ crc32_le
//! ```
//!
//! A blob whose magic, version or checksum does not match is reported as
//! [`RecordError::Corrupt`]; callers treat it like a missing record.

use purrfeed_hal::storage::{BlobStore, RecordKey, RecordKind, StoreError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::autotune::StallThresholds;

/// Magic number identifying a record blob ("PFC1")
pub const RECORD_MAGIC: u32 = 0x5046_4331;

/// Current record format version
pub const RECORD_VERSION: u8 = 1;

/// Largest encoded record
pub const MAX_RECORD_LEN: usize = 32;

/// Default load cell scale factor (raw counts per gram)
pub const DEFAULT_SCALE_FACTOR: f32 = 3145.0;

/// A value that can be persisted as a calibration record
pub trait Record: Serialize + DeserializeOwned {
    const KIND: RecordKind;
}

impl Record for StallThresholds {
    const KIND: RecordKind = RecordKind::StallThresholds;
}

/// Load cell calibration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScaleRecord {
    pub factor: f32,
}

impl Default for ScaleRecord {
    fn default() -> Self {
        Self {
            factor: DEFAULT_SCALE_FACTOR,
        }
    }
}

impl Record for ScaleRecord {
    const KIND: RecordKind = RecordKind::ScaleFactor;
}

/// Record persistence errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecordError {
    Store(StoreError),
    /// Record does not fit the encode buffer
    Encode,
    /// Stored blob failed validation
    Corrupt,
}

impl From<StoreError> for RecordError {
    fn from(err: StoreError) -> Self {
        RecordError::Store(err)
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope<R> {
    magic: u32,
    version: u8,
    body: R,
}

/// Encode a record into `buf`, returning the used prefix
pub fn encode<'a, R: Record + Copy>(record: &R, buf: &'a mut [u8]) -> Result<&'a [u8], RecordError> {
    let envelope = Envelope {
        magic: RECORD_MAGIC,
        version: RECORD_VERSION,
        body: *record,
    };
    let len = postcard::to_slice(&envelope, buf)
        .map_err(|_| RecordError::Encode)?
        .len();
    let crc = crc32(&buf[..len]).to_le_bytes();
    let total = len + crc.len();
    if buf.len() < total {
        return Err(RecordError::Encode);
    }
    buf[len..total].copy_from_slice(&crc);
    Ok(&buf[..total])
}

/// Decode and validate a record blob
pub fn decode<R: Record>(blob: &[u8]) -> Result<R, RecordError> {
    if blob.len() < 4 {
        return Err(RecordError::Corrupt);
    }
    let (payload, crc) = blob.split_at(blob.len() - 4);
    let stored = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
    if stored != crc32(payload) {
        return Err(RecordError::Corrupt);
    }

    let envelope: Envelope<R> = postcard::from_bytes(payload).map_err(|_| RecordError::Corrupt)?;
    if envelope.magic != RECORD_MAGIC || envelope.version != RECORD_VERSION {
        return Err(RecordError::Corrupt);
    }
    Ok(envelope.body)
}

/// Load the record of type `R` for a device
///
/// `Ok(None)` if nothing is stored.
pub fn load<R: Record, B: BlobStore + ?Sized>(store: &mut B, address: u8) -> Result<Option<R>, RecordError> {
    let mut buf = [0u8; MAX_RECORD_LEN];
    let key = RecordKey::new(R::KIND, address);
    match store.load(key, &mut buf)? {
        Some(len) => decode(&buf[..len]).map(Some),
        None => Ok(None),
    }
}

/// Persist a record for a device
pub fn save<R: Record + Copy, B: BlobStore + ?Sized>(
    store: &mut B,
    address: u8,
    record: &R,
) -> Result<(), RecordError> {
    let mut buf = [0u8; MAX_RECORD_LEN];
    let blob = encode(record, &mut buf)?;
    store.save(RecordKey::new(R::KIND, address), blob)?;
    Ok(())
}

/// CRC32 (IEEE 802.3, reflected)
fn crc32(data: &[u8]) -> u32 {
    const POLY: u32 = 0xEDB8_8320;
    let mut crc = 0xFFFF_FFFFu32;

    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }

    !crc
}
