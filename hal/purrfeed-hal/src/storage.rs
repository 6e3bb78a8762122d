//! Keyed blob storage abstractions
//!
//! The feeder core persists a handful of calibration scalars per device.
//! Storage mechanics (flash layout, wear levelling, file systems) live
//! behind [`BlobStore`]; the core only asks for "the blob of this kind for
//! this device address".

use heapless::Vec;

/// Kinds of persisted records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum RecordKind {
    /// Operating and homing stall thresholds of one axis
    StallThresholds = 0,
    /// Load cell scale factor
    ScaleFactor = 1,
}

impl RecordKind {
    /// Get the kind as a byte value
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Create a kind from a byte value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RecordKind::StallThresholds),
            1 => Some(RecordKind::ScaleFactor),
            _ => None,
        }
    }
}

/// Storage key: record kind plus the device address it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RecordKey {
    pub kind: RecordKind,
    pub address: u8,
}

impl RecordKey {
    pub const fn new(kind: RecordKind, address: u8) -> Self {
        Self { kind, address }
    }

    /// Two-byte wire form: `[kind, address]`
    pub fn to_bytes(self) -> [u8; 2] {
        [self.kind.as_u8(), self.address]
    }

    pub fn from_bytes(bytes: [u8; 2]) -> Option<Self> {
        RecordKind::from_u8(bytes[0]).map(|kind| Self::new(kind, bytes[1]))
    }
}

/// Errors from blob storage operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    /// Backing store could not be mounted or accessed
    Unavailable,
    /// Buffer too small for the stored blob
    BufferTooSmall,
    /// No room left for another record
    Full,
}

/// Keyed blob store
///
/// A missing record is `Ok(None)`, not an error: callers fall back to a
/// built-in default.
pub trait BlobStore {
    /// Read the blob stored under `key` into `buffer`
    ///
    /// # Returns
    /// The number of bytes read, `None` if nothing is stored under `key`.
    fn load(&mut self, key: RecordKey, buffer: &mut [u8]) -> Result<Option<usize>, StoreError>;

    /// Replace the blob stored under `key`
    fn save(&mut self, key: RecordKey, blob: &[u8]) -> Result<(), StoreError>;
}

impl<T: BlobStore + ?Sized> BlobStore for &mut T {
    fn load(&mut self, key: RecordKey, buffer: &mut [u8]) -> Result<Option<usize>, StoreError> {
        (**self).load(key, buffer)
    }

    fn save(&mut self, key: RecordKey, blob: &[u8]) -> Result<(), StoreError> {
        (**self).save(key, blob)
    }
}

/// Volatile in-RAM blob store
///
/// Holds up to `SLOTS` records of at most `BLOB` bytes. Useful on boards
/// without a configured flash partition, and as a test double.
#[derive(Debug, Default)]
pub struct RamStore<const SLOTS: usize, const BLOB: usize> {
    records: Vec<(RecordKey, Vec<u8, BLOB>), SLOTS>,
    writes: u32,
    offline: bool,
}

impl<const SLOTS: usize, const BLOB: usize> RamStore<SLOTS, BLOB> {
    pub const fn new() -> Self {
        Self {
            records: Vec::new(),
            writes: 0,
            offline: false,
        }
    }

    /// Simulate an unmounted backing store
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    /// Number of successful saves since creation
    pub fn write_count(&self) -> u32 {
        self.writes
    }

    pub fn contains(&self, key: RecordKey) -> bool {
        self.records.iter().any(|(k, _)| *k == key)
    }
}

impl<const SLOTS: usize, const BLOB: usize> BlobStore for RamStore<SLOTS, BLOB> {
    fn load(&mut self, key: RecordKey, buffer: &mut [u8]) -> Result<Option<usize>, StoreError> {
        if self.offline {
            return Err(StoreError::Unavailable);
        }
        let Some((_, blob)) = self.records.iter().find(|(k, _)| *k == key) else {
            return Ok(None);
        };
        if blob.len() > buffer.len() {
            return Err(StoreError::BufferTooSmall);
        }
        buffer[..blob.len()].copy_from_slice(blob);
        Ok(Some(blob.len()))
    }

    fn save(&mut self, key: RecordKey, blob: &[u8]) -> Result<(), StoreError> {
        if self.offline {
            return Err(StoreError::Unavailable);
        }
        let data = Vec::from_slice(blob).map_err(|_| StoreError::BufferTooSmall)?;

        if let Some(slot) = self.records.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = data;
        } else {
            self.records.push((key, data)).map_err(|_| StoreError::Full)?;
        }
        self.writes = self.writes.wrapping_add(1);
        Ok(())
    }
}
