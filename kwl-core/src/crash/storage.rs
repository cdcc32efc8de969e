//! Non-volatile image of the crash ring.
//!
//! Layout, little endian:
//!
//! | offset | size | field |
//! |--------|------|-------|
//! | 0 | 2 | magic `"KC"` |
//! | 2 | 1 | layout version |
//! | 3 | 1 | capacity |
//! | 4 | 1 | record count |
//! | 5 | 3 | reserved, zero |
//! | 8 | 12 * capacity | records, oldest first |
//!
//! Each record is `uptime_ms: u32`, `real_time: u32` and the packed
//! `pc:18 | sp:14` location. The image is padded to a multiple of eight bytes
//! so it can be programmed in double words. Changing the capacity requires a
//! new [`CRASH_LAYOUT_VERSION`].

use core::fmt;

use super::{CRASH_LOG_CAPACITY, CrashLog, CrashRecord};

/// Version of the on-flash layout.
pub const CRASH_LAYOUT_VERSION: u8 = 1;

/// Byte offset of the crash image inside the configuration area.
pub const CRASH_LOG_OFFSET: usize = 0xC0;

const MAGIC: [u8; 2] = *b"KC";
const HEADER_LEN: usize = 8;
const RECORD_LEN: usize = 12;
const ERASED: u8 = 0xFF;

/// Size of the persisted image for a ring of `capacity` records.
#[must_use]
pub const fn image_len(capacity: usize) -> usize {
    (HEADER_LEN + capacity * RECORD_LEN + 7) & !7
}

/// Image size for the default ring.
pub const CRASH_IMAGE_LEN: usize = image_len(CRASH_LOG_CAPACITY);

/// Reasons a stored image cannot be used as-is.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LayoutError {
    BufferTooSmall { needed: usize },
    /// The area was never written.
    Erased,
    BadMagic,
    VersionMismatch { found: u8 },
    CapacityMismatch { found: u8 },
    CountOutOfRange { count: u8 },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::BufferTooSmall { needed } => {
                write!(f, "crash image needs {needed} bytes")
            }
            LayoutError::Erased => f.write_str("crash area erased"),
            LayoutError::BadMagic => f.write_str("crash area holds foreign data"),
            LayoutError::VersionMismatch { found } => {
                write!(f, "crash layout version {found}, expected {CRASH_LAYOUT_VERSION}")
            }
            LayoutError::CapacityMismatch { found } => {
                write!(f, "crash ring capacity {found} does not match")
            }
            LayoutError::CountOutOfRange { count } => {
                write!(f, "crash record count {count} out of range")
            }
        }
    }
}

/// Serialises `log` into `buf`, returning the image length.
///
/// # Errors
///
/// Returns [`LayoutError::BufferTooSmall`] if `buf` cannot hold the image.
pub fn encode<const N: usize>(log: &CrashLog<N>, buf: &mut [u8]) -> Result<usize, LayoutError> {
    let needed = image_len(N);
    let (Ok(capacity), Ok(count)) = (u8::try_from(N), u8::try_from(log.len())) else {
        return Err(LayoutError::CapacityMismatch { found: u8::MAX });
    };
    let image = buf
        .get_mut(..needed)
        .ok_or(LayoutError::BufferTooSmall { needed })?;

    image.fill(0);
    image[..2].copy_from_slice(&MAGIC);
    image[2] = CRASH_LAYOUT_VERSION;
    image[3] = capacity;
    image[4] = count;

    for (record, chunk) in log
        .iter()
        .zip(image[HEADER_LEN..].chunks_exact_mut(RECORD_LEN))
    {
        chunk[0..4].copy_from_slice(&record.uptime_ms.to_le_bytes());
        chunk[4..8].copy_from_slice(&record.real_time.to_le_bytes());
        chunk[8..12].copy_from_slice(&record.packed_location().to_le_bytes());
    }

    Ok(needed)
}

/// Rebuilds a ring from a stored image.
///
/// # Errors
///
/// Any [`LayoutError`] means the image must be migrated to an empty ring.
pub fn decode<const N: usize>(buf: &[u8]) -> Result<CrashLog<N>, LayoutError> {
    let needed = image_len(N);
    let image = buf
        .get(..needed)
        .ok_or(LayoutError::BufferTooSmall { needed })?;

    if image[..HEADER_LEN].iter().all(|byte| *byte == ERASED) {
        return Err(LayoutError::Erased);
    }
    if image[..2] != MAGIC {
        return Err(LayoutError::BadMagic);
    }
    if image[2] != CRASH_LAYOUT_VERSION {
        return Err(LayoutError::VersionMismatch { found: image[2] });
    }
    if usize::from(image[3]) != N {
        return Err(LayoutError::CapacityMismatch { found: image[3] });
    }
    let count = image[4];
    if usize::from(count) > N {
        return Err(LayoutError::CountOutOfRange { count });
    }

    let mut log = CrashLog::new();
    for chunk in image[HEADER_LEN..]
        .chunks_exact(RECORD_LEN)
        .take(usize::from(count))
    {
        log.push(CrashRecord::from_packed(
            read_u32(&chunk[0..4]),
            read_u32(&chunk[4..8]),
            read_u32(&chunk[8..12]),
        ));
    }
    Ok(log)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    u32::from_le_bytes(raw)
}

/// Byte-addressed persistence for the crash image.
pub trait CrashStorage {
    type Error;

    /// Fills `buf` from the start of the crash area.
    fn load(&mut self, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Replaces the crash area with `data`.
    fn store(&mut self, data: &[u8]) -> Result<(), Self::Error>;
}

impl<S> CrashStorage for &mut S
where
    S: CrashStorage + ?Sized,
{
    type Error = S::Error;

    fn load(&mut self, buf: &mut [u8]) -> Result<(), Self::Error> {
        (**self).load(buf)
    }

    fn store(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        (**self).store(data)
    }
}

/// Storage failure while reading or persisting the ring.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StorageError<E> {
    Read(E),
    Write(E),
    /// The ring could not be serialised; nothing was written.
    Layout(LayoutError),
}

impl<E> StorageError<E> {
    /// Maps the inner error type.
    pub fn map_other<F, M>(self, mapper: M) -> StorageError<F>
    where
        M: FnOnce(E) -> F,
    {
        match self {
            StorageError::Read(err) => StorageError::Read(mapper(err)),
            StorageError::Write(err) => StorageError::Write(mapper(err)),
            StorageError::Layout(err) => StorageError::Layout(err),
        }
    }
}

impl<E: fmt::Debug> fmt::Display for StorageError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Read(err) => write!(f, "crash storage read failed: {err:?}"),
            StorageError::Write(err) => write!(f, "crash storage write failed: {err:?}"),
            StorageError::Layout(err) => write!(f, "crash image not written: {err}"),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MemoryStorageError {
    OutOfBounds,
    /// Injected by [`MemoryStorage::fail_writes`].
    WriteRejected,
}

/// RAM-backed configuration area for tests and the emulator.
///
/// Starts erased (`0xFF`) like fresh flash. The crash image lives at
/// [`CRASH_LOG_OFFSET`].
#[derive(Clone, Debug)]
pub struct MemoryStorage<const N: usize> {
    bytes: [u8; N],
    writes: u32,
    fail_writes: bool,
}

impl<const N: usize> MemoryStorage<N> {
    #[must_use]
    pub const fn erased() -> Self {
        Self {
            bytes: [ERASED; N],
            writes: 0,
            fail_writes: false,
        }
    }

    /// Raw view of the whole configuration area.
    #[must_use]
    pub const fn bytes(&self) -> &[u8; N] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8; N] {
        &mut self.bytes
    }

    /// Number of successful stores.
    #[must_use]
    pub const fn writes(&self) -> u32 {
        self.writes
    }

    /// Makes every following store fail until switched off.
    pub fn fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    fn area(&self, len: usize) -> Result<core::ops::Range<usize>, MemoryStorageError> {
        let end = CRASH_LOG_OFFSET + len;
        if end > N {
            Err(MemoryStorageError::OutOfBounds)
        } else {
            Ok(CRASH_LOG_OFFSET..end)
        }
    }
}

impl<const N: usize> Default for MemoryStorage<N> {
    fn default() -> Self {
        Self::erased()
    }
}

impl<const N: usize> CrashStorage for MemoryStorage<N> {
    type Error = MemoryStorageError;

    fn load(&mut self, buf: &mut [u8]) -> Result<(), Self::Error> {
        let range = self.area(buf.len())?;
        buf.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn store(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        if self.fail_writes {
            return Err(MemoryStorageError::WriteRejected);
        }
        let range = self.area(data.len())?;
        self.bytes[range].copy_from_slice(data);
        self.writes += 1;
        Ok(())
    }
}
