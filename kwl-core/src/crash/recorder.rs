//! Boot-time crash bookkeeping.

use super::storage::{self, CrashStorage, LayoutError, StorageError, image_len};
use super::{CRASH_LOG_CAPACITY, CrashLog, CrashRecord, FaultSource};

/// Largest ring a recorder accepts.
pub const MAX_RING_CAPACITY: usize = 16;
/// Bounds the on-stack image buffer.
const MAX_IMAGE_LEN: usize = image_len(MAX_RING_CAPACITY);

/// What happened to the crash ring during [`CrashRecorder::boot`].
#[derive(Debug)]
pub struct BootReport<E> {
    /// Record appended for the reset that preceded this boot.
    pub appended: Option<CrashRecord>,
    /// Set when the stored image was unusable and the ring was cleared.
    pub migrated: Option<LayoutError>,
    /// First storage failure; the in-memory ring stays authoritative.
    pub storage: Result<(), StorageError<E>>,
}

impl<E> BootReport<E> {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.appended.is_none() && self.migrated.is_none() && self.storage.is_ok()
    }
}

/// Owns the crash ring and its backing storage.
pub struct CrashRecorder<S, const N: usize = CRASH_LOG_CAPACITY> {
    storage: S,
    log: CrashLog<N>,
}

impl<S: CrashStorage, const N: usize> CrashRecorder<S, N> {
    #[must_use]
    pub const fn new(storage: S) -> Self {
        const {
            assert!(
                N <= MAX_RING_CAPACITY,
                "crash ring exceeds MAX_RING_CAPACITY"
            );
        }
        Self {
            storage,
            log: CrashLog::new(),
        }
    }

    /// Loads the persisted ring and records the fault behind the last reset.
    ///
    /// The fault source is read once; a snapshot that was read is never
    /// recorded twice even if persisting it fails.
    pub fn boot<F>(&mut self, mut source: F) -> BootReport<S::Error>
    where
        F: FaultSource,
    {
        let mut report = BootReport {
            appended: None,
            migrated: None,
            storage: Ok(()),
        };

        let mut needs_store = false;
        match self.load() {
            Ok(Ok(log)) => self.log = log,
            Ok(Err(layout)) => {
                self.log.clear();
                report.migrated = Some(layout);
                needs_store = true;
            }
            Err(err) => {
                self.log.clear();
                report.storage = Err(err);
            }
        }

        if let Some(fault) = source.read_last_fault() {
            let record = CrashRecord::from_fault(fault);
            self.log.push(record);
            report.appended = Some(record);
            needs_store = true;
        }

        if needs_store {
            let stored = self.persist();
            if report.storage.is_ok() {
                report.storage = stored;
            }
        }
        report
    }

    /// Clears every record and persists the empty ring.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the empty ring could not be stored.
    pub fn reset_all(&mut self) -> Result<(), StorageError<S::Error>> {
        self.log.clear();
        self.persist()
    }

    #[must_use]
    pub const fn records(&self) -> &CrashLog<N> {
        &self.log
    }

    #[must_use]
    pub fn has_crash(&self) -> bool {
        self.log.has_crash()
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    fn load(&mut self) -> Result<Result<CrashLog<N>, LayoutError>, StorageError<S::Error>> {
        let mut buf = [0u8; MAX_IMAGE_LEN];
        let Some(image) = buf.get_mut(..image_len(N)) else {
            return Ok(Err(LayoutError::BufferTooSmall {
                needed: image_len(N),
            }));
        };
        self.storage.load(image).map_err(StorageError::Read)?;
        Ok(storage::decode(image))
    }

    fn persist(&mut self) -> Result<(), StorageError<S::Error>> {
        let mut buf = [0u8; MAX_IMAGE_LEN];
        let len = storage::encode(&self.log, &mut buf).map_err(StorageError::Layout)?;
        self.storage.store(&buf[..len]).map_err(StorageError::Write)
    }
}
