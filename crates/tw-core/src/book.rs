//! Shared price book: the latest price per symbol in a memory-mapped region.
//!
//! One process creates the region (normally the PriceRelay), any number of
//! others attach to it by name. All access goes through a single region-wide
//! lock word living inside the mapping, so a reader never observes a slot
//! while a write to it is in flight.
//!
//! # Memory layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ RegionHeader (magic, version, slot_count, slot_size,        │
//! │               owner_pid, created_us, state, lock)           │
//! ├─────────────────────────────────────────────────────────────┤
//! │ PriceSlot[0]: symbol[10] + pad + price f64 + updated_us u64 │
//! │ PriceSlot[1]                                                │
//! │ ...                                                         │
//! │ PriceSlot[N-1]                                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! The creator builds the region in a private temp file and publishes it with
//! `hard_link`, so exactly one process wins creation and nobody sees a
//! half-initialised header. On `close` the creator marks the header
//! `RELEASED` and unlinks the file; attached handles keep a valid mapping but
//! every further access through them fails with
//! [`PipelineError::RegionUnavailable`].

use std::{
    fs::{self, File, OpenOptions},
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU32, Ordering},
};

use ahash::AHashMap;
use memmap2::MmapMut;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::time_util::now_us;
use crate::types::symbol::{SYMBOL_LEN, symbol_from_bytes, symbol_to_bytes, validate_symbols};

const REGION_MAGIC: u64 = u64::from_be_bytes(*b"TWBOOK01");
const LAYOUT_VERSION: u32 = 1;

const STATE_LIVE: u32 = 1;
const STATE_RELEASED: u32 = 2;

const LOCK_FREE: u32 = 0;
const LOCK_HELD: u32 = 1;
const SPINS_BEFORE_YIELD: u32 = 128;

// ---------------------------------------------------------------------------
// Mapped structures
// ---------------------------------------------------------------------------

/// Header at the start of the region.
#[repr(C)]
pub struct RegionHeader {
    pub magic: u64,
    pub version: u32,
    pub slot_count: u32,
    pub slot_size: u32,
    pub owner_pid: u32,
    pub created_us: u64,
    /// `STATE_LIVE` until the creator releases the region.
    pub state: AtomicU32,
    /// Region-wide lock word.
    pub lock: AtomicU32,
}

/// One symbol's entry.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PriceSlot {
    pub symbol: [u8; SYMBOL_LEN],
    _pad: [u8; 6],
    pub price: f64,
    /// Last write time in µs since epoch; 0 = never written.
    pub updated_us: u64,
}

const HEADER_SIZE: usize = std::mem::size_of::<RegionHeader>();
const SLOT_SIZE: usize = std::mem::size_of::<PriceSlot>();

const _: () = assert!(HEADER_SIZE % std::mem::align_of::<PriceSlot>() == 0);

fn region_len(slot_count: usize) -> usize {
    HEADER_SIZE + SLOT_SIZE * slot_count
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// A copied-out book entry.
#[derive(Debug, Clone, PartialEq)]
pub struct BookEntry {
    pub symbol: String,
    pub price: f64,
    pub updated_us: u64,
}

impl BookEntry {
    /// Whether the writer has stored a price in this slot yet.
    pub fn is_set(&self) -> bool {
        self.updated_us != 0
    }
}

/// Point-in-time copy of every slot, in registration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    entries: Vec<BookEntry>,
}

impl Snapshot {
    pub fn entries(&self) -> &[BookEntry] {
        &self.entries
    }

    pub fn get(&self, symbol: &str) -> Option<&BookEntry> {
        self.entries.iter().find(|e| e.symbol == symbol)
    }

    pub fn price(&self, symbol: &str) -> Option<f64> {
        self.get(symbol).map(|e| e.price)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Vec<BookEntry>> for Snapshot {
    fn from(entries: Vec<BookEntry>) -> Self {
        Self { entries }
    }
}

// ---------------------------------------------------------------------------
// SharedPriceBook
// ---------------------------------------------------------------------------

/// Whether a handle may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadWrite,
    ReadOnly,
}

/// Handle to a shared price-book region.
pub struct SharedPriceBook {
    /// Keeps the mapping alive; `base` points into it.
    _mmap: MmapMut,
    base: *mut u8,
    slot_count: usize,
    index: AHashMap<String, usize>,
    symbols: Vec<String>,
    name: String,
    path: PathBuf,
    access: Access,
    owner: bool,
    released: bool,
}

// SAFETY: `base` points into `_mmap`, which lives as long as the handle. Slot
// memory is only touched while holding the in-region lock.
unsafe impl Send for SharedPriceBook {}
unsafe impl Sync for SharedPriceBook {}

/// Default directory for region files.
pub fn default_region_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/dev/shm")
    }
    #[cfg(not(target_os = "linux"))]
    {
        std::env::temp_dir()
    }
}

fn region_path(dir: &Path, name: &str) -> Result<PathBuf, PipelineError> {
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(PipelineError::Config(format!("invalid region name '{name}'")));
    }
    Ok(dir.join(name))
}

fn layout_error(msg: String) -> PipelineError {
    PipelineError::LayoutMismatch(msg)
}

impl SharedPriceBook {
    /// Create the region in the default directory, or attach read-write if
    /// another process already created it.
    pub fn open_or_create(name: &str, symbols: &[String]) -> Result<Self, PipelineError> {
        Self::open_or_create_in(&default_region_dir(), name, symbols)
    }

    /// [`open_or_create`](Self::open_or_create) in an explicit directory.
    pub fn open_or_create_in(dir: &Path, name: &str, symbols: &[String]) -> Result<Self, PipelineError> {
        validate_symbols(symbols).map_err(layout_error)?;
        let path = region_path(dir, name)?;

        // Second pass only after removing a released leftover.
        for _ in 0..2 {
            if let Some(book) = Self::try_create(&path, name, symbols)? {
                return Ok(book);
            }
            match Self::map_existing(&path, name, symbols, Access::ReadWrite) {
                Err(PipelineError::RegionUnavailable(reason)) => {
                    warn!("[book:{name}] existing region unusable ({reason}), recreating");
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                other => return other,
            }
        }
        Err(PipelineError::RegionUnavailable(format!("could not create or attach '{name}'")))
    }

    /// Attach read-only to an existing region in the default directory.
    pub fn attach(name: &str, symbols: &[String]) -> Result<Self, PipelineError> {
        Self::attach_in(&default_region_dir(), name, symbols)
    }

    /// [`attach`](Self::attach) in an explicit directory.
    pub fn attach_in(dir: &Path, name: &str, symbols: &[String]) -> Result<Self, PipelineError> {
        validate_symbols(symbols).map_err(layout_error)?;
        let path = region_path(dir, name)?;
        Self::map_existing(&path, name, symbols, Access::ReadOnly)
    }

    /// Build and publish a new region. `Ok(None)` if one already exists.
    fn try_create(path: &Path, name: &str, symbols: &[String]) -> Result<Option<Self>, PipelineError> {
        if path.exists() {
            return Ok(None);
        }

        let pid = std::process::id();
        let tmp = path.with_file_name(format!(".{name}.{pid}.init"));
        let _ = fs::remove_file(&tmp);

        let file = OpenOptions::new().read(true).write(true).create_new(true).open(&tmp)?;
        let total = region_len(symbols.len());
        file.set_len(total as u64)?;

        // SAFETY: the file was just created by us and sized to `total`.
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let base = mmap.as_mut_ptr();

        // SAFETY: `base` is valid for `total` bytes and zero-filled by set_len.
        unsafe {
            let header = &mut *(base as *mut RegionHeader);
            header.magic = REGION_MAGIC;
            header.version = LAYOUT_VERSION;
            header.slot_count = symbols.len() as u32;
            header.slot_size = SLOT_SIZE as u32;
            header.owner_pid = pid;
            header.created_us = now_us();
            header.lock = AtomicU32::new(LOCK_FREE);
            header.state = AtomicU32::new(STATE_LIVE);

            for (i, sym) in symbols.iter().enumerate() {
                let slot = base.add(HEADER_SIZE + i * SLOT_SIZE) as *mut PriceSlot;
                let symbol = symbol_to_bytes(sym).ok_or_else(|| layout_error(format!("bad symbol '{sym}'")))?;
                std::ptr::write(slot, PriceSlot { symbol, _pad: [0; 6], price: 0.0, updated_us: 0 });
            }
        }

        match fs::hard_link(&tmp, path) {
            Ok(()) => {
                let _ = fs::remove_file(&tmp);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(&tmp);
                debug!("[book:{name}] lost creation race, attaching");
                return Ok(None);
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e.into());
            }
        }

        info!(
            "[book:{name}] created region {}, {} slots, {} bytes",
            path.display(),
            symbols.len(),
            total
        );

        Ok(Some(Self::from_parts(mmap, name, path, symbols, Access::ReadWrite, true)))
    }

    /// Map an existing region and validate its layout against `symbols`.
    fn map_existing(path: &Path, name: &str, symbols: &[String], access: Access) -> Result<Self, PipelineError> {
        let file: File = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(PipelineError::RegionUnavailable(format!("region '{name}' does not exist")));
            }
            Err(e) => return Err(e.into()),
        };

        let expected = region_len(symbols.len());
        let actual = file.metadata()?.len() as usize;
        if actual < HEADER_SIZE {
            return Err(layout_error(format!("region '{name}' is {actual} bytes, smaller than its header")));
        }

        // SAFETY: mapping a regular file we opened read-write.
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let base = mmap.as_mut_ptr();
        // SAFETY: at least HEADER_SIZE bytes are mapped.
        let header = unsafe { &*(base as *const RegionHeader) };

        if header.magic != REGION_MAGIC || header.version != LAYOUT_VERSION {
            return Err(layout_error(format!(
                "region '{name}' has magic {:#x} version {}",
                header.magic, header.version
            )));
        }
        if header.slot_size as usize != SLOT_SIZE {
            return Err(layout_error(format!("slot size {} != {SLOT_SIZE}", header.slot_size)));
        }
        if header.slot_count as usize != symbols.len() || actual != expected {
            return Err(layout_error(format!(
                "region '{name}' holds {} slots ({actual} bytes), expected {} ({expected} bytes)",
                header.slot_count,
                symbols.len()
            )));
        }
        if header.state.load(Ordering::Acquire) != STATE_LIVE {
            return Err(PipelineError::RegionUnavailable(format!("region '{name}' was released by its owner")));
        }

        for (i, sym) in symbols.iter().enumerate() {
            // SAFETY: i < slot_count and the length was checked above.
            let slot = unsafe { &*(base.add(HEADER_SIZE + i * SLOT_SIZE) as *const PriceSlot) };
            let found = symbol_from_bytes(&slot.symbol);
            if found != sym {
                return Err(layout_error(format!("slot {i} holds '{found}', expected '{sym}'")));
            }
        }

        info!(
            "[book:{name}] attached to {} ({:?}, owner pid {})",
            path.display(),
            access,
            header.owner_pid
        );

        Ok(Self::from_parts(mmap, name, path, symbols, access, false))
    }

    fn from_parts(
        mut mmap: MmapMut,
        name: &str,
        path: &Path,
        symbols: &[String],
        access: Access,
        owner: bool,
    ) -> Self {
        let base = mmap.as_mut_ptr();
        let index = symbols.iter().enumerate().map(|(i, s)| (s.clone(), i)).collect();
        Self {
            _mmap: mmap,
            base,
            slot_count: symbols.len(),
            index,
            symbols: symbols.to_vec(),
            name: name.to_string(),
            path: path.to_path_buf(),
            access,
            owner,
            released: false,
        }
    }

    #[inline]
    fn header(&self) -> &RegionHeader {
        // SAFETY: validated at construction; mapping outlives `self`.
        unsafe { &*(self.base as *const RegionHeader) }
    }

    #[inline]
    fn slot_ptr(&self, idx: usize) -> *mut PriceSlot {
        debug_assert!(idx < self.slot_count);
        // SAFETY: idx < slot_count, region length validated at construction.
        unsafe { self.base.add(HEADER_SIZE + idx * SLOT_SIZE) as *mut PriceSlot }
    }

    /// Take the region lock, failing if the owner has released the region.
    fn lock(&self) -> Result<RegionGuard<'_>, PipelineError> {
        let header = self.header();
        let mut spins = 0u32;
        while header
            .lock
            .compare_exchange_weak(LOCK_FREE, LOCK_HELD, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            if spins < SPINS_BEFORE_YIELD {
                std::hint::spin_loop();
                spins += 1;
            } else {
                std::thread::yield_now();
            }
        }
        let guard = RegionGuard { word: &header.lock };
        if header.state.load(Ordering::Acquire) != STATE_LIVE {
            return Err(PipelineError::RegionUnavailable(format!("region '{}' was released by its owner", self.name)));
        }
        Ok(guard)
    }

    fn slot_index(&self, symbol: &str) -> Result<usize, PipelineError> {
        self.index.get(symbol).copied().ok_or_else(|| PipelineError::UnknownSymbol(symbol.to_string()))
    }

    /// Overwrite the price for `symbol`.
    pub fn write(&self, symbol: &str, price: f64) -> Result<(), PipelineError> {
        if self.access == Access::ReadOnly {
            return Err(PipelineError::ReadOnly(self.name.clone()));
        }
        let idx = self.slot_index(symbol)?;
        let stamp = now_us().max(1);
        let _guard = self.lock()?;
        // SAFETY: exclusive access under the region lock.
        unsafe {
            let slot = self.slot_ptr(idx);
            (*slot).price = price;
            (*slot).updated_us = stamp;
        }
        Ok(())
    }

    /// Read one symbol's current price.
    pub fn read(&self, symbol: &str) -> Result<f64, PipelineError> {
        let idx = self.slot_index(symbol)?;
        let _guard = self.lock()?;
        // SAFETY: read under the region lock.
        Ok(unsafe { (*self.slot_ptr(idx)).price })
    }

    /// Copy out every slot under one lock acquisition.
    pub fn read_all(&self) -> Result<Snapshot, PipelineError> {
        let mut raw: Vec<PriceSlot> = Vec::with_capacity(self.slot_count);
        {
            let _guard = self.lock()?;
            for i in 0..self.slot_count {
                // SAFETY: read under the region lock.
                raw.push(unsafe { std::ptr::read(self.slot_ptr(i)) });
            }
        }

        let entries = raw
            .iter()
            .map(|s| BookEntry {
                symbol: symbol_from_bytes(&s.symbol).to_string(),
                price: s.price,
                updated_us: s.updated_us,
            })
            .collect();
        Ok(Snapshot { entries })
    }

    /// Registered symbols, in slot order.
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn access(&self) -> Access {
        self.access
    }

    /// Whether this handle created the region (and will release it).
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Detach; the owner also releases and unlinks the region.
    pub fn close(mut self) -> Result<(), PipelineError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), PipelineError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        if !self.owner {
            debug!("[book:{}] detached", self.name);
            return Ok(());
        }

        {
            let guard = self.lock();
            self.header().state.store(STATE_RELEASED, Ordering::Release);
            drop(guard);
        }

        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!("[book:{}] region released", self.name);
        Ok(())
    }
}

impl Drop for SharedPriceBook {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("[book:{}] release on drop failed: {e}", self.name);
        }
    }
}

/// Releases the region lock on drop.
struct RegionGuard<'a> {
    word: &'a AtomicU32,
}

impl Drop for RegionGuard<'_> {
    fn drop(&mut self) {
        self.word.store(LOCK_FREE, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    use super::*;

    fn symbols() -> Vec<String> {
        ["AAPL", "MSFT", "GOOGL", "AMZN"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn write_then_read_all() {
        let dir = tempfile::tempdir().unwrap();
        let book = SharedPriceBook::open_or_create_in(dir.path(), "wr", &symbols()).unwrap();
        assert!(book.is_owner());

        let snap = book.read_all().unwrap();
        assert_eq!(snap.len(), 4);
        assert!(snap.entries().iter().all(|e| !e.is_set()));

        book.write("MSFT", 310.45).unwrap();
        let snap = book.read_all().unwrap();
        assert_eq!(snap.price("MSFT"), Some(310.45));
        assert!(snap.get("MSFT").unwrap().is_set());
        assert_eq!(snap.price("AAPL"), Some(0.0));
        assert_eq!(book.read("MSFT").unwrap(), 310.45);

        book.write("MSFT", 311.0).unwrap();
        assert_eq!(book.read_all().unwrap().price("MSFT").unwrap(), 311.0);
    }

    #[test]
    fn unknown_symbol_never_creates_a_slot() {
        let dir = tempfile::tempdir().unwrap();
        let book = SharedPriceBook::open_or_create_in(dir.path(), "unk", &symbols()).unwrap();

        assert!(matches!(book.write("TSLA", 1.0), Err(PipelineError::UnknownSymbol(s)) if s == "TSLA"));
        assert!(matches!(book.read("TSLA"), Err(PipelineError::UnknownSymbol(_))));
        let snap = book.read_all().unwrap();
        assert_eq!(snap.len(), 4);
        assert!(snap.get("TSLA").is_none());
    }

    #[test]
    fn attached_reader_sees_writes_and_cannot_write() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SharedPriceBook::open_or_create_in(dir.path(), "rw", &symbols()).unwrap();
        let reader = SharedPriceBook::attach_in(dir.path(), "rw", &symbols()).unwrap();
        assert!(!reader.is_owner());
        assert_eq!(reader.access(), Access::ReadOnly);

        writer.write("AAPL", 150.23).unwrap();
        assert_eq!(reader.read_all().unwrap().price("AAPL"), Some(150.23));
        assert!(matches!(reader.write("AAPL", 1.0), Err(PipelineError::ReadOnly(_))));
    }

    #[test]
    fn second_open_or_create_attaches_as_writer() {
        let dir = tempfile::tempdir().unwrap();
        let first = SharedPriceBook::open_or_create_in(dir.path(), "twice", &symbols()).unwrap();
        let second = SharedPriceBook::open_or_create_in(dir.path(), "twice", &symbols()).unwrap();
        assert!(first.is_owner());
        assert!(!second.is_owner());

        second.write("AMZN", 130.5).unwrap();
        assert_eq!(first.read("AMZN").unwrap(), 130.5);
    }

    #[test]
    fn layout_mismatch_on_attach() {
        let dir = tempfile::tempdir().unwrap();
        let _owner = SharedPriceBook::open_or_create_in(dir.path(), "lm", &symbols()).unwrap();

        let fewer: Vec<String> = symbols().into_iter().take(3).collect();
        assert!(matches!(
            SharedPriceBook::attach_in(dir.path(), "lm", &fewer),
            Err(PipelineError::LayoutMismatch(_))
        ));

        let mut reordered = symbols();
        reordered.swap(0, 1);
        assert!(matches!(
            SharedPriceBook::attach_in(dir.path(), "lm", &reordered),
            Err(PipelineError::LayoutMismatch(_))
        ));
    }

    #[test]
    fn foreign_file_is_layout_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("junk"), vec![7u8; 4096]).unwrap();
        assert!(matches!(
            SharedPriceBook::attach_in(dir.path(), "junk", &symbols()),
            Err(PipelineError::LayoutMismatch(_))
        ));
    }

    #[test]
    fn attach_before_create_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            SharedPriceBook::attach_in(dir.path(), "missing", &symbols()),
            Err(PipelineError::RegionUnavailable(_))
        ));
    }

    #[test]
    fn owner_close_invalidates_readers() {
        let dir = tempfile::tempdir().unwrap();
        let owner = SharedPriceBook::open_or_create_in(dir.path(), "rel", &symbols()).unwrap();
        let reader = SharedPriceBook::attach_in(dir.path(), "rel", &symbols()).unwrap();
        owner.write("GOOGL", 140.0).unwrap();

        owner.close().unwrap();
        assert!(!dir.path().join("rel").exists());
        assert!(matches!(reader.read_all(), Err(PipelineError::RegionUnavailable(_))));

        // A fresh creator can take the name again.
        let again = SharedPriceBook::open_or_create_in(dir.path(), "rel", &symbols()).unwrap();
        assert!(again.is_owner());
        assert_eq!(again.read("GOOGL").unwrap(), 0.0);
    }

    #[test]
    fn reader_close_leaves_region_alive() {
        let dir = tempfile::tempdir().unwrap();
        let owner = SharedPriceBook::open_or_create_in(dir.path(), "det", &symbols()).unwrap();
        let reader = SharedPriceBook::attach_in(dir.path(), "det", &symbols()).unwrap();
        reader.close().unwrap();

        assert!(dir.path().join("det").exists());
        owner.write("AAPL", 1.0).unwrap();
    }

    #[test]
    fn rejects_bad_symbols_and_names() {
        let dir = tempfile::tempdir().unwrap();
        let long = vec!["TOOLONGSYMBOL".to_string()];
        assert!(matches!(
            SharedPriceBook::open_or_create_in(dir.path(), "bad", &long),
            Err(PipelineError::LayoutMismatch(_))
        ));
        assert!(matches!(
            SharedPriceBook::open_or_create_in(dir.path(), "a/b", &symbols()),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn snapshots_never_mix_writes() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Arc::new(SharedPriceBook::open_or_create_in(dir.path(), "atomic", &symbols()).unwrap());
        let reader = Arc::new(SharedPriceBook::attach_in(dir.path(), "atomic", &symbols()).unwrap());
        let done = Arc::new(AtomicBool::new(false));

        // Values whose bit patterns differ in every byte, so a torn read
        // would produce something outside this set.
        let written = [0.0f64, 1.0e-300, -2.5e200, 123456.789, f64::MAX];

        let w = {
            let writer = writer.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                for i in 0..20_000 {
                    writer.write("AAPL", written[1 + i % 4]).unwrap();
                }
                done.store(true, Ordering::Release);
            })
        };

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let reader = reader.clone();
                let done = done.clone();
                std::thread::spawn(move || {
                    while !done.load(Ordering::Acquire) {
                        let p = reader.read_all().unwrap().price("AAPL").unwrap();
                        assert!(written.contains(&p), "torn read: {p}");
                    }
                })
            })
            .collect();

        w.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }

        writer.write("AAPL", 42.0).unwrap();
        assert_eq!(reader.read_all().unwrap().price("AAPL"), Some(42.0));
    }
}
