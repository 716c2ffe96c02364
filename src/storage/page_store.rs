//! # Page Table and State Machine
//!
//! `PageStore` owns the sparse page table, the per-slot mapped/on-disk state
//! machine, and the process-wide counters. It is the only component that
//! creates, maps, unmaps, and unlinks page storage.
//!
//! ## Counters
//!
//! | Counter   | Meaning                                                  |
//! |-----------|----------------------------------------------------------|
//! | `nmapped` | slots whose bytes are currently addressable              |
//! | `nondisk` | slots with a spill file backing them                     |
//! | `nfree`   | remaining budget of anonymous pages                      |
//!
//! `nfree` starts at half of physical memory in pages. It is returned when
//! an anonymous page is freed, except after the first ENOMEM: from that
//! point the budget is clamped to zero for the rest of the run and every
//! fresh page is created on disk. The clamp also surrenders the headroom
//! reserve so the file-backed mapping that replaces the failed anonymous
//! one has kernel-side room to succeed.
//!
//! ## Geometry
//!
//! The store carries its own `page_size`/`table_size` so tests can exercise
//! the state machine with small pages; production code always constructs it
//! with the defaults from [`crate::config`].

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;

use eyre::{bail, ensure, Result, WrapErr};
use hashbrown::HashMap;
use memmap2::{MmapMut, MmapOptions};

use crate::config::{HEADROOM_PAGES, PAGE_SIZE, TABLE_SIZE};
use crate::memory::Headroom;

use super::SpillFiles;

/// Address of a byte in the virtual buffer: page index plus offset within
/// the page. A value type; ordering is linear byte order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct PageAddr {
    pub idx: u32,
    pub off: u32,
}

impl PageAddr {
    pub fn new(idx: u32, off: u32) -> Self {
        Self { idx, off }
    }
}

impl fmt::Display for PageAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.idx, self.off)
    }
}

/// Snapshot of the store's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub nmapped: usize,
    pub nondisk: usize,
    pub nfree: usize,
    /// Pages ever created on disk, monotonic.
    pub spilled_total: u64,
}

impl fmt::Display for StoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "nmapped={},nondisk={},nfree={},spilled_total={}",
            self.nmapped, self.nondisk, self.nfree, self.spilled_total
        )
    }
}

#[derive(Debug, Default)]
struct Slot {
    /// Present iff the page's bytes are addressable.
    map: Option<MmapMut>,
    /// A spill file backs this page.
    on_disk: bool,
}

#[derive(Debug)]
pub struct PageStore {
    slots: HashMap<u32, Slot>,
    spill: SpillFiles,
    headroom: Headroom,
    page_size: usize,
    table_size: u32,
    nmapped: usize,
    nondisk: usize,
    nfree: usize,
    /// Set on the first ENOMEM; one-way. While set, freed anonymous pages do
    /// not return budget to `nfree`.
    mem_pressure: bool,
    spilled_total: u64,
}

impl PageStore {
    /// Store with production geometry: 16 MiB pages, 2^26 slots.
    pub fn new(spill: SpillFiles, budget_pages: usize) -> Result<Self> {
        Self::with_geometry(spill, budget_pages, PAGE_SIZE, TABLE_SIZE)
    }

    pub fn with_geometry(
        spill: SpillFiles,
        budget_pages: usize,
        page_size: usize,
        table_size: u32,
    ) -> Result<Self> {
        ensure!(page_size > 0, "page size must be non-zero");
        ensure!(table_size > 0, "table size must be non-zero");

        let headroom = Headroom::reserve(HEADROOM_PAGES * page_size)?;

        Ok(Self {
            slots: HashMap::new(),
            spill,
            headroom,
            page_size,
            table_size,
            nmapped: 0,
            nondisk: 0,
            nfree: budget_pages,
            mem_pressure: false,
            spilled_total: 0,
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn table_size(&self) -> u32 {
        self.table_size
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            nmapped: self.nmapped,
            nondisk: self.nondisk,
            nfree: self.nfree,
            spilled_total: self.spilled_total,
        }
    }

    pub fn is_mapped(&self, idx: u32) -> bool {
        self.state(idx).0
    }

    pub fn is_on_disk(&self, idx: u32) -> bool {
        self.state(idx).1
    }

    /// Ensures the page at `idx` is mapped.
    ///
    /// A fresh slot becomes an anonymous page while budget remains, and a
    /// file-backed one otherwise. An already-spilled slot is re-materialised
    /// from its file. ENOMEM on the anonymous attempt permanently disables
    /// the anonymous path and falls through to on-disk creation; every other
    /// failure propagates.
    pub fn pin(&mut self, idx: u32) -> Result<()> {
        ensure!(
            idx < self.table_size,
            "page index {} out of range (table holds {} slots)",
            idx,
            self.table_size
        );

        let (mapped, on_disk) = self.state(idx);
        if mapped {
            return Ok(());
        }

        if on_disk {
            let map = self.remap_spilled(idx)?;
            self.slots.entry(idx).or_default().map = Some(map);
            self.nmapped += 1;
        } else if self.nfree > 0 {
            match MmapOptions::new().len(self.page_size).map_anon() {
                Ok(map) => {
                    self.slots.entry(idx).or_default().map = Some(map);
                    self.nmapped += 1;
                    self.nfree -= 1;
                }
                Err(e) if e.raw_os_error() == Some(libc::ENOMEM) => {
                    self.note_memory_pressure();
                    self.create_spilled(idx)?;
                }
                Err(e) => {
                    return Err(e).wrap_err_with(|| {
                        format!("failed to map an anonymous page for slot {}", idx)
                    });
                }
            }
        } else {
            self.create_spilled(idx)?;
        }

        self.log_counters();
        Ok(())
    }

    /// Surrenders the in-memory mapping of a file-backed page.
    ///
    /// An anonymous page is left resident: it has no on-disk copy to
    /// re-materialise from. Unmapped or untouched slots are a no-op.
    pub fn unpin(&mut self, idx: u32) {
        let Some(slot) = self.slots.get_mut(&idx) else {
            return;
        };

        if slot.on_disk && slot.map.is_some() {
            slot.map = None;
            self.nmapped -= 1;
            self.log_counters();
        }
    }

    /// Releases the slot permanently: the spill file is unlinked, or the
    /// anonymous mapping is dropped and its budget returned. The slot leaves
    /// the table; the cursors never revisit a freed index.
    pub fn free(&mut self, idx: u32) -> Result<()> {
        let (mapped, on_disk) = self.state(idx);

        if on_disk {
            ensure!(
                !mapped,
                "freeing page {} while it is still mapped; unpin it first",
                idx
            );

            let path = self.spill.path(idx);
            fs::remove_file(&path)
                .wrap_err_with(|| format!("failed to unlink spill file '{}'", path.display()))?;

            self.slots.remove(&idx);
            self.nondisk -= 1;
        } else if mapped {
            self.slots.remove(&idx);
            self.nmapped -= 1;
            if !self.mem_pressure {
                self.nfree += 1;
            }
        } else {
            return Ok(());
        }

        self.log_counters();
        Ok(())
    }

    /// Bytes of the page at `addr`, from the offset to the end of the page.
    pub fn page(&self, addr: PageAddr) -> Result<&[u8]> {
        self.check_addr(addr)?;

        match self.slots.get(&addr.idx).and_then(|s| s.map.as_ref()) {
            Some(map) => Ok(&map[addr.off as usize..]),
            None => bail!("page {} is not mapped", addr.idx),
        }
    }

    pub fn page_mut(&mut self, addr: PageAddr) -> Result<&mut [u8]> {
        self.check_addr(addr)?;

        match self.slots.get_mut(&addr.idx).and_then(|s| s.map.as_mut()) {
            Some(map) => Ok(&mut map[addr.off as usize..]),
            None => bail!("page {} is not mapped", addr.idx),
        }
    }

    fn check_addr(&self, addr: PageAddr) -> Result<()> {
        ensure!(
            addr.idx < self.table_size,
            "page index {} out of range (table holds {} slots)",
            addr.idx,
            self.table_size
        );
        ensure!(
            (addr.off as usize) < self.page_size,
            "offset {} out of page bounds ({})",
            addr.off,
            self.page_size
        );
        Ok(())
    }

    fn state(&self, idx: u32) -> (bool, bool) {
        self.slots
            .get(&idx)
            .map(|s| (s.map.is_some(), s.on_disk))
            .unwrap_or((false, false))
    }

    /// First ENOMEM: clamp the budget for the rest of the run and surrender
    /// the headroom reserve so the on-disk fallback can allocate.
    fn note_memory_pressure(&mut self) {
        eprintln!("out of memory, disabling anonymous pages");
        self.mem_pressure = true;
        self.nfree = 0;

        if self.headroom.release() {
            eprintln!("released headroom reserve");
        }
    }

    /// Creates the spill file for `idx`, grows it to one page, and maps it
    /// shared.
    fn create_spilled(&mut self, idx: u32) -> Result<()> {
        let path = self.spill.path(idx);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)
            .wrap_err_with(|| format!("failed to create spill file '{}'", path.display()))?;

        file.set_len(self.page_size as u64)
            .wrap_err_with(|| format!("failed to grow '{}' to {} bytes", path.display(), self.page_size))?;

        let map = self.map_shared(&file, &path)?;

        let slot = self.slots.entry(idx).or_default();
        slot.map = Some(map);
        slot.on_disk = true;
        self.nmapped += 1;
        self.nondisk += 1;
        self.spilled_total += 1;

        Ok(())
    }

    /// Re-materialises an unmapped on-disk page by mapping its existing
    /// spill file.
    fn remap_spilled(&self, idx: u32) -> Result<MmapMut> {
        let path = self.spill.path(idx);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to open spill file '{}'", path.display()))?;

        self.map_shared(&file, &path)
    }

    fn map_shared(&self, file: &File, path: &std::path::Path) -> Result<MmapMut> {
        // SAFETY: MmapMut::map_mut is unsafe because memory-mapped files can
        // be modified externally. This is safe because:
        // 1. The spill file name embeds this process's pid; no other process
        //    writes it.
        // 2. The file was sized to exactly page_size before mapping, and all
        //    access goes through page()/page_mut() which bounds-check.
        // 3. The mapping's lifetime is tied to the slot, which drops it on
        //    unpin/free before the file is unlinked.
        let map = unsafe {
            MmapOptions::new()
                .len(self.page_size)
                .map_mut(file)
                .wrap_err_with(|| format!("failed to map spill file '{}'", path.display()))?
        };

        // The descriptor closes when `file` drops; the mapping survives it.
        Ok(map)
    }

    fn log_counters(&self) {
        let gib = |pages: usize| (pages * self.page_size) >> 30;

        eprintln!(
            "nmapped={} ({} GiB), nondisk={} ({} GiB), nfree={} ({} GiB)",
            self.nmapped,
            gib(self.nmapped),
            self.nondisk,
            gib(self.nondisk),
            self.nfree,
            gib(self.nfree),
        );
    }
}
