//! # Physical Memory Probe and Headroom Reserve
//!
//! Two small concerns that exist only to size and protect the anonymous-page
//! budget:
//!
//! - [`total_memory`] asks the OS for the host's total physical memory. It is
//!   consulted exactly once per process (cached in a `OnceLock`) and its
//!   result is advisory: it sizes the budget of anonymous pages and is
//!   reported on stderr at startup.
//! - [`Headroom`] is a single anonymous mapping held for no purpose other
//!   than being released when the first allocation failure is observed, so
//!   that the file-backed mapping replacing the failed anonymous one has
//!   kernel-side room to allocate its own bookkeeping. Once released it is
//!   never reacquired.

use std::sync::OnceLock;

use eyre::{ensure, Result, WrapErr};
use memmap2::{MmapMut, MmapOptions};
use sysinfo::System;

static SYSTEM_TOTAL_MEMORY: OnceLock<u64> = OnceLock::new();

/// Total physical memory of the host, in bytes.
///
/// A probe reporting zero bytes is fatal; there is no fallback default.
pub fn total_memory() -> Result<u64> {
    let total = *SYSTEM_TOTAL_MEMORY.get_or_init(|| {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.total_memory()
    });

    ensure!(total > 0, "memory probe reported zero bytes of physical memory");

    Ok(total)
}

/// Number of anonymous pages the budget allows for a host with `memsize`
/// bytes of physical memory.
pub fn budget_pages(memsize: u64, page_size: usize) -> usize {
    (memsize as usize / page_size) / crate::config::MEM_BUDGET_DIVISOR
}

/// A dedicated allocation retained solely to be surrendered on the first
/// memory-pressure event.
#[derive(Debug)]
pub struct Headroom {
    reserve: Option<MmapMut>,
}

impl Headroom {
    /// Acquires the reserve. The mapping is never touched, so on overcommit
    /// platforms it costs address space and kernel bookkeeping only.
    pub fn reserve(len: usize) -> Result<Self> {
        let reserve = MmapOptions::new()
            .len(len)
            .map_anon()
            .wrap_err_with(|| format!("failed to reserve {} bytes of headroom", len))?;

        Ok(Self {
            reserve: Some(reserve),
        })
    }

    /// Releases the reserve. Returns `true` the first time, `false` once the
    /// reserve is already gone.
    pub fn release(&mut self) -> bool {
        self.reserve.take().is_some()
    }

    pub fn is_held(&self) -> bool {
        self.reserve.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_memory_reports_nonzero() {
        let total = total_memory().unwrap();
        assert!(total > 0);
    }

    #[test]
    fn test_budget_is_half_of_memory_in_pages() {
        assert_eq!(budget_pages(64 << 24, 1 << 24), 32);
        assert_eq!(budget_pages(4 << 24, 1 << 24), 2);
    }

    #[test]
    fn test_budget_rounds_down() {
        assert_eq!(budget_pages((1 << 24) - 1, 1 << 24), 0);
        assert_eq!(budget_pages(3 << 24, 1 << 24), 1);
    }

    #[test]
    fn test_headroom_released_once() {
        let mut headroom = Headroom::reserve(4096).unwrap();
        assert!(headroom.is_held());

        assert!(headroom.release());
        assert!(!headroom.is_held());
        assert!(!headroom.release());
    }
}
