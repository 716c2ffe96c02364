//! # Readiness-Driven Copy Loop
//!
//! `Pump` drives bytes from a non-blocking input descriptor through the
//! page store to a non-blocking output descriptor. It is strictly
//! single-threaded: the only suspension point is the `poll(2)` wait on
//! whichever sides currently have work.
//!
//! ## Cursors
//!
//! Two page addresses partition the buffer:
//!
//! ```text
//!            wpos                     rpos
//!             │                        │
//!   drained   v      in flight         v    unwritten
//!   ─────────┤██████████████████████████├─────────────>
//!             └── next byte to output   └── next byte from input
//! ```
//!
//! Both cursors only ever advance. The page under `rpos` is pinned until it
//! fills; the page under `wpos` is pinned until it drains, then freed. A
//! read-side rollover unpins the completed page (demoting it to its spill
//! file if it has one) unless the write cursor still sits on it, in which
//! case its mapping must stay valid and unpinning is deferred to the write
//! side's advance.
//!
//! ## One Iteration
//!
//! 1. `ntoread` = room left in the read page; zero permanently once
//!    end-of-input has been seen.
//! 2. `ntowrite` = bytes between the cursors within the write page.
//! 3. Both zero: the buffer is drained, stop.
//! 4. Block until a side with a non-zero count is ready.
//! 5. Handle the read, then the write. The order matters when both cursors
//!    share a page: the writable span is recomputed after the read, so bytes
//!    landed this iteration are drained in the same iteration.
//!
//! Partial transfers are the norm; the OS picks the chunk size and only the
//! page offset advances.

mod nonblock;

use std::os::fd::RawFd;

use eyre::{ensure, Result, WrapErr};

use crate::storage::{PageAddr, PageStore};

/// Byte totals for one completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// The copy loop. Owns the page store and both cursors exclusively.
///
/// The descriptors are borrowed, not owned: the caller keeps them open for
/// the lifetime of the pump and closes them afterwards.
#[derive(Debug)]
pub struct Pump {
    store: PageStore,
    input: RawFd,
    output: RawFd,
    rpos: PageAddr,
    wpos: PageAddr,
    input_open: bool,
    stats: PumpStats,
}

impl Pump {
    /// Places both descriptors in non-blocking mode and pins page 0.
    pub fn new(mut store: PageStore, input: RawFd, output: RawFd) -> Result<Self> {
        nonblock::set_nonblocking(input).wrap_err("failed to set input non-blocking")?;
        nonblock::set_nonblocking(output).wrap_err("failed to set output non-blocking")?;

        store.pin(0)?;

        Ok(Self {
            store,
            input,
            output,
            rpos: PageAddr::default(),
            wpos: PageAddr::default(),
            input_open: true,
            stats: PumpStats::default(),
        })
    }

    pub fn store(&self) -> &PageStore {
        &self.store
    }

    pub fn stats(&self) -> PumpStats {
        self.stats
    }

    /// Copies until end-of-input has been seen and every buffered byte has
    /// been written out, then releases the final page.
    pub fn run(&mut self) -> Result<PumpStats> {
        loop {
            let ntoread = self.readable_span();
            let ntowrite = self.writable_span();

            if ntoread == 0 && ntowrite == 0 {
                break;
            }

            let ready = nonblock::wait_ready(
                (ntoread > 0).then_some(self.input),
                (ntowrite > 0).then_some(self.output),
            )
            .wrap_err("failed to wait for descriptor readiness")?;

            // Read before write: when both cursors share a page, bytes that
            // land here widen the span the write below sees.
            if ready.input {
                self.fill()?;
            }
            if ready.output {
                self.drain()?;
            }
        }

        self.release_final_page()?;

        Ok(self.stats)
    }

    /// Room left in the page under `rpos`; zero forever after end-of-input.
    fn readable_span(&self) -> usize {
        if !self.input_open {
            return 0;
        }
        self.store.page_size() - self.rpos.off as usize
    }

    /// Bytes drainable from the page under `wpos`: the whole rest of the
    /// page while the read cursor is ahead of it, otherwise the gap between
    /// the offsets.
    fn writable_span(&self) -> usize {
        if self.wpos.idx < self.rpos.idx {
            self.store.page_size() - self.wpos.off as usize
        } else {
            (self.rpos.off - self.wpos.off) as usize
        }
    }

    fn fill(&mut self) -> Result<()> {
        let buf = self.store.page_mut(self.rpos)?;
        let n = match nonblock::read_fd(self.input, buf).wrap_err("failed to read from input")? {
            None => return Ok(()), // readiness was stale
            Some(0) => {
                eprintln!("end of input");
                self.input_open = false;
                return Ok(());
            }
            Some(n) => n,
        };

        self.stats.bytes_in += n as u64;
        self.rpos.off += n as u32;

        if self.rpos.off as usize == self.store.page_size() {
            // The write side may still be draining this page; its mapping
            // must stay valid, so unpin only once the cursors differ.
            if self.rpos.idx != self.wpos.idx {
                self.store.unpin(self.rpos.idx);
            }

            ensure!(
                self.rpos.idx + 1 < self.store.table_size(),
                "page table exhausted after {} pages",
                self.store.table_size()
            );

            self.rpos.idx += 1;
            self.store.pin(self.rpos.idx)?;
            self.rpos.off = 0;

            eprintln!("rpos={}, wpos={}", self.rpos, self.wpos);
        }

        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        let ntowrite = self.writable_span();
        if ntowrite == 0 {
            return Ok(());
        }

        let page = self.store.page(self.wpos)?;
        let n = match nonblock::write_fd(self.output, &page[..ntowrite])
            .wrap_err("failed to write to output")?
        {
            None => return Ok(()), // readiness was stale
            Some(n) => n,
        };

        self.stats.bytes_out += n as u64;
        self.wpos.off += n as u32;

        if self.wpos.off as usize == self.store.page_size() {
            self.store.unpin(self.wpos.idx);
            self.store.free(self.wpos.idx)?;

            self.wpos.idx += 1;
            self.store.pin(self.wpos.idx)?;
            self.wpos.off = 0;

            eprintln!("rpos={}, wpos={}", self.rpos, self.wpos);
        }

        Ok(())
    }

    /// At clean exit both cursors sit on the same, fully-drained page.
    /// Releasing it empties the table and unlinks a spilled final page's
    /// file.
    fn release_final_page(&mut self) -> Result<()> {
        debug_assert_eq!(self.wpos.idx, self.rpos.idx);
        debug_assert_eq!(self.wpos.off, self.rpos.off);

        self.store.unpin(self.wpos.idx);
        self.store.free(self.wpos.idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SpillFiles;
    use std::io::{Read, Seek, Write};
    use std::os::fd::AsRawFd;
    use tempfile::{tempdir, tempfile, NamedTempFile};

    const PAGE: usize = 4096;

    fn small_store(dir: &std::path::Path, budget: usize) -> PageStore {
        PageStore::with_geometry(SpillFiles::new(dir), budget, PAGE, 64).unwrap()
    }

    fn run_through(input_bytes: &[u8], budget: usize) -> (Vec<u8>, PumpStats, crate::storage::StoreStats) {
        let spill_dir = tempdir().unwrap();

        let mut input = NamedTempFile::new().unwrap();
        input.write_all(input_bytes).unwrap();
        input.rewind().unwrap();

        let mut output = tempfile().unwrap();

        let store = small_store(spill_dir.path(), budget);
        let mut pump = Pump::new(store, input.as_file().as_raw_fd(), output.as_raw_fd()).unwrap();
        let stats = pump.run().unwrap();
        let store_stats = pump.store().stats();

        let mut copied = Vec::new();
        output.rewind().unwrap();
        output.read_to_end(&mut copied).unwrap();

        assert_eq!(std::fs::read_dir(spill_dir.path()).unwrap().count(), 0);

        (copied, stats, store_stats)
    }

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_empty_input_exits_immediately() {
        let (out, stats, store_stats) = run_through(b"", 4);

        assert!(out.is_empty());
        assert_eq!(stats, PumpStats { bytes_in: 0, bytes_out: 0 });
        assert_eq!(store_stats.nmapped, 0);
        assert_eq!(store_stats.nfree, 4);
    }

    #[test]
    fn test_passthrough_small_input() {
        let (out, stats, store_stats) = run_through(b"hello world", 4);

        assert_eq!(out, b"hello world");
        assert_eq!(stats.bytes_in, 11);
        assert_eq!(stats.bytes_out, 11);
        // slot 0 was the only slot touched and is vacant again
        assert_eq!(store_stats.nmapped, 0);
        assert_eq!(store_stats.nondisk, 0);
        assert_eq!(store_stats.spilled_total, 0);
    }

    #[test]
    fn test_two_page_burst() {
        let input = patterned(PAGE + 5);
        let (out, stats, store_stats) = run_through(&input, 4);

        assert_eq!(out, input);
        assert_eq!(stats.bytes_out, (PAGE + 5) as u64);
        assert_eq!(store_stats.nmapped, 0);
        assert_eq!(store_stats.nfree, 4);
    }

    #[test]
    fn test_exact_page_multiple() {
        let input = patterned(3 * PAGE);
        let (out, _, store_stats) = run_through(&input, 4);

        assert_eq!(out, input);
        assert_eq!(store_stats.nmapped, 0);
        assert_eq!(store_stats.nondisk, 0);
    }

    #[test]
    fn test_spills_when_budget_is_tiny() {
        // file input and output are always poll-ready, so the loop drains as
        // it reads and the window stays narrow; a zero budget still forces
        // every page through the spill path
        let input = patterned(2 * PAGE + 100);
        let (out, _, store_stats) = run_through(&input, 0);

        assert_eq!(out, input);
        assert!(store_stats.spilled_total >= 3);
        assert_eq!(store_stats.nondisk, 0);
        assert_eq!(store_stats.nmapped, 0);
    }

    #[test]
    fn test_release_final_page_returns_budget() {
        let (_, _, store_stats) = run_through(&patterned(PAGE / 2), 2);

        assert_eq!(store_stats.nfree, 2);
    }
}
