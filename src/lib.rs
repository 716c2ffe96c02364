//! # petabuf - Elastic Pipeline Buffer
//!
//! petabuf stands between two processes in a Unix pipeline and decouples
//! their throughput: it accepts an arbitrarily large byte stream on stdin
//! and re-emits it verbatim on stdout, absorbing up to roughly one petabyte
//! of in-flight backlog by spilling to local disk once a memory budget is
//! exhausted.
//!
//! ```bash
//! producer | petabuf | consumer
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │        Binary (argument rejection,       │
//! │         startup wiring, exit codes)      │
//! ├──────────────────────────────────────────┤
//! │        Copy Loop (pump::Pump)            │
//! │   poll-driven, read side then write side │
//! ├──────────────────────────────────────────┤
//! │     Page Manager (storage::PageStore)    │
//! │  pin / unpin / free, counters, headroom  │
//! ├────────────────────┬─────────────────────┤
//! │  Anonymous pages   │  Spill files (mmap) │
//! │  (memory budget)   │  storage::SpillFiles│
//! └────────────────────┴─────────────────────┘
//! ```
//!
//! The buffer is a single-reader, single-writer FIFO over a virtual array
//! of 16 MiB pages. Each page is independently anonymous memory, a mapped
//! spill file, or unmapped-but-on-disk; the page manager's three-way state
//! machine promotes pages to disk once half of physical memory is in use,
//! and reclaims each page deterministically once it has been drained.
//!
//! Everything is single-threaded. The copy loop owns the page store and
//! both cursors; the only blocking point is `poll(2)` on stdin/stdout.
//!
//! ## Memory Pressure
//!
//! Running out of budget is normal operation (fresh pages are simply
//! created on disk). An actual ENOMEM from the allocator permanently
//! disables the anonymous path and surrenders a 64 MiB headroom reserve so
//! the file-backed fallback has kernel-side room; it is the one system
//! error that is not fatal.

pub mod config;
pub mod memory;
pub mod pump;
pub mod storage;

pub use pump::{Pump, PumpStats};
pub use storage::{PageAddr, PageStore, SpillFiles, StoreStats};
