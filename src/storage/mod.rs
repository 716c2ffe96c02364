//! # Storage Layer
//!
//! This module implements the paged elastic FIFO's storage: a sparse table of
//! fixed-size pages, each independently backed by anonymous memory or by a
//! memory-mapped spill file, together with the factory that names those spill
//! files.
//!
//! ## Page Lifecycle
//!
//! Each page slot carries two independent facts: whether it is currently
//! *mapped* (its bytes are addressable) and whether it is *on disk* (a spill
//! file backs it). That yields four states:
//!
//! ```text
//!                 pin, budget available
//!        {} ───────────────────────────> {MAPPED}            (anonymous)
//!        │                                   │
//!        │ pin, budget exhausted             │ free
//!        │ or ENOMEM                         v
//!        │                                  {}                (budget returned)
//!        v
//!   {MAPPED,ONDISK} <─────────────────── {ONDISK}
//!        │              pin (remap)          ^
//!        │                                   │
//!        └───────────────────────────────────┘
//!                     unpin (unmap)
//!
//!   {ONDISK} ── free (unlink) ──> {}
//! ```
//!
//! Anonymous pages have no second copy of their contents, so `unpin` leaves
//! them resident; only file-backed pages can be cheaply re-materialised and
//! therefore unmapped while still live.
//!
//! ## Sparse Table
//!
//! The table addresses 2^26 slots but the live window is a short contiguous
//! index range, so slots live in a `hashbrown::HashMap` keyed by index:
//! constant-time lookup, and a slot that is freed simply leaves the map. The
//! cursors only ever advance, so a freed index is never revisited.
//!
//! ## Module Organization
//!
//! - `spill`: spill-file naming (`SpillFiles`)
//! - `page_store`: the page table, state machine, and counters (`PageStore`)
//!
//! ## Thread Safety
//!
//! `PageStore` is single-owner by design. The copy loop owns it exclusively;
//! there is no interior locking.

mod page_store;
mod spill;

pub use page_store::{PageAddr, PageStore, StoreStats};
pub use spill::SpillFiles;
