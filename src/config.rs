//! # Configuration Constants
//!
//! This module centralizes the geometry of the virtual buffer. The constants
//! are interdependent; compile-time assertions below keep derived values from
//! drifting when one of them is changed.
//!
//! ## Geometry
//!
//! ```text
//! PAGE_SIZE (16 MiB)
//!       │
//!       ├─> TABLE_SIZE (2^26 slots)
//!       │     PAGE_SIZE * TABLE_SIZE = 2^50 bytes ≈ 1 PiB of addressable
//!       │     backlog. A page index always fits in a u32.
//!       │
//!       └─> HEADROOM_PAGES (4)
//!             The headroom reserve is HEADROOM_PAGES * PAGE_SIZE bytes of
//!             anonymous memory, surrendered on the first allocation failure
//!             so the file-backed fallback has kernel-side room to succeed.
//! ```
//!
//! ## Memory Budget
//!
//! The number of anonymous in-memory pages is capped at half of physical
//! memory: `memsize / PAGE_SIZE / MEM_BUDGET_DIVISOR`. The budget only
//! bounds page creation; it is returned when anonymous pages are freed.

/// Size of each buffer page in bytes (16 MiB).
/// This is the unit of mapping, spilling, and reclamation.
pub const PAGE_SIZE: usize = 1 << 24;

/// Number of addressable page slots (2^26).
pub const TABLE_SIZE: u32 = 1 << 26;

/// Headroom reserve size, in pages.
pub const HEADROOM_PAGES: usize = 4;

/// Fraction of physical memory granted to anonymous pages (1/2).
pub const MEM_BUDGET_DIVISOR: usize = 2;

/// Directory under which spill files are created.
///
/// Deliberately a fixed path rather than `std::env::temp_dir()`: the
/// environment is not consulted anywhere in the process.
pub const DEFAULT_SPILL_DIR: &str = "/tmp";

const _: () = assert!(
    (PAGE_SIZE as u64) * (TABLE_SIZE as u64) == 1 << 50,
    "page geometry must address exactly 2^50 bytes"
);

const _: () = assert!(
    PAGE_SIZE.is_power_of_two(),
    "PAGE_SIZE must be a power of two"
);

const _: () = assert!(
    PAGE_SIZE <= u32::MAX as usize,
    "page offsets must fit in a u32"
);
