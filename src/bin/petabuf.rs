//! # petabuf Entry Point
//!
//! Wires stdin and stdout into the copy loop. The executable takes no
//! options and no positional arguments; anything on the command line is
//! rejected with a usage line and exit status 1.

use std::env;
use std::io::{stdin, stdout};
use std::os::fd::AsRawFd;

use eyre::Result;

use petabuf::config::{DEFAULT_SPILL_DIR, PAGE_SIZE};
use petabuf::{memory, PageStore, Pump, SpillFiles};

fn main() {
    if env::args().len() > 1 {
        eprintln!("usage: ... | petabuf | ...");
        std::process::exit(1);
    }

    if let Err(e) = run() {
        eprintln!("petabuf: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let memsize = memory::total_memory()?;
    let budget = memory::budget_pages(memsize, PAGE_SIZE);

    eprintln!(
        "system reports {} bytes ({} GiB) of memory, using up to half",
        memsize,
        memsize >> 30
    );

    let store = PageStore::new(SpillFiles::new(DEFAULT_SPILL_DIR), budget)?;
    let mut pump = Pump::new(store, stdin().as_raw_fd(), stdout().as_raw_fd())?;

    let stats = pump.run()?;

    eprintln!(
        "done, {} bytes in, {} bytes out",
        stats.bytes_in, stats.bytes_out
    );

    Ok(())
}
