//! # Backlog and Spill Tests
//!
//! Drives the copy loop with a consumer that refuses to drain until the
//! producer has finished, forcing the live window to grow far past the
//! anonymous-page budget. Checks that the backlog spills to disk, that the
//! drained output is byte-identical anyway, and that every spill file is
//! gone by the end.

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::mpsc;
use std::thread;

use tempfile::tempdir;

use petabuf::{PageStore, Pump, SpillFiles};

const PAGE: usize = 4096;

fn pipe_pair() -> (OwnedFd, OwnedFd) {
    let mut fds = [0i32; 2];

    // SAFETY: pipe writes two fresh descriptors into the array; they are
    // immediately wrapped in OwnedFd, which becomes their sole owner.
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(rc, 0, "pipe(2) failed");

    // SAFETY: as above.
    unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
}

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn test_stalled_consumer_spills_then_drains() {
    let spill_dir = tempdir().unwrap();

    let (in_read, in_write) = pipe_pair();
    let (out_read, out_write) = pipe_pair();

    // far more data than one budgeted page plus both pipes can hold
    let payload = patterned(300 * PAGE + 123);

    let (done_tx, done_rx) = mpsc::channel();

    let writer = thread::spawn({
        let payload = payload.clone();
        move || {
            let mut f = File::from(in_write);
            f.write_all(&payload).unwrap();
            drop(f);
            done_tx.send(()).unwrap();
        }
    });

    // the consumer starts draining only after the producer has pushed
    // everything, so the whole payload must sit in the buffer at once
    let reader = thread::spawn(move || {
        done_rx.recv().unwrap();
        let mut copied = Vec::new();
        File::from(out_read).read_to_end(&mut copied).unwrap();
        copied
    });

    let store =
        PageStore::with_geometry(SpillFiles::new(spill_dir.path()), 1, PAGE, 1024).unwrap();
    let mut pump = Pump::new(store, in_read.as_raw_fd(), out_write.as_raw_fd()).unwrap();
    let pump_stats = pump.run().unwrap();
    let stats = pump.store().stats();

    drop(out_write);
    writer.join().unwrap();
    let copied = reader.join().unwrap();

    assert_eq!(pump_stats.bytes_in, payload.len() as u64);
    assert_eq!(pump_stats.bytes_out, payload.len() as u64);
    assert_eq!(copied, payload);

    // the backlog could not fit in a one-page budget
    assert!(stats.spilled_total > 0, "backlog never spilled: {stats:?}");

    // fully reclaimed: no mappings, no files, budget back
    assert_eq!(stats.nmapped, 0);
    assert_eq!(stats.nondisk, 0);
    assert_eq!(stats.nfree, 1);
    assert_eq!(std::fs::read_dir(spill_dir.path()).unwrap().count(), 0);
}

#[test]
fn test_zero_budget_runs_entirely_from_disk() {
    let spill_dir = tempdir().unwrap();

    let (in_read, in_write) = pipe_pair();
    let (out_read, out_write) = pipe_pair();

    let payload = patterned(10 * PAGE);

    let writer = thread::spawn({
        let payload = payload.clone();
        move || File::from(in_write).write_all(&payload).unwrap()
    });
    let reader = thread::spawn(move || {
        let mut copied = Vec::new();
        File::from(out_read).read_to_end(&mut copied).unwrap();
        copied
    });

    let store =
        PageStore::with_geometry(SpillFiles::new(spill_dir.path()), 0, PAGE, 64).unwrap();
    let mut pump = Pump::new(store, in_read.as_raw_fd(), out_write.as_raw_fd()).unwrap();
    pump.run().unwrap();
    let stats = pump.store().stats();

    drop(out_write);
    writer.join().unwrap();
    let copied = reader.join().unwrap();

    assert_eq!(copied, payload);
    assert!(stats.spilled_total >= 10);
    assert_eq!(stats.nondisk, 0);
    assert_eq!(std::fs::read_dir(spill_dir.path()).unwrap().count(), 0);
}
