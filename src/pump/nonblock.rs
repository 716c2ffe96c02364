//! # Non-Blocking Descriptor Plumbing
//!
//! Thin wrappers over `fcntl`, `poll`, `read`, and `write` for the copy
//! loop. All of them recover errno through `std::io::Error::last_os_error`
//! and retry `EINTR` internally; `EAGAIN`/`EWOULDBLOCK` on a transfer is
//! reported as `None` so the caller can fall back to the readiness wait.

use std::io;
use std::os::fd::RawFd;

use eyre::Result;

pub(crate) struct Readiness {
    pub input: bool,
    pub output: bool,
}

/// Adds `O_NONBLOCK` to the descriptor's status flags.
pub(crate) fn set_nonblocking(fd: RawFd) -> Result<()> {
    // SAFETY: fcntl with F_GETFL/F_SETFL only reads and writes the status
    // flags of a descriptor this process owns; no memory is passed in.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags == -1 {
        return Err(io::Error::last_os_error().into());
    }

    // SAFETY: as above.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc == -1 {
        return Err(io::Error::last_os_error().into());
    }

    Ok(())
}

/// Blocks until at least one of the given descriptors is ready: `input`
/// for reading, `output` for writing. Either side may be absent; passing
/// neither would block forever, so the caller never does.
pub(crate) fn wait_ready(input: Option<RawFd>, output: Option<RawFd>) -> Result<Readiness> {
    let mut fds = [libc::pollfd {
        fd: -1,
        events: 0,
        revents: 0,
    }; 2];
    let mut nfds = 0;

    let input_at = input.map(|fd| {
        fds[nfds].fd = fd;
        fds[nfds].events = libc::POLLIN;
        nfds += 1;
        nfds - 1
    });
    let output_at = output.map(|fd| {
        fds[nfds].fd = fd;
        fds[nfds].events = libc::POLLOUT;
        nfds += 1;
        nfds - 1
    });

    loop {
        // SAFETY: `fds` holds `nfds` initialized entries owned by this
        // frame; poll writes only their `revents` fields. A negative
        // timeout blocks indefinitely, which is the contract here.
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), nfds as libc::nfds_t, -1) };
        if rc == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(err.into());
        }
        break;
    }

    // POLLERR/POLLHUP also count as ready: the subsequent transfer will
    // surface the condition as an error or end-of-stream.
    Ok(Readiness {
        input: input_at.is_some_and(|i| fds[i].revents != 0),
        output: output_at.is_some_and(|i| fds[i].revents != 0),
    })
}

/// Reads up to `buf.len()` bytes. `Ok(None)` means the descriptor was not
/// actually ready; `Ok(Some(0))` is end-of-stream.
pub(crate) fn read_fd(fd: RawFd, buf: &mut [u8]) -> Result<Option<usize>> {
    loop {
        // SAFETY: the pointer and length come from a valid exclusive slice;
        // read writes at most `buf.len()` bytes into it.
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n >= 0 {
            return Ok(Some(n as usize));
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EINTR => continue,
            Some(code) if code == libc::EAGAIN || code == libc::EWOULDBLOCK => {
                return Ok(None);
            }
            _ => return Err(err.into()),
        }
    }
}

/// Writes up to `buf.len()` bytes. `Ok(None)` means the descriptor was not
/// actually ready.
pub(crate) fn write_fd(fd: RawFd, buf: &[u8]) -> Result<Option<usize>> {
    loop {
        // SAFETY: the pointer and length come from a valid slice; write
        // only reads from it.
        let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
        if n >= 0 {
            return Ok(Some(n as usize));
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EINTR => continue,
            Some(code) if code == libc::EAGAIN || code == libc::EWOULDBLOCK => {
                return Ok(None);
            }
            _ => return Err(err.into()),
        }
    }
}
