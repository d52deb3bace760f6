//! Thin wrappers over `poll(2)`.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

pub(crate) use libc::pollfd as PollFd;

/// Readiness interest for property descriptors and the wake socket.
pub(crate) const READ_EVENTS: libc::c_short = libc::POLLIN | libc::POLLPRI;

const ERROR_EVENTS: libc::c_short = libc::POLLERR | libc::POLLHUP | libc::POLLNVAL;

pub(crate) fn poll_fd(fd: RawFd, events: libc::c_short) -> PollFd {
    PollFd {
        fd,
        events,
        revents: 0,
    }
}

fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(t) => {
            // Round up so a 0.4ms deadline does not become a busy loop
            let ms = t.as_micros().div_ceil(1000);
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

/// Waits until one of `fds` is ready or `timeout` elapses.
///
/// Returns the number of ready descriptors. An interrupted wait counts as
/// zero ready descriptors.
pub(crate) fn wait(fds: &mut [PollFd], timeout: Option<Duration>) -> io::Result<usize> {
    // SAFETY: `fds` is a valid, exclusively borrowed slice of pollfd structs
    // and its length is passed as nfds.
    let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms(timeout)) };
    if rc >= 0 {
        return Ok(rc as usize);
    }
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::Interrupted {
        Ok(0)
    } else {
        Err(err)
    }
}

/// Checks a descriptor for error or hangup without asking for data.
///
/// Blocks for at most `timeout`. A failing `poll` counts as an error
/// condition, an interrupted one does not.
pub(crate) fn has_error_condition(fd: RawFd, timeout: Duration) -> bool {
    let mut fds = [poll_fd(fd, 0)];
    match wait(&mut fds, Some(timeout)) {
        Ok(0) => false,
        Ok(_) => fds[0].revents & ERROR_EVENTS != 0,
        Err(_) => true,
    }
}
