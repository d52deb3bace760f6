//! Self-pipe that interrupts the registry's `poll` wait when requests arrive.

use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use tracing::trace;

/// Sending side, shared by all registry handles.
#[derive(Debug)]
pub(crate) struct Waker {
    stream: UnixStream,
}

/// Receiving side, owned by the registry thread.
#[derive(Debug)]
pub(crate) struct WakeReceiver {
    stream: UnixStream,
}

pub(crate) fn wake_pair() -> io::Result<(Waker, WakeReceiver)> {
    let (tx, rx) = UnixStream::pair()?;
    tx.set_nonblocking(true)?;
    rx.set_nonblocking(true)?;
    Ok((Waker { stream: tx }, WakeReceiver { stream: rx }))
}

impl Waker {
    pub fn wake(&self) {
        match (&self.stream).write(&[1]) {
            Ok(_) => {}
            // Socket buffer full: a wakeup is already pending
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => trace!(%err, "wake write failed"),
        }
    }
}

impl WakeReceiver {
    /// Discards pending wakeups.
    pub fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            match (&self.stream).read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }
}

impl AsRawFd for WakeReceiver {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::{self, poll_fd, READ_EVENTS};
    use std::time::Duration;

    #[test]
    fn test_wake_makes_receiver_ready_until_drained() {
        let (waker, receiver) = wake_pair().unwrap();
        let mut fds = [poll_fd(receiver.as_raw_fd(), READ_EVENTS)];
        assert_eq!(poll::wait(&mut fds, Some(Duration::ZERO)).unwrap(), 0);

        waker.wake();
        waker.wake();
        assert_eq!(poll::wait(&mut fds, Some(Duration::ZERO)).unwrap(), 1);

        receiver.drain();
        fds[0].revents = 0;
        assert_eq!(poll::wait(&mut fds, Some(Duration::ZERO)).unwrap(), 0);
    }
}
