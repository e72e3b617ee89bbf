//! Bounded readiness waits on a single descriptor.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Readiness condition to wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interest {
    Readable,
    Writable,
}

/// Block until `fd` is ready for `interest` or `timeout` elapses.
///
/// Returns `Ok(false)` on timeout. Error and hang-up conditions count as
/// ready so the following I/O call surfaces the actual error.
pub(crate) fn wait_ready(fd: RawFd, interest: Interest, timeout: Option<Duration>) -> io::Result<bool> {
    let events = match interest {
        Interest::Readable => libc::POLLIN,
        Interest::Writable => libc::POLLOUT,
    };
    let timeout_ms = timeout_ms(timeout);
    let mut pollfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };

    loop {
        // SAFETY: `pollfd` is a valid, initialised entry and nfds is exactly 1.
        let rc = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        match rc {
            -1 => {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            0 => return Ok(false),
            _ => return Ok(true),
        }
    }
}

/// `poll(2)` timeout argument. Partial milliseconds round up so a short
/// non-zero wait never turns into a non-blocking check; `None` is -1.
fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        Some(duration) => {
            let millis = duration.as_nanos().div_ceil(1_000_000);
            millis.min(libc::c_int::MAX as u128) as libc::c_int
        }
        None => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn partial_milliseconds_round_up() {
        assert_eq!(timeout_ms(Some(Duration::from_micros(500))), 1);
        assert_eq!(timeout_ms(Some(Duration::from_nanos(1))), 1);
        assert_eq!(timeout_ms(Some(Duration::from_micros(1500))), 2);
        assert_eq!(timeout_ms(Some(Duration::from_millis(20))), 20);
        assert_eq!(timeout_ms(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_ms(None), -1);
        assert_eq!(timeout_ms(Some(Duration::MAX)), libc::c_int::MAX);
    }

    #[test]
    fn sub_millisecond_wait_still_blocks() {
        let (a, _b) = UnixStream::pair().unwrap();
        let started = std::time::Instant::now();
        let ready = wait_ready(a.as_raw_fd(), Interest::Readable, Some(Duration::from_micros(300))).unwrap();
        assert!(!ready);
        assert!(started.elapsed() >= Duration::from_micros(300));
    }

    #[test]
    fn times_out_when_nothing_to_read() {
        let (a, _b) = UnixStream::pair().unwrap();
        let ready = wait_ready(a.as_raw_fd(), Interest::Readable, Some(Duration::from_millis(20))).unwrap();
        assert!(!ready);
    }

    #[test]
    fn ready_once_peer_writes() {
        let (a, mut b) = UnixStream::pair().unwrap();
        b.write_all(b"x").unwrap();
        let ready = wait_ready(a.as_raw_fd(), Interest::Readable, Some(Duration::from_secs(1))).unwrap();
        assert!(ready);
    }

    #[test]
    fn fresh_socket_is_writable() {
        let (a, _b) = UnixStream::pair().unwrap();
        assert!(wait_ready(a.as_raw_fd(), Interest::Writable, None).unwrap());
    }
}
