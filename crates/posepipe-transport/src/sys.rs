use std::io::ErrorKind;
use std::os::fd::RawFd;
use std::time::Duration;

/// Poll a descriptor for readability.
///
/// Sub-millisecond timeouts round up to 1 ms; `poll(2)` has no finer unit.
/// An interrupted poll reports "not ready" rather than an error so callers on
/// the tick path simply try again next tick.
pub(crate) fn wait_readable(fd: RawFd, timeout: Duration) -> std::io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    let mut millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    if millis == 0 && !timeout.is_zero() {
        millis = 1;
    }

    // SAFETY: `pfd` is a valid pollfd for the duration of the call and the
    // count matches the single entry passed.
    let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    if rc == 0 {
        return Ok(false);
    }
    Ok(pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0)
}

/// Non-blocking, non-consuming end-of-stream check.
pub(crate) fn peer_closed(fd: RawFd) -> bool {
    let mut byte = 0u8;
    // SAFETY: `byte` is a valid one-byte buffer; MSG_PEEK leaves the data in
    // the socket and MSG_DONTWAIT keeps the call from blocking.
    let rc = unsafe {
        libc::recv(
            fd,
            (&mut byte as *mut u8).cast::<libc::c_void>(),
            1,
            libc::MSG_PEEK | libc::MSG_DONTWAIT,
        )
    };
    match rc {
        0 => true,
        n if n > 0 => false,
        _ => {
            let err = std::io::Error::last_os_error();
            !matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted)
        }
    }
}
