//! Thin `libc` wrappers for the descriptor plumbing the bridge needs.

use std::io::{self, Write};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

/// Create a pipe; both ends are close-on-exec. Returns `(read, write)`.
pub(crate) fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [libc::c_int; 2] = [-1; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: pipe(2) succeeded, so both descriptors are open and ours.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    set_cloexec(read.as_raw_fd())?;
    set_cloexec(write.as_raw_fd())?;
    Ok((read, write))
}

fn set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Put `fd` into non-blocking mode.
pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Return `true` if `fd` names an open descriptor.
pub(crate) fn is_open(fd: RawFd) -> bool {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    flags != -1
}

/// Duplicate a descriptor we do not own (e.g. a stdio slot).
pub(crate) fn duplicate(fd: RawFd) -> io::Result<OwnedFd> {
    if !is_open(fd) {
        return Err(io::Error::from_raw_os_error(libc::EBADF));
    }
    // SAFETY: checked open above; the borrow ends before this returns.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    borrowed.try_clone_to_owned()
}

/// Make `target` refer to the same open file as `src` (dup2), retrying on
/// `EINTR`.
pub(crate) fn redirect(src: BorrowedFd<'_>, target: RawFd) -> io::Result<()> {
    loop {
        if unsafe { libc::dup2(src.as_raw_fd(), target) } != -1 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Flush Rust's stdout buffer and every C stdio stream so nothing written
/// before a descriptor switch lands on the wrong side of it.
pub(crate) fn flush_stdio() {
    let _ = io::stdout().flush();
    unsafe {
        libc::fflush(std::ptr::null_mut());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Read;
    use std::os::fd::AsFd;

    #[test]
    fn pipe_ends_are_cloexec_and_connected() {
        let (read, write) = pipe().unwrap();
        for fd in [read.as_raw_fd(), write.as_raw_fd()] {
            let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
            assert_ne!(flags & libc::FD_CLOEXEC, 0);
        }

        let mut w = File::from(write);
        w.write_all(b"abc").unwrap();
        drop(w);

        let mut out = String::new();
        File::from(read).read_to_string(&mut out).unwrap();
        assert_eq!(out, "abc");
    }

    #[test]
    fn is_open_tracks_descriptor_lifetime() {
        let file = File::open("/dev/null").unwrap();
        let fd = file.as_raw_fd();
        assert!(is_open(fd));
        assert!(!is_open(900_002));

        let dup = duplicate(fd).unwrap();
        assert_ne!(dup.as_raw_fd(), fd);
        assert!(is_open(dup.as_raw_fd()));

        let err = duplicate(900_002).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    }

    #[test]
    fn nonblocking_read_reports_would_block() {
        let (read, _write) = pipe().unwrap();
        set_nonblocking(read.as_raw_fd()).unwrap();

        let mut buf = [0u8; 8];
        let err = File::from(read).read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn redirect_splices_a_pipe_onto_another_descriptor() {
        let (read, write) = pipe().unwrap();
        let slot = File::open("/dev/null").unwrap();
        let slot_fd = slot.as_raw_fd();

        redirect(write.as_fd(), slot_fd).unwrap();
        drop(write);
        (&slot).write_all(b"via slot").unwrap();
        drop(slot);

        let mut out = String::new();
        File::from(read).read_to_string(&mut out).unwrap();
        assert_eq!(out, "via slot");
    }
}
