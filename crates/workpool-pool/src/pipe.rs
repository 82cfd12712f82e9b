//! Non-blocking read ends of a worker's stdout/stderr pipes.
//!
//! Both fds are switched to `O_NONBLOCK` so a drain can never hang, and
//! readiness is checked with zero-or-bounded-timeout `poll(2)`. A poll
//! reporting "readable" can mean imminent EOF rather than data, so callers
//! must follow up with [`PipeReader::read_available`] and check the buffer
//! instead of trusting the poll result alone.

use std::fs::File;
use std::io::{self, ErrorKind, Read};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::time::Duration;

use bytes::BytesMut;

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// One non-blocking pipe read end with a sticky EOF marker.
pub(crate) struct PipeReader {
    file: File,
    eof: bool,
}

impl PipeReader {
    pub(crate) fn new(fd: impl Into<OwnedFd>) -> io::Result<Self> {
        let fd = fd.into();
        set_nonblocking(fd.as_raw_fd())?;
        Ok(Self {
            file: File::from(fd),
            eof: false,
        })
    }

    pub(crate) fn at_eof(&self) -> bool {
        self.eof
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    /// Wait until the pipe is readable (data or EOF). `None` blocks
    /// indefinitely; `Some(Duration::ZERO)` is a pure readiness probe.
    pub(crate) fn poll_readable(&self, timeout: Option<Duration>) -> io::Result<bool> {
        poll_any(&[self.raw_fd()], timeout)
    }

    /// Drain everything currently available into `buf` without blocking.
    ///
    /// Returns the number of bytes appended. Marks EOF when the write end
    /// has closed and the pipe is empty.
    pub(crate) fn read_available(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        if self.eof {
            return Ok(0);
        }
        let mut total = 0;
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.file.read(&mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    total += n;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => return Err(err),
            }
        }
        Ok(total)
    }
}

impl std::fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeReader")
            .field("fd", &self.raw_fd())
            .field("eof", &self.eof)
            .finish()
    }
}

/// Poll several fds for readability at once. Returns true if any fd is
/// readable (or at EOF) within the timeout.
pub(crate) fn poll_any(fds: &[RawFd], timeout: Option<Duration>) -> io::Result<bool> {
    let mut pollfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();

    let timeout_ms: libc::c_int = match timeout {
        None => -1,
        Some(t) => t.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
    };

    loop {
        // SAFETY: `pollfds` is a valid, writable slice of pollfd for the
        // length passed, and stays alive for the duration of the call.
        let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        return Ok(rc > 0);
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: `fd` is an open descriptor owned by the caller.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: same fd, valid flag bits.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::process::{Command, Stdio};

    use super::*;

    #[test]
    fn quiet_pipe_is_not_readable() {
        let mut child = Command::new("cat")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .expect("cat should spawn");

        let reader = PipeReader::new(child.stdout.take().expect("stdout piped")).unwrap();
        assert!(!reader.poll_readable(Some(Duration::ZERO)).unwrap());
        assert!(!reader.poll_readable(Some(Duration::from_millis(20))).unwrap());

        drop(child.stdin.take());
        let _ = child.wait();
    }

    #[test]
    fn data_then_eof() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("printf hello")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .expect("sh should spawn");

        let mut reader = PipeReader::new(child.stdout.take().expect("stdout piped")).unwrap();
        assert!(reader.poll_readable(Some(Duration::from_secs(2))).unwrap());

        let mut buf = BytesMut::new();
        let mut read = 0;
        // Data and EOF may arrive across separate wakeups.
        while !reader.at_eof() {
            reader.poll_readable(Some(Duration::from_secs(2))).unwrap();
            read += reader.read_available(&mut buf).unwrap();
        }
        assert_eq!(read, 5);
        assert_eq!(&buf[..], b"hello");
        assert_eq!(reader.read_available(&mut buf).unwrap(), 0);

        let _ = child.wait();
    }

    #[test]
    fn eof_reports_readable_but_yields_no_data() {
        let mut child = Command::new("true")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .expect("true should spawn");
        let _ = child.wait();

        let mut reader = PipeReader::new(child.stdout.take().expect("stdout piped")).unwrap();
        // Poll says readable because EOF is imminent...
        assert!(reader.poll_readable(Some(Duration::from_secs(2))).unwrap());
        // ...but there are no bytes behind it.
        let mut buf = BytesMut::new();
        assert_eq!(reader.read_available(&mut buf).unwrap(), 0);
        assert!(reader.at_eof());
        assert!(buf.is_empty());
    }
}
