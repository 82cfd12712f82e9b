//! Host-side handle for one worker subprocess.
//!
//! A [`PoolWorker`] owns the child's three pipes, frames requests onto
//! stdin, decodes framed responses from stdout, and drains free-form
//! stderr opportunistically. Failure is sticky: any protocol or I/O error
//! marks the handle failed, and a failed handle is never recycled — the
//! pool discards it and spawns a replacement.

use std::cell::RefCell;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::rc::Rc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::debug;
use workpool_frame::{decode_response, encode_exit, encode_start_request};

use crate::error::{PoolError, Result};
use crate::pipe::{poll_any, PipeReader};

/// How long `close` waits for a child to exit on its own before killing it.
const CLOSE_GRACE: Duration = Duration::from_millis(200);
const CLOSE_POLL_STEP: Duration = Duration::from_millis(10);

/// The command line a pool runs for each worker process.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Working directory for spawned workers.
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Add one environment variable for spawned workers.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Human-readable command line for diagnostics.
    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }

    fn spawn(&self) -> std::io::Result<Child> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd.spawn()
    }
}

struct WorkerInner {
    id: u64,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<PipeReader>,
    stderr: Option<PipeReader>,
    stdout_buf: BytesMut,
    stderr_buf: BytesMut,
    /// A request frame was sent and its response has not been read yet.
    awaiting_response: bool,
    /// Sticky: once true, the handle is never recycled.
    failed: bool,
}

/// Handle to one pooled worker process.
///
/// Cheap to clone; the pool keeps a clone of every checked-out worker so
/// `shut_down` can reach processes the caller still holds. Not `Send` —
/// a single thread of control drives the pool and all of its handles.
#[derive(Clone)]
pub struct PoolWorker {
    inner: Rc<RefCell<WorkerInner>>,
}

impl PoolWorker {
    pub(crate) fn spawn(command: &WorkerCommand, id: u64) -> Result<Self> {
        let spawn_err = |source| PoolError::Spawn {
            command: command.display(),
            source,
        };

        let mut child = command.spawn().map_err(spawn_err)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_err(std::io::Error::other("stdin pipe not captured")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_err(std::io::Error::other("stdout pipe not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| spawn_err(std::io::Error::other("stderr pipe not captured")))?;

        Ok(Self {
            inner: Rc::new(RefCell::new(WorkerInner {
                id,
                child: Some(child),
                stdin: Some(stdin),
                stdout: Some(PipeReader::new(stdout).map_err(spawn_err)?),
                stderr: Some(PipeReader::new(stderr).map_err(spawn_err)?),
                stdout_buf: BytesMut::new(),
                stderr_buf: BytesMut::new(),
                awaiting_response: false,
                failed: false,
            })),
        })
    }

    /// Frame and send one request payload to the worker.
    ///
    /// At most one request may be outstanding per worker; send the next
    /// one only after `get_stdout_response` has returned.
    pub fn send_request(&self, payload: &[u8]) -> Result<()> {
        let mut w = self.inner.borrow_mut();
        if w.stdin.is_none() || w.failed {
            return Err(PoolError::ResourceFailed);
        }
        let mut frame = BytesMut::new();
        encode_start_request(payload, &mut frame)?;
        w.write_frame(&frame)?;
        w.awaiting_response = true;
        Ok(())
    }

    /// Send the exit frame. Used when retiring a worker; the worker is
    /// expected to terminate shortly afterwards.
    pub fn send_exit_request(&self) -> Result<()> {
        let mut w = self.inner.borrow_mut();
        if w.stdin.is_none() || w.failed {
            return Err(PoolError::ResourceFailed);
        }
        let mut frame = BytesMut::new();
        encode_exit(&mut frame);
        w.write_frame(&frame)
    }

    /// Non-blocking probe: is response data actually buffered or readable
    /// on stdout? Readable-because-EOF does not count as data.
    pub fn has_stdout_data(&self) -> Result<bool> {
        self.inner.borrow_mut().probe(Channel::Stdout)
    }

    /// Non-blocking probe for the unframed stderr channel.
    pub fn has_stderr_data(&self) -> Result<bool> {
        self.inner.borrow_mut().probe(Channel::Stderr)
    }

    /// Block until stdout or stderr becomes readable, up to `timeout`.
    ///
    /// Returns a readiness boolean, not data; follow up with the probes or
    /// the read calls.
    pub fn wait_for_stdout_or_stderr(&self, timeout: Duration) -> Result<bool> {
        let w = self.inner.borrow();
        let (Some(stdout), Some(stderr)) = (&w.stdout, &w.stderr) else {
            return Err(PoolError::ResourceFailed);
        };
        if !w.stdout_buf.is_empty() || !w.stderr_buf.is_empty() {
            return Ok(true);
        }
        Ok(poll_any(&[stdout.raw_fd(), stderr.raw_fd()], Some(timeout))?)
    }

    /// Block until one complete response frame is decoded and return its
    /// payload.
    ///
    /// A stream that hits EOF before a single byte arrived yields an empty
    /// payload (the worker exited without answering — distinct from a
    /// worker that answered with an empty message, which arrives as a
    /// well-formed `0;` frame). EOF mid-frame and malformed prefixes mark
    /// the handle failed.
    pub fn get_stdout_response(&self) -> Result<Bytes> {
        self.inner.borrow_mut().read_response()
    }

    /// Drain whatever stderr bytes are currently available and return the
    /// accumulated text. Never blocks. The accumulation resets when the
    /// pool recycles the worker.
    pub fn get_stderr_response(&self) -> Result<String> {
        let mut w = self.inner.borrow_mut();
        if w.stderr.is_none() {
            return Err(PoolError::ResourceFailed);
        }
        w.drain_stderr()?;
        Ok(String::from_utf8_lossy(&w.stderr_buf).into_owned())
    }

    /// Force-retire an otherwise healthy-looking worker (e.g. the response
    /// payload carried an application-level fatal error).
    pub fn mark_as_failed(&self) {
        self.inner.borrow_mut().failed = true;
    }

    pub fn has_failed(&self) -> bool {
        self.inner.borrow().failed
    }

    /// Whether the child process is still alive (non-blocking).
    pub fn is_running(&self) -> bool {
        self.inner.borrow_mut().process_running()
    }

    /// Label for log output only. Identity checks go through [`Self::same_as`].
    pub(crate) fn id(&self) -> u64 {
        self.inner.borrow().id
    }

    /// Whether two handles refer to the same worker process.
    pub(crate) fn same_as(&self, other: &PoolWorker) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Drain output belonging to the request cycle that just finished so
    /// the worker starts its next checkout with clean channels. Marks the
    /// handle failed if the process died.
    pub(crate) fn free_request(&self) {
        let mut w = self.inner.borrow_mut();
        if !w.process_running() {
            w.failed = true;
            return;
        }
        if w.awaiting_response && !w.failed {
            // The caller released without reading; consume the pending
            // response so the pipe is in sync for the next request.
            if let Err(err) = w.read_response() {
                debug!(worker = w.id, error = %err, "draining pending response failed");
            }
        }
        if !w.failed {
            if let Err(err) = w.drain_stderr() {
                debug!(worker = w.id, error = %err, "draining stderr failed");
                w.failed = true;
            }
        }
        w.stderr_buf.clear();
    }

    /// Pull any bytes already sitting in the pipes and, if there are any,
    /// return them as lines. Used at checkout to detect protocol desync.
    pub(crate) fn take_stray_output(&self) -> Result<Option<(Vec<String>, Vec<String>)>> {
        let mut w = self.inner.borrow_mut();
        w.probe(Channel::Stdout)?;
        w.probe(Channel::Stderr)?;
        if w.stdout_buf.is_empty() && w.stderr_buf.is_empty() {
            return Ok(None);
        }
        let stdout_lines = split_lines(&w.stdout_buf);
        let stderr_lines = split_lines(&w.stderr_buf);
        w.stdout_buf.clear();
        w.stderr_buf.clear();
        Ok(Some((stdout_lines, stderr_lines)))
    }

    /// Release OS resources for the child process. Idempotent.
    ///
    /// Closes stdin (EOF to the worker), waits a short grace period, then
    /// kills and reaps so no zombie is left behind.
    pub(crate) fn close(&self) {
        let mut w = self.inner.borrow_mut();
        w.stdin = None;
        w.stdout = None;
        w.stderr = None;

        let Some(mut child) = w.child.take() else {
            return;
        };
        let mut waited = Duration::ZERO;
        while waited < CLOSE_GRACE {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) => {
                    std::thread::sleep(CLOSE_POLL_STEP);
                    waited += CLOSE_POLL_STEP;
                }
                Err(_) => break,
            }
        }
        debug!(worker = w.id, "worker did not exit in time; killing");
        let _ = child.kill();
        let _ = child.wait();
    }
}

impl Drop for PoolWorker {
    fn drop(&mut self) {
        // Only the last handle tears the process down.
        if Rc::strong_count(&self.inner) == 1 {
            self.close();
        }
    }
}

impl std::fmt::Debug for PoolWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let w = self.inner.borrow();
        f.debug_struct("PoolWorker")
            .field("id", &w.id)
            .field("failed", &w.failed)
            .field("awaiting_response", &w.awaiting_response)
            .field("closed", &w.child.is_none())
            .finish()
    }
}

#[derive(Clone, Copy)]
enum Channel {
    Stdout,
    Stderr,
}

impl WorkerInner {
    fn process_running(&mut self) -> bool {
        match &mut self.child {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Write a complete frame to the worker's stdin, retrying partial
    /// writes. Any failure is sticky.
    fn write_frame(&mut self, mut bytes: &[u8]) -> Result<()> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(PoolError::ResourceFailed);
        };
        while !bytes.is_empty() {
            match stdin.write(bytes) {
                Ok(0) => {
                    self.failed = true;
                    return Err(PoolError::Write(std::io::Error::new(
                        ErrorKind::WriteZero,
                        "worker stdin closed",
                    )));
                }
                Ok(n) => bytes = &bytes[n..],
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => {
                    self.failed = true;
                    return Err(PoolError::Write(err));
                }
            }
        }
        if let Err(err) = stdin.flush() {
            self.failed = true;
            return Err(PoolError::Write(err));
        }
        Ok(())
    }

    /// Non-blocking: true only if actual bytes are buffered for the
    /// channel after a zero-timeout poll and drain.
    fn probe(&mut self, channel: Channel) -> Result<bool> {
        let (reader, buf) = match channel {
            Channel::Stdout => (&mut self.stdout, &mut self.stdout_buf),
            Channel::Stderr => (&mut self.stderr, &mut self.stderr_buf),
        };
        let Some(reader) = reader.as_mut() else {
            return Err(PoolError::ResourceFailed);
        };
        if !buf.is_empty() {
            return Ok(true);
        }
        if reader.at_eof() {
            return Ok(false);
        }
        if !reader.poll_readable(Some(Duration::ZERO))? {
            return Ok(false);
        }
        reader.read_available(buf)?;
        Ok(!buf.is_empty())
    }

    fn read_response(&mut self) -> Result<Bytes> {
        if self.stdout.is_none() || self.failed {
            return Err(PoolError::ResourceFailed);
        }
        loop {
            match decode_response(&mut self.stdout_buf) {
                Ok(Some(payload)) => {
                    self.awaiting_response = false;
                    return Ok(payload);
                }
                Ok(None) => {}
                Err(err) => {
                    self.failed = true;
                    self.awaiting_response = false;
                    return Err(err.into());
                }
            }

            let reader = self.stdout.as_mut().ok_or(PoolError::ResourceFailed)?;
            if reader.at_eof() {
                self.awaiting_response = false;
                if self.stdout_buf.is_empty() {
                    // Worker exited without answering.
                    return Ok(Bytes::new());
                }
                self.failed = true;
                return Err(PoolError::UnexpectedEof);
            }

            reader.poll_readable(None)?;
            reader.read_available(&mut self.stdout_buf)?;
        }
    }

    fn drain_stderr(&mut self) -> Result<()> {
        let Some(reader) = self.stderr.as_mut() else {
            return Err(PoolError::ResourceFailed);
        };
        if !reader.at_eof() {
            reader.read_available(&mut self.stderr_buf)?;
        }
        Ok(())
    }
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(bytes);
    let mut lines: Vec<String> = text.split('\n').map(str::to_owned).collect();
    if lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_sh(script: &str) -> PoolWorker {
        let command = WorkerCommand::new("sh").arg("-c").arg(script);
        PoolWorker::spawn(&command, 0).expect("worker should spawn")
    }

    fn spawn_cat() -> PoolWorker {
        let command = WorkerCommand::new("cat");
        PoolWorker::spawn(&command, 0).expect("cat should spawn")
    }

    #[test]
    fn framed_response_roundtrip() {
        // Reads one request line, then answers with a well-formed frame.
        let worker = spawn_sh(r#"read line; printf '5;hello'"#);
        worker.send_request(b"ping").unwrap();

        let response = worker.get_stdout_response().unwrap();
        assert_eq!(response.as_ref(), b"hello");
        assert!(!worker.has_failed());
        worker.close();
    }

    #[test]
    fn response_split_across_pipe_writes() {
        let worker = spawn_sh(r#"read line; printf '11;hello'; sleep 0.05; printf ' world'"#);
        worker.send_request(b"ping").unwrap();

        let response = worker.get_stdout_response().unwrap();
        assert_eq!(response.as_ref(), b"hello world");
        worker.close();
    }

    #[test]
    fn eof_with_zero_bytes_is_empty_response() {
        let worker = spawn_sh(r#"read line"#);
        worker.send_request(b"ping").unwrap();

        let response = worker.get_stdout_response().unwrap();
        assert!(response.is_empty());
        // Exiting without answering is not a protocol violation by itself.
        assert!(!worker.has_failed());
        worker.close();
    }

    #[test]
    fn eof_mid_frame_marks_failed() {
        let worker = spawn_sh(r#"read line; printf '100;abc'"#);
        worker.send_request(b"ping").unwrap();

        let err = worker.get_stdout_response().unwrap_err();
        assert!(matches!(err, PoolError::UnexpectedEof));
        assert!(worker.has_failed());

        // Once failed, reads are refused.
        assert!(matches!(
            worker.get_stdout_response(),
            Err(PoolError::ResourceFailed)
        ));
        worker.close();
    }

    #[test]
    fn malformed_prefix_marks_failed() {
        let worker = spawn_sh(r#"read line; printf 'nonsense'"#);
        worker.send_request(b"ping").unwrap();

        let err = worker.get_stdout_response().unwrap_err();
        assert!(matches!(err, PoolError::UnexpectedMessage(_)));
        assert!(worker.has_failed());
        worker.close();
    }

    #[test]
    fn stderr_drains_without_blocking_and_accumulates() {
        let worker = spawn_sh(r#"read line; echo oops >&2; printf '0;'; cat >/dev/null"#);
        worker.send_request(b"ping").unwrap();
        assert!(worker.get_stdout_response().unwrap().is_empty());

        // Give stderr a moment to land, then drain twice: same text.
        assert!(worker
            .wait_for_stdout_or_stderr(Duration::from_secs(2))
            .unwrap());
        std::thread::sleep(Duration::from_millis(50));
        let first = worker.get_stderr_response().unwrap();
        assert_eq!(first, "oops\n");
        assert_eq!(worker.get_stderr_response().unwrap(), first);
        worker.close();
    }

    #[test]
    fn probes_report_no_data_on_quiet_worker() {
        let worker = spawn_cat();
        assert!(!worker.has_stdout_data().unwrap());
        assert!(!worker.has_stderr_data().unwrap());
        assert!(!worker
            .wait_for_stdout_or_stderr(Duration::from_millis(20))
            .unwrap());
        worker.close();
    }

    #[test]
    fn operations_after_close_are_resource_failed() {
        let worker = spawn_cat();
        worker.close();

        assert!(matches!(
            worker.send_request(b"x"),
            Err(PoolError::ResourceFailed)
        ));
        assert!(matches!(
            worker.send_exit_request(),
            Err(PoolError::ResourceFailed)
        ));
        assert!(matches!(
            worker.has_stdout_data(),
            Err(PoolError::ResourceFailed)
        ));
        assert!(matches!(
            worker.get_stderr_response(),
            Err(PoolError::ResourceFailed)
        ));
        assert!(!worker.is_running());

        // close is idempotent
        worker.close();
    }

    #[test]
    fn mark_as_failed_blocks_sends() {
        let worker = spawn_cat();
        worker.mark_as_failed();
        assert!(worker.has_failed());
        assert!(matches!(
            worker.send_request(b"x"),
            Err(PoolError::ResourceFailed)
        ));
        worker.close();
    }

    #[test]
    fn stray_output_is_collected_as_lines() {
        let worker = spawn_sh(r#"printf 'Done sleep\n'; echo warn >&2; exec cat"#);
        std::thread::sleep(Duration::from_millis(150));

        let (stdout_lines, stderr_lines) = worker
            .take_stray_output()
            .unwrap()
            .expect("stray output should be detected");
        assert_eq!(stdout_lines, vec!["Done sleep".to_string()]);
        assert_eq!(stderr_lines, vec!["warn".to_string()]);

        // Buffers are consumed by the check.
        assert_eq!(worker.take_stray_output().unwrap(), None);
        worker.close();
    }

    #[test]
    fn free_request_marks_dead_process_failed() {
        let worker = spawn_sh("exit 0");
        std::thread::sleep(Duration::from_millis(100));
        assert!(!worker.is_running());

        worker.free_request();
        assert!(worker.has_failed());
        worker.close();
    }

    #[test]
    fn free_request_consumes_unread_response() {
        let worker = spawn_sh(r#"read line; printf '2;ok'; exec cat >/dev/null"#);
        worker.send_request(b"ping").unwrap();
        assert!(worker
            .wait_for_stdout_or_stderr(Duration::from_secs(2))
            .unwrap());

        // Release-before-read: the pending frame is drained, not leaked.
        worker.free_request();
        assert!(!worker.has_failed());
        assert_eq!(worker.take_stray_output().unwrap(), None);
        worker.close();
    }

    #[test]
    fn spawn_failure_surfaces_command() {
        let command = WorkerCommand::new("/nonexistent/worker-binary");
        let err = PoolWorker::spawn(&command, 0).unwrap_err();
        match err {
            PoolError::Spawn { command, .. } => {
                assert!(command.contains("/nonexistent/worker-binary"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn command_display_includes_args() {
        let command = WorkerCommand::new("worker").arg("--mode").arg("demo");
        assert_eq!(command.display(), "worker --mode demo");
    }
}
