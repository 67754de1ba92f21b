//! Child-process plumbing shared by the build service and the sandbox.
//!
//! Both spawn untrusted work in its own process group, drain its output into
//! a bounded buffer, and kill the whole group when they are done with it.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncRead, AsyncReadExt};

/// PATH used when the host process has none.
const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

const READ_CHUNK: usize = 8 * 1024;

/// Captured output with a hard size cap.
///
/// Bytes past the cap are counted but not stored.
#[derive(Debug, Default)]
pub struct BoundedBuffer {
    bytes: Vec<u8>,
    limit: usize,
    dropped: usize,
}

impl BoundedBuffer {
    /// Creates a buffer that stores at most `limit` bytes.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(limit.min(READ_CHUNK)),
            limit,
            dropped: 0,
        }
    }

    /// Appends as much of `chunk` as fits.
    pub fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.bytes.len());
        let taken = room.min(chunk.len());
        self.bytes.extend_from_slice(&chunk[..taken]);
        self.dropped += chunk.len() - taken;
    }

    /// Returns true if any bytes were discarded.
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.dropped > 0
    }

    /// Returns the number of discarded bytes.
    #[must_use]
    pub fn dropped_bytes(&self) -> usize {
        self.dropped
    }

    /// Returns the captured text so far, without any marker.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    /// Renders the captured text, appending `[… N bytes of {what} truncated]`
    /// when bytes were discarded.
    #[must_use]
    pub fn render(&self, what: &str) -> String {
        let mut text = self.text();
        if self.dropped > 0 {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&format!("[… {} bytes of {what} truncated]", self.dropped));
        }
        text
    }
}

/// A buffer shared between the stdout and stderr drains.
pub type SharedBuffer = Arc<Mutex<BoundedBuffer>>;

/// Creates a shared buffer.
#[must_use]
pub fn shared_buffer(limit: usize) -> SharedBuffer {
    Arc::new(Mutex::new(BoundedBuffer::new(limit)))
}

/// Runs `f` with the buffer locked, ignoring poisoning.
pub fn with_buffer<T>(buffer: &SharedBuffer, f: impl FnOnce(&mut BoundedBuffer) -> T) -> T {
    let mut guard = buffer.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard)
}

/// Reads `reader` to EOF into `buffer`.
///
/// Keeps reading after the buffer is full so the writer never blocks on a
/// full pipe.
pub async fn drain<R>(mut reader: R, buffer: SharedBuffer)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => with_buffer(&buffer, |b| b.push(&chunk[..n])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::debug!(error = %e, "output drain stopped");
                break;
            }
        }
    }
}

/// Sends SIGKILL to the process group led by `pid`.
///
/// A group that has already exited is not an error.
pub fn kill_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pid, error = %e, "failed to kill process group"),
    }
}

/// Returns the host's PATH for child processes.
#[must_use]
pub fn host_path() -> String {
    std::env::var("PATH").unwrap_or_else(|_| FALLBACK_PATH.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_stores_up_to_limit() {
        let mut buffer = BoundedBuffer::new(5);
        buffer.push(b"abc");
        buffer.push(b"defg");
        assert_eq!(buffer.text(), "abcde");
        assert_eq!(buffer.dropped_bytes(), 2);
        assert!(buffer.is_truncated());
    }

    #[test]
    fn render_appends_marker_only_when_truncated() {
        let mut buffer = BoundedBuffer::new(16);
        buffer.push(b"hello\n");
        assert_eq!(buffer.render("logs"), "hello\n");

        buffer.push(&[b'x'; 20]);
        let rendered = buffer.render("logs");
        assert!(rendered.ends_with("[… 10 bytes of logs truncated]"));
    }

    #[test]
    fn zero_limit_drops_everything() {
        let mut buffer = BoundedBuffer::new(0);
        buffer.push(b"data");
        assert_eq!(buffer.text(), "");
        assert_eq!(buffer.render("output"), "[… 4 bytes of output truncated]");
    }

    #[tokio::test]
    async fn drain_reads_to_eof() {
        let buffer = shared_buffer(1024);
        drain(&b"line one\nline two\n"[..], buffer.clone()).await;
        assert_eq!(with_buffer(&buffer, |b| b.text()), "line one\nline two\n");
    }

    #[tokio::test]
    async fn drain_counts_overflow() {
        let buffer = shared_buffer(4);
        let data = vec![b'z'; 100_000];
        drain(&data[..], buffer.clone()).await;
        assert_eq!(with_buffer(&buffer, |b| b.dropped_bytes()), 99_996);
    }

    #[test]
    fn kill_group_ignores_missing_group() {
        kill_group(i32::MAX as u32);
    }
}
