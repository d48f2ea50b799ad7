use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::core::lock;
use crate::error::Result;

/// Credentials resolved for one provider.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthCtx {
    pub bearer_token: Option<String>,
}

impl AuthCtx {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            bearer_token: Some(token.into()),
        }
    }
}

/// Resolves credentials for a provider by name.
///
/// Authentication itself lives outside this crate; tasks only ask for the
/// context right before they go on the wire.
pub trait AuthProvider: Send + Sync {
    fn auth_for(&self, provider: &str) -> Result<AuthCtx>;
}

/// Hands out anonymous credentials for every provider.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAuth;

impl AuthProvider for NoAuth {
    fn auth_for(&self, _provider: &str) -> Result<AuthCtx> {
        Ok(AuthCtx::anonymous())
    }
}

/// Same token for every provider.
#[derive(Clone, Debug)]
pub struct StaticAuth(pub AuthCtx);

impl AuthProvider for StaticAuth {
    fn auth_for(&self, _provider: &str) -> Result<AuthCtx> {
        Ok(self.0.clone())
    }
}

/// A shared, line-oriented sink for user-facing status text.
#[derive(Clone)]
pub struct StatusWriter {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl StatusWriter {
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }

    pub fn sink() -> Self {
        Self::new(std::io::sink())
    }

    /// An in-memory writer plus a handle to read back what was written.
    pub fn buffer() -> (Self, StatusBuffer) {
        let buffer = StatusBuffer::default();
        (Self::new(buffer.clone()), buffer)
    }

    pub fn write_line(&self, line: &str) {
        let mut writer = lock(&self.inner);
        if let Err(e) = writeln!(writer, "{line}").and_then(|_| writer.flush()) {
            log::warn!("failed to write status line: {e}");
        }
    }
}

impl fmt::Debug for StatusWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusWriter").finish_non_exhaustive()
    }
}

/// Readable side of [`StatusWriter::buffer`].
#[derive(Clone, Debug, Default)]
pub struct StatusBuffer(Arc<Mutex<Vec<u8>>>);

impl StatusBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&lock(&self.0)).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for StatusBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        lock(&self.0).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Per-invocation environment handed to every task.
#[derive(Clone)]
pub struct TaskContext {
    pub auth: Arc<dyn AuthProvider>,
    pub writer: StatusWriter,
    pub err_writer: StatusWriter,
}

impl TaskContext {
    pub fn new(auth: Arc<dyn AuthProvider>, writer: StatusWriter, err_writer: StatusWriter) -> Self {
        Self {
            auth,
            writer,
            err_writer,
        }
    }

    pub fn auth_for(&self, provider: &str) -> Result<AuthCtx> {
        self.auth.auth_for(provider)
    }
}

impl Default for TaskContext {
    fn default() -> Self {
        Self::new(Arc::new(NoAuth), StatusWriter::stdout(), StatusWriter::stderr())
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("writer", &self.writer)
            .field("err_writer", &self.err_writer)
            .finish_non_exhaustive()
    }
}
