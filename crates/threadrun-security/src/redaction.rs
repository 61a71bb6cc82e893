use std::sync::LazyLock;

use regex::Regex;
use tracing_subscriber::fmt::MakeWriter;

/// A writer that scrubs credentials out of log output before it reaches stderr.
pub struct RedactingWriter<W> {
    inner: W,
}

impl RedactingWriter<std::io::Stderr> {
    pub fn stderr() -> Self {
        Self {
            inner: std::io::stderr(),
        }
    }
}

impl<W: std::io::Write> RedactingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: std::io::Write> std::io::Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let original = String::from_utf8_lossy(buf);
        let redacted = redact_secrets(&original);
        self.inner.write_all(redacted.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl<'a> MakeWriter<'a> for RedactingWriter<std::io::Stderr> {
    type Writer = RedactingWriter<std::io::Stderr>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::stderr()
    }
}

static PATTERNS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
          sk-(?:proj-|svcacct-|admin-)?[A-Za-z0-9_\-]{20,}   # OpenAI project, service and legacy keys
        | (?i:bearer)\s+[A-Za-z0-9._~+/\-]{16,}=*            # Authorization header values
        ",
    )
    .ok()
});

/// Replace OpenAI keys and bearer tokens with `[REDACTED]`.
pub fn redact_secrets(input: &str) -> String {
    match PATTERNS.as_ref() {
        Some(re) => re.replace_all(input, "[REDACTED]").into_owned(),
        None => input.to_string(),
    }
}
