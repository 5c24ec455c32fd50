//! Log output with bot tokens masked.
//!
//! Every formatted line passes through [`RedactionPatterns`] before it hits
//! stderr, so request URLs and error messages that embed the token are safe
//! to log.

use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting Telegram bot tokens
pub struct RedactionPatterns {
    api_url: Regex,
    bare: Regex,
    bot_prefix: Regex,
}

impl RedactionPatterns {
    /// Compile all patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            api_url: Regex::new(r"(https?://[^/]+/(?:file/)?bot)([0-9]+:[A-Za-z0-9_-]+)(/|['\s]|$)")?,
            bare: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            bot_prefix: Regex::new(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+")?,
        })
    }

    /// Mask every token occurrence in `input`
    #[must_use]
    pub fn redact(&self, input: &str) -> String {
        let output = self.api_url.replace_all(input, "$1[TELEGRAM_TOKEN]$3");
        let output = self.bare.replace_all(&output, "[TELEGRAM_TOKEN]");
        self.bot_prefix
            .replace_all(&output, "$1[TELEGRAM_TOKEN]")
            .into_owned()
    }
}

/// Writer that redacts each buffer before forwarding it
pub struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let redacted = self.patterns.redact(&String::from_utf8_lossy(buf));
        self.inner.write_all(redacted.as_bytes())?;
        // The caller's buffer was consumed in full even if the output length differs
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// [`tracing_subscriber::fmt::MakeWriter`] producing [`RedactingWriter`]s
pub struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    /// Wrap a writer factory
    pub const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: (self.make_inner)(),
            patterns: Arc::clone(&self.patterns),
        }
    }
}

/// Install the global subscriber: `RUST_LOG` filter (default `info`), stderr output
pub fn init(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "123456789:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsawq";

    fn patterns() -> RedactionPatterns {
        match RedactionPatterns::new() {
            Ok(p) => p,
            Err(e) => panic!("patterns must compile: {e}"),
        }
    }

    #[test]
    fn masks_api_urls() {
        let line = format!("GET https://api.telegram.org/bot{TOKEN}/getUpdates failed");
        let redacted = patterns().redact(&line);
        assert!(!redacted.contains(TOKEN));
        assert!(redacted.contains("https://api.telegram.org/bot[TELEGRAM_TOKEN]/getUpdates"));
    }

    #[test]
    fn masks_bare_tokens() {
        let redacted = patterns().redact(&format!("token={TOKEN}"));
        assert_eq!(redacted, "token=[TELEGRAM_TOKEN]");
    }

    #[test]
    fn writer_reports_full_length() {
        let mut out = Vec::new();
        let line = format!("file/bot{TOKEN}/voice.oga\n");
        {
            let mut writer = RedactingWriter {
                inner: &mut out,
                patterns: Arc::new(patterns()),
            };
            assert_eq!(writer.write(line.as_bytes()).ok(), Some(line.len()));
        }
        let written = String::from_utf8_lossy(&out);
        assert!(!written.contains(TOKEN));
    }
}
