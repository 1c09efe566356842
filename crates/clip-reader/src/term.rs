//! Terminal output while the key loop holds the terminal in raw mode.

use std::io::{self, Write};

use crossterm::terminal;

/// Raw mode for the lifetime of the guard.
pub struct RawMode(());

impl RawMode {
    pub fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self(()))
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        terminal::disable_raw_mode().ok();
    }
}

/// Writer that turns `\n` into `\r\n`, so lines start at column 0 in raw mode.
pub struct CrlfWriter<W> {
    inner: W,
}

impl<W: Write> CrlfWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W: Write> Write for CrlfWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut start = 0;
        for (i, b) in buf.iter().enumerate() {
            if *b == b'\n' && (i == 0 || buf[i - 1] != b'\r') {
                self.inner.write_all(&buf[start..i])?;
                self.inner.write_all(b"\r\n")?;
                start = i + 1;
            }
        }
        self.inner.write_all(&buf[start..])?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Print a status line for the user.
pub fn say(message: impl AsRef<str>) {
    let mut out = CrlfWriter::new(io::stdout().lock());
    writeln!(out, "{}", message.as_ref()).ok();
    out.flush().ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_bare_newlines() {
        let mut out = CrlfWriter::new(Vec::new());
        out.write_all(b"a\nb\r\nc\n").unwrap();
        assert_eq!(out.inner, b"a\r\nb\r\nc\r\n");
    }
}
