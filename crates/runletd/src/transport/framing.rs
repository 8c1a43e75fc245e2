//! Message framing for both directions of the request transport.

use std::io::{self, BufRead, Read, Write};

use thiserror::Error;

use runlet_config::Framing;

const HEADER_LEN: usize = 4;

/// Failure reading one inbound frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The frame exceeded the limit and was skipped; the stream is intact.
    #[error("frame exceeds the {limit} byte limit")]
    TooLarge {
        /// Configured limit.
        limit: usize,
    },
    /// The transport failed; no further frames can be read.
    #[error("transport read failed: {source}")]
    Io {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl From<io::Error> for FrameError {
    fn from(source: io::Error) -> Self {
        Self::Io { source }
    }
}

/// Splits a byte stream into request frames.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    framing: Framing,
    limit: usize,
}

impl<R: BufRead> FrameReader<R> {
    /// Reads frames of at most `limit` bytes from `inner`.
    #[must_use]
    pub const fn new(inner: R, framing: Framing, limit: usize) -> Self {
        Self {
            inner,
            framing,
            limit,
        }
    }

    /// Reads the next frame, or `None` once the stream is exhausted.
    ///
    /// # Errors
    ///
    /// [`FrameError::TooLarge`] is recoverable: the oversized frame has been
    /// consumed and the next call reads the frame after it.
    pub fn read_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        match self.framing {
            Framing::Lines => self.read_line(),
            Framing::LengthPrefixed => self.read_prefixed(),
        }
    }

    fn read_line(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        loop {
            let mut line = Vec::new();
            // Room for the payload plus a `\r\n` terminator.
            let allowance = u64::try_from(self.limit).unwrap_or(u64::MAX).saturating_add(2);
            let read = (&mut self.inner)
                .take(allowance)
                .read_until(b'\n', &mut line)?;
            if read == 0 {
                return Ok(None);
            }

            let terminated = line.last() == Some(&b'\n');
            if !terminated && u64::try_from(read).unwrap_or(u64::MAX) >= allowance {
                self.skip_line()?;
                return Err(FrameError::TooLarge { limit: self.limit });
            }

            while matches!(line.last(), Some(b'\n' | b'\r')) {
                line.pop();
            }
            if line.len() > self.limit {
                return Err(FrameError::TooLarge { limit: self.limit });
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(line));
        }
    }

    fn skip_line(&mut self) -> io::Result<()> {
        loop {
            let available = self.inner.fill_buf()?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|byte| *byte == b'\n') {
                Some(index) => {
                    self.inner.consume(index.saturating_add(1));
                    return Ok(());
                }
                None => {
                    let consumed = available.len();
                    self.inner.consume(consumed);
                }
            }
        }
    }

    #[expect(
        clippy::big_endian_bytes,
        reason = "length prefixes are network byte order"
    )]
    fn read_prefixed(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let mut header = [0_u8; HEADER_LEN];
        match self.inner.read_exact(&mut header) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(error) => return Err(error.into()),
        }
        let declared = u32::from_be_bytes(header);
        let length = usize::try_from(declared).unwrap_or(usize::MAX);

        if length > self.limit {
            io::copy(
                &mut (&mut self.inner).take(u64::from(declared)),
                &mut io::sink(),
            )?;
            return Err(FrameError::TooLarge { limit: self.limit });
        }

        let mut payload = vec![0_u8; length];
        self.inner.read_exact(&mut payload)?;
        Ok(Some(payload))
    }
}

/// Writes response frames.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
    framing: Framing,
}

impl<W: Write> FrameWriter<W> {
    /// Writes frames to `inner`.
    #[must_use]
    pub const fn new(inner: W, framing: Framing) -> Self {
        Self { inner, framing }
    }

    /// Writes and flushes one frame.
    ///
    /// # Errors
    ///
    /// Propagates transport write failures.
    #[expect(
        clippy::big_endian_bytes,
        reason = "length prefixes are network byte order"
    )]
    /// Writes one frame and flushes.
    ///
    /// # Errors
    ///
    /// Returns the underlying write error.
    pub fn write_frame(&mut self, payload: &[u8]) -> io::Result<()> {
        match self.framing {
            Framing::Lines => {
                self.inner.write_all(payload)?;
                self.inner.write_all(b"\n")?;
            }
            Framing::LengthPrefixed => {
                let length = u32::try_from(payload.len()).map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidInput, "frame exceeds 4 GiB")
                })?;
                self.inner.write_all(&length.to_be_bytes())?;
                self.inner.write_all(payload)?;
            }
        }
        self.inner.flush()
    }

    /// Gives back the underlying writer.
    #[must_use]
    pub fn into_inner(self) -> W {
        self.inner
    }
}
