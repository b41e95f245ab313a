// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Buffered record-oriented reading over a byte stream.

use std::io::{ErrorKind, Read};

const INITIAL_CAPACITY: usize = 1024;

/// Terminal outcomes of a delimited read.
#[derive(Debug)]
pub enum ReadError {
    /// The peer closed the stream and no bytes remain.
    Closed,
    /// The underlying stream failed. All subsequent reads fail too.
    Io(std::io::Error),
}

impl std::fmt::Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => f.write_str("stream closed"),
            Self::Io(err) => write!(f, "stream error: {err}"),
        }
    }
}

impl std::error::Error for ReadError {}

/// Adapts a byte stream into delimiter-separated records.
///
/// `read_until_delimiter` returns the next maximal run of non-delimiter
/// bytes, so a `\r\n` pair (or any padding of blank lines) never yields an
/// empty record. The returned slice points into the reader's own buffer and
/// stays valid until the next read call.
///
/// The buffer starts at 1 KiB and doubles whenever a record outgrows it;
/// records may arrive split across any number of underlying reads.
#[derive(Debug)]
pub struct BufferedReader<R> {
    source: R,
    buf: Vec<u8>,
    pos: usize,
    eof: bool,
    failed: bool,
}

impl<R: Read> BufferedReader<R> {
    /// Wraps `source` with a fresh buffer.
    pub fn new(source: R) -> Self {
        Self {
            source,
            buf: Vec::with_capacity(INITIAL_CAPACITY),
            pos: 0,
            eof: false,
            failed: false,
        }
    }

    /// Returns the bytes up to (and consuming) the next delimiter byte.
    ///
    /// A trailing record with no final delimiter is still returned; the call
    /// after it reports [`ReadError::Closed`].
    pub fn read_until_delimiter(&mut self, delimiters: &[u8]) -> Result<&[u8], ReadError> {
        if self.failed {
            return Err(ReadError::Io(std::io::Error::new(
                ErrorKind::Other,
                "stream failed earlier",
            )));
        }

        // Drop everything already consumed so record starts stay stable
        // while the buffer grows underneath a partial record.
        self.buf.drain(..self.pos);
        self.pos = 0;

        // Skip delimiters left over from the previous record.
        loop {
            while self.pos < self.buf.len() && delimiters.contains(&self.buf[self.pos]) {
                self.pos += 1;
            }
            if self.pos < self.buf.len() {
                break;
            }

            self.buf.clear();
            self.pos = 0;
            if self.eof {
                return Err(ReadError::Closed);
            }
            self.fill()?;
        }

        let start = self.pos;
        let mut scan = self.pos;
        loop {
            if let Some(offset) = self.buf[scan..]
                .iter()
                .position(|byte| delimiters.contains(byte))
            {
                let end = scan + offset;
                self.pos = end + 1;
                return Ok(&self.buf[start..end]);
            }

            scan = self.buf.len();
            if self.eof {
                self.pos = self.buf.len();
                return Ok(&self.buf[start..]);
            }
            self.fill()?;
        }
    }

    /// Mutable access to the underlying stream, e.g. for writing replies.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.source
    }

    /// Unwraps the reader, discarding buffered-but-unconsumed bytes.
    pub fn into_inner(self) -> R {
        self.source
    }

    fn fill(&mut self) -> Result<(), ReadError> {
        if self.buf.len() == self.buf.capacity() {
            // Doubling growth; reserve(capacity) at least doubles.
            self.buf.reserve(self.buf.capacity().max(INITIAL_CAPACITY));
        }

        let old_len = self.buf.len();
        let target = self.buf.capacity();
        self.buf.resize(target, 0);

        loop {
            match self.source.read(&mut self.buf[old_len..]) {
                Ok(0) => {
                    self.buf.truncate(old_len);
                    self.eof = true;
                    return Ok(());
                }
                Ok(read) => {
                    self.buf.truncate(old_len + read);
                    return Ok(());
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => {
                    self.buf.truncate(old_len);
                    self.failed = true;
                    return Err(ReadError::Io(err));
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::Read;

    use super::{BufferedReader, ReadError};

    /// Hands out the source a few bytes at a time so delimiters straddle
    /// underlying reads.
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.step.min(self.data.len()).min(buf.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn reader_splits_crlf_lines() {
        let mut reader = BufferedReader::new(&b"USER anonymous\r\nQUIT\r\n"[..]);

        assert_eq!(
            b"USER anonymous",
            reader.read_until_delimiter(b"\r\n").unwrap()
        );
        assert_eq!(b"QUIT", reader.read_until_delimiter(b"\r\n").unwrap());
        assert!(matches!(
            reader.read_until_delimiter(b"\r\n"),
            Err(ReadError::Closed)
        ));
    }

    #[test]
    fn reader_survives_delimiters_across_reads() {
        let source = Trickle {
            data: b"NOOP\r\nSYST\r\n",
            step: 3,
        };
        let mut reader = BufferedReader::new(source);

        assert_eq!(b"NOOP", reader.read_until_delimiter(b"\r\n").unwrap());
        assert_eq!(b"SYST", reader.read_until_delimiter(b"\r\n").unwrap());
    }

    #[test]
    fn reader_skips_blank_lines() {
        let mut reader = BufferedReader::new(&b"\r\n\r\nPWD\r\n"[..]);
        assert_eq!(b"PWD", reader.read_until_delimiter(b"\r\n").unwrap());
    }

    #[test]
    fn reader_grows_past_initial_capacity() {
        let mut line = vec![b'a'; 5000];
        line.extend_from_slice(b"\r\nQUIT\r\n");
        let source = Trickle {
            data: &line,
            step: 512,
        };
        let mut reader = BufferedReader::new(source);

        let record = reader.read_until_delimiter(b"\r\n").unwrap();
        assert_eq!(5000, record.len());
        assert!(record.iter().all(|&b| b == b'a'));
        assert_eq!(b"QUIT", reader.read_until_delimiter(b"\r\n").unwrap());
    }

    #[test]
    fn reader_returns_trailing_unterminated_record() {
        let mut reader = BufferedReader::new(&b"QUIT"[..]);
        assert_eq!(b"QUIT", reader.read_until_delimiter(b"\r\n").unwrap());
        assert!(matches!(
            reader.read_until_delimiter(b"\r\n"),
            Err(ReadError::Closed)
        ));
    }

    #[test]
    fn reader_reports_closed_on_empty_stream() {
        let mut reader = BufferedReader::new(&b""[..]);
        assert!(matches!(
            reader.read_until_delimiter(b"\r\n"),
            Err(ReadError::Closed)
        ));
    }

    #[test]
    fn reader_stays_failed_after_stream_error() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "reset",
                ))
            }
        }

        let mut reader = BufferedReader::new(Broken);
        assert!(matches!(
            reader.read_until_delimiter(b"\r\n"),
            Err(ReadError::Io(_))
        ));
        assert!(matches!(
            reader.read_until_delimiter(b"\r\n"),
            Err(ReadError::Io(_))
        ));
    }
}
