//! Streaming line reader for bulk source files.
//!
//! Source files arrive plain, gzip-compressed, or as single-member zip
//! archives. Either way the consumer sees one lazily produced line at a time;
//! nothing is ever fully decompressed into memory except a zip read from a
//! non-seekable stream.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Read, Seek};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use thiserror::Error;
use zip::ZipArchive;

/// Errors raised while opening or reading a source file. Everything except
/// [`ReaderError::InvalidEncoding`] aborts the run that owns the reader.
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("Line {line} is not valid UTF-8")]
    InvalidEncoding { line: u64 },

    #[error("Zip archive must contain exactly one file, found {count}")]
    MultipleArchiveMembers { count: usize },

    #[error("Zip archive is empty")]
    EmptyArchive,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl ReaderError {
    /// Returns true if only the current line is unusable and reading can go
    /// on with the next one.
    #[must_use]
    pub const fn is_line_error(&self) -> bool {
        matches!(self, Self::InvalidEncoding { .. })
    }
}

/// Compression of a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Zip,
}

impl Compression {
    /// Picks the compression from a file name or URL.
    ///
    /// # Examples
    ///
    /// ```
    /// use ownergraph::reader::Compression;
    ///
    /// assert_eq!(Compression::from_hint("psc-snapshot.txt.gz"), Compression::Gzip);
    /// assert_eq!(Compression::from_hint("https://example.org/psc.zip"), Compression::Zip);
    /// assert_eq!(Compression::from_hint("records.ndjson"), Compression::None);
    /// ```
    #[must_use]
    pub fn from_hint(hint: &str) -> Self {
        let lower = hint.to_ascii_lowercase();
        if lower.ends_with(".gz") || lower.ends_with(".gzip") {
            Self::Gzip
        } else if lower.ends_with(".zip") {
            Self::Zip
        } else {
            Self::None
        }
    }
}

/// Lazy iterator over the non-blank lines of a source.
pub struct Lines<'a> {
    inner: Box<dyn BufRead + 'a>,
    buf: Vec<u8>,
    line: u64,
    done: bool,
}

impl<'a> Lines<'a> {
    fn new(inner: impl BufRead + 'a) -> Self {
        Self {
            inner: Box::new(inner),
            buf: Vec::new(),
            line: 0,
            done: false,
        }
    }
}

impl Iterator for Lines<'_> {
    type Item = Result<String, ReaderError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.buf.clear();
            match self.inner.read_until(b'\n', &mut self.buf) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    self.line += 1;
                    let Ok(text) = std::str::from_utf8(&self.buf) else {
                        return Some(Err(ReaderError::InvalidEncoding { line: self.line }));
                    };
                    let line = text.trim_end_matches(['\r', '\n']);
                    if line.trim().is_empty() {
                        continue;
                    }
                    return Some(Ok(line.to_string()));
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err.into()));
                }
            }
        }
        None
    }
}

/// Opens `input` with the given compression and hands its lines to `f`.
///
/// Zip archives are checked before `f` runs: an empty archive or one with
/// more than one member fails without yielding a single line.
pub fn with_lines<R, T, F>(input: R, compression: Compression, f: F) -> Result<T, ReaderError>
where
    R: Read + Seek,
    F: FnOnce(Lines<'_>) -> T,
{
    match compression {
        Compression::None => Ok(f(Lines::new(BufReader::new(input)))),
        Compression::Gzip => Ok(f(Lines::new(BufReader::new(MultiGzDecoder::new(input))))),
        Compression::Zip => {
            let mut archive = ZipArchive::new(input)?;
            match archive.len() {
                0 => return Err(ReaderError::EmptyArchive),
                1 => {}
                count => return Err(ReaderError::MultipleArchiveMembers { count }),
            }
            let member = archive.by_index(0)?;
            Ok(f(Lines::new(BufReader::new(member))))
        }
    }
}

/// Like [`with_lines`] for streams that cannot seek, such as pipes. A zip
/// stream is buffered in memory because its directory sits at the end.
pub fn with_lines_unseekable<R, T, F>(mut input: R, compression: Compression, f: F) -> Result<T, ReaderError>
where
    R: Read,
    F: FnOnce(Lines<'_>) -> T,
{
    match compression {
        Compression::None => Ok(f(Lines::new(BufReader::new(input)))),
        Compression::Gzip => Ok(f(Lines::new(BufReader::new(MultiGzDecoder::new(input))))),
        Compression::Zip => {
            let mut bytes = Vec::new();
            input.read_to_end(&mut bytes)?;
            with_lines(Cursor::new(bytes), Compression::Zip, f)
        }
    }
}

/// Opens a file, picking the compression from its extension.
pub fn open_path<T, F>(path: impl AsRef<Path>, f: F) -> Result<T, ReaderError>
where
    F: FnOnce(Lines<'_>) -> T,
{
    let path = path.as_ref();
    let compression = Compression::from_hint(&path.to_string_lossy());
    let file = File::open(path)?;
    with_lines(file, compression, f)
}
