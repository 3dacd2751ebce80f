//! Opening of raw, compressed and archived monitor logs.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use tracing::{debug, trace};

use crate::game_constants::LOG_ENTRY_SUFFIX;
use crate::{ErrorKind, Result};

/// One step of unpacking, derived from the file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerLayer {
    Gzip,
    Bzip2,
    Tar,
    Zip,
}

impl ContainerLayer {
    /// Whether the layer picks an entry and so ends the chain.
    fn selects_entry(self) -> bool {
        matches!(self, ContainerLayer::Tar | ContainerLayer::Zip)
    }
}

/// Layers to peel off `path`, outermost first.
///
/// Only the last two suffixes of the lower-cased file name are considered,
/// with `tgz` and `tbz2` standing for `tar.gz` and `tar.bz2`. The chain ends
/// at the first archive layer or at the first suffix that is not a container.
pub fn container_chain(path: &Path) -> Vec<ContainerLayer> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let parts: Vec<&str> = name.split('.').collect();
    let mut suffixes = Vec::new();
    for part in &parts[parts.len().saturating_sub(2)..] {
        match *part {
            "tgz" => suffixes.extend(["tar", "gz"]),
            "tbz2" => suffixes.extend(["tar", "bz2"]),
            other => suffixes.push(other),
        }
    }

    let mut chain = Vec::new();
    for suffix in suffixes.iter().rev() {
        let layer = match *suffix {
            "gz" => ContainerLayer::Gzip,
            "bz2" => ContainerLayer::Bzip2,
            "tar" => ContainerLayer::Tar,
            "zip" => ContainerLayer::Zip,
            _ => break,
        };
        chain.push(layer);
        if layer.selects_entry() {
            break;
        }
    }
    chain
}

enum StreamInner {
    /// Plain file on disk; positions map directly to file offsets.
    Raw(BufReader<File>),
    Decoded(Box<dyn BufRead + Send>),
}

/// Line source over a log, counting the bytes handed out so that callers can
/// remember where each line started.
pub struct LogStream {
    path: PathBuf,
    inner: StreamInner,
    position: u64,
}

impl std::fmt::Debug for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStream")
            .field("path", &self.path)
            .field("seekable", &self.is_seekable())
            .field("position", &self.position)
            .finish()
    }
}

impl LogStream {
    /// Opens `path`, unpacking it according to [`container_chain`].
    pub fn open(path: &Path) -> Result<Self> {
        let chain = container_chain(path);
        debug!("opening {path:?} through {chain:?}");

        let file = File::open(path)?;
        let inner = if chain.is_empty() {
            StreamInner::Raw(BufReader::new(file))
        } else {
            let mut reader: Box<dyn BufRead + Send> = Box::new(BufReader::new(file));
            for layer in chain {
                reader = match layer {
                    ContainerLayer::Gzip => Box::new(BufReader::new(GzDecoder::new(reader))),
                    ContainerLayer::Bzip2 => Box::new(BufReader::new(BzDecoder::new(reader))),
                    ContainerLayer::Tar => Box::new(Cursor::new(select_tar_entry(path, reader)?)),
                    ContainerLayer::Zip => Box::new(Cursor::new(single_zip_entry(path, reader)?)),
                };
            }
            StreamInner::Decoded(reader)
        };

        Ok(LogStream {
            path: path.to_path_buf(),
            inner,
            position: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offset of the next unread byte in the unpacked stream.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// True when offsets can be reached without unpacking from the start.
    pub fn is_seekable(&self) -> bool {
        matches!(self.inner, StreamInner::Raw(_))
    }

    /// Appends the next line, including its terminator, to `buf`.
    /// Returns 0 at the end of the stream.
    pub fn read_line(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        let n = match &mut self.inner {
            StreamInner::Raw(r) => r.read_until(b'\n', buf)?,
            StreamInner::Decoded(r) => r.read_until(b'\n', buf)?,
        };
        self.position += n as u64;
        Ok(n)
    }

    /// Moves to `offset` in the unpacked stream.
    ///
    /// Raw files seek. Unpacked streams skip forward, and re-open the
    /// container when the offset lies behind the current position.
    pub fn reposition(&mut self, offset: u64) -> Result<()> {
        if offset == self.position {
            return Ok(());
        }
        if let StreamInner::Raw(r) = &mut self.inner {
            r.seek(SeekFrom::Start(offset))?;
            self.position = offset;
            return Ok(());
        }

        if offset < self.position {
            trace!("re-opening {:?} to reach offset {offset}", self.path);
            *self = LogStream::open(&self.path)?;
        }
        let skip = offset - self.position;
        let skipped = match &mut self.inner {
            StreamInner::Raw(r) => io::copy(&mut r.by_ref().take(skip), &mut io::sink())?,
            StreamInner::Decoded(r) => io::copy(&mut r.by_ref().take(skip), &mut io::sink())?,
        };
        self.position += skipped;
        if skipped < skip {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("log ended before offset {offset}"),
            )
            .into());
        }
        Ok(())
    }
}

/// Picks the log out of a tar archive and returns its contents.
///
/// The first regular file whose path ends with the monitor log suffix wins.
/// Failing that, an archive holding a single regular file yields that file.
fn select_tar_entry(path: &Path, reader: impl Read) -> Result<Vec<u8>> {
    let mut archive = tar::Archive::new(reader);
    let mut only_file: Option<Vec<u8>> = None;
    let mut regular_files = 0usize;

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        regular_files += 1;
        let name = entry.path()?.to_string_lossy().into_owned();
        trace!("tar entry {name}");

        if name.ends_with(LOG_ENTRY_SUFFIX) {
            debug!("selected tar entry {name}");
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            return Ok(data);
        }
        if regular_files == 1 {
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            only_file = Some(data);
        }
    }

    match only_file {
        Some(data) if regular_files == 1 => Ok(data),
        _ => Err(ErrorKind::LogEntryNotFound {
            path: path.to_path_buf(),
            suffix: LOG_ENTRY_SUFFIX,
        }
        .into()),
    }
}

/// Returns the contents of the only entry of a zip archive.
fn single_zip_entry(path: &Path, mut reader: impl Read) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;

    if archive.len() != 1 {
        return Err(ErrorKind::UnsupportedContainer {
            path: path.to_path_buf(),
            reason: format!("zip holds {} entries, expected exactly one", archive.len()),
        }
        .into());
    }

    let mut entry = archive.by_index(0)?;
    let mut data = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut data)?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use flate2::{Compression, write::GzEncoder};
    use tempfile::TempDir;

    const LOG: &[u8] = b"(one)\n(two)\n(three)\n";

    fn tar_bytes(entries: &[(&str, Option<&[u8]>)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            match data {
                Some(data) => {
                    header.set_entry_type(tar::EntryType::Regular);
                    header.set_size(data.len() as u64);
                    header.set_mode(0o644);
                    header.set_cksum();
                    builder.append_data(&mut header, name, *data).unwrap();
                }
                None => {
                    header.set_entry_type(tar::EntryType::Directory);
                    header.set_size(0);
                    header.set_mode(0o755);
                    header.set_cksum();
                    builder.append_data(&mut header, name, io::empty()).unwrap();
                }
            }
        }
        builder.into_inner().unwrap()
    }

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn write(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    fn read_all(path: &Path) -> Result<Vec<u8>> {
        let mut stream = LogStream::open(path)?;
        let mut out = Vec::new();
        while stream.read_line(&mut out)? > 0 {}
        Ok(out)
    }

    #[test]
    fn chain_follows_last_two_suffixes() {
        use ContainerLayer::*;
        let chain = |name: &str| container_chain(Path::new(name));
        assert_eq!(chain("sparkmonitor.log"), vec![]);
        assert_eq!(chain("game.log.gz"), vec![Gzip]);
        assert_eq!(chain("game.tar.gz"), vec![Gzip, Tar]);
        assert_eq!(chain("GAME.TGZ"), vec![Gzip, Tar]);
        assert_eq!(chain("game.tbz2"), vec![Bzip2, Tar]);
        assert_eq!(chain("game.tar"), vec![Tar]);
        assert_eq!(chain("game.zip"), vec![Zip]);
        assert_eq!(chain("noext"), vec![]);
    }

    #[test]
    fn opens_gzip_and_bzip2() {
        let dir = tempfile::tempdir().unwrap();
        let gz = write(&dir, "a.log.gz", &gzip(LOG));
        assert_eq!(read_all(&gz).unwrap(), LOG);

        let mut enc = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        enc.write_all(LOG).unwrap();
        let bz = write(&dir, "a.log.bz2", &enc.finish().unwrap());
        assert_eq!(read_all(&bz).unwrap(), LOG);
    }

    #[test]
    fn tar_entry_in_directory_is_found() {
        let dir = tempfile::tempdir().unwrap();
        let tar = tar_bytes(&[("dir/", None), ("dir/file.log", Some(LOG))]);
        let path = write(&dir, "game.tar.gz", &gzip(&tar));
        assert_eq!(read_all(&path).unwrap(), LOG);
    }

    #[test]
    fn tar_prefers_the_monitor_log_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let tar = tar_bytes(&[
            ("run/readme.txt", Some(b"not a log".as_slice())),
            ("run/sparkmonitor.log", Some(LOG)),
        ]);
        let path = write(&dir, "game.tar", &tar);
        assert_eq!(read_all(&path).unwrap(), LOG);
    }

    #[test]
    fn tar_without_a_candidate_fails() {
        let dir = tempfile::tempdir().unwrap();
        let tar = tar_bytes(&[
            ("a.txt", Some(b"a".as_slice())),
            ("b.txt", Some(b"b".as_slice())),
        ]);
        let path = write(&dir, "game.tar", &tar);
        let err = LogStream::open(&path).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::LogEntryNotFound { .. }));
    }

    #[test]
    fn zip_needs_exactly_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let one = write(&dir, "one.zip", &zip_bytes(&[("game.log", LOG)]));
        assert_eq!(read_all(&one).unwrap(), LOG);

        for (name, entries) in [
            ("none.zip", vec![]),
            ("two.zip", vec![("a.log", LOG), ("b.log", LOG)]),
        ] {
            let path = write(&dir, name, &zip_bytes(&entries));
            let err = LogStream::open(&path).unwrap_err();
            assert!(
                matches!(err.kind, ErrorKind::UnsupportedContainer { .. }),
                "{name} gave {err:?}"
            );
        }
    }

    #[test]
    fn reposition_reopens_compressed_streams() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "a.gz", &gzip(LOG));
        let mut stream = LogStream::open(&path).unwrap();
        assert!(!stream.is_seekable());

        let mut line = Vec::new();
        stream.read_line(&mut line).unwrap();
        stream.read_line(&mut line).unwrap();
        stream.reposition(6).unwrap();
        line.clear();
        stream.read_line(&mut line).unwrap();
        assert_eq!(line, b"(two)\n");
        assert_eq!(stream.position(), 12);

        assert!(stream.reposition(1000).is_err());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = LogStream::open(Path::new("/nonexistent/sparkmonitor.log")).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Io(_)));
    }
}
