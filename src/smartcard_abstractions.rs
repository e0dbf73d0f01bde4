//! Card-access abstractions consumed by the directory walker, plus a
//! filesystem-backed emulator for cards dumped to disk.
//!
//! Paths use the colon-separated file identifier convention, e.g.
//! `:3F00:2F00` for EF.DIR, optionally prefixed with an application id
//! and `#`.

use std::fs;
use std::path::PathBuf;

use simplelog::error;

use crate::types::CardError;

pub trait CardController {
    type File: CardFile;

    /// Selects the application with the given id (hex string).
    fn select_application(&mut self, aid: &str) -> Result<(), CardError>;

    /// Opens the elementary file at a colon-separated path.
    fn open(&mut self, path: &str) -> Result<Self::File, CardError>;
}

pub trait CardFile {
    /// Whether the file is a transparent (binary) EF rather than a
    /// record-oriented one.
    fn is_transparent(&self) -> bool;

    fn length(&self) -> u32;

    /// Reads the whole file.
    fn read_all(&self) -> Result<Vec<u8>, CardError>;

    /// Reads a range; `offset` defaults to 0 and `length` to the rest of
    /// the file.
    fn read_range(&self, offset: Option<u32>, length: Option<u32>) -> Result<Vec<u8>, CardError>;

    /// Reads one record of a record-oriented file. Fails with
    /// [`CardError::NoSuchRecord`] past the last record, which callers
    /// use to terminate record scans.
    fn read_record(&self, record: u8) -> Result<Vec<u8>, CardError>;
}

/// Card emulator backed by a directory tree: each file identifier in a
/// path is a directory or file under the root, and each application id
/// is a directory selectable at the root.
pub struct DirectoryCard {
    root: PathBuf,
    current: PathBuf,
}

impl DirectoryCard {
    pub fn new(root: impl Into<PathBuf>) -> DirectoryCard {
        let root = root.into();
        let current = root.clone();
        DirectoryCard { root, current }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        // drop an "aid#" prefix, the aid was already handled by select
        let path = path.rsplit('#').next().unwrap_or(path);
        let mut resolved = self.current.clone();
        for part in path.split(':').filter(|part| !part.is_empty()) {
            resolved.push(part);
        }
        return resolved;
    }
}

impl CardController for DirectoryCard {
    type File = TransparentFile;

    fn select_application(&mut self, aid: &str) -> Result<(), CardError> {
        let target = self.root.join(aid);
        if !target.is_dir() {
            error!("No emulated application directory at {}", target.display());
            return Err(CardError::SelectFailed(aid.to_string()));
        }
        self.current = target;
        Ok(())
    }

    fn open(&mut self, path: &str) -> Result<Self::File, CardError> {
        let resolved = self.resolve(path);
        let data = fs::read(&resolved).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                CardError::NotFound(path.to_string())
            } else {
                CardError::Io(err.to_string())
            }
        })?;
        Ok(TransparentFile { data })
    }
}

/// A fully buffered transparent EF.
pub struct TransparentFile {
    data: Vec<u8>,
}

impl TransparentFile {
    pub fn new(data: Vec<u8>) -> TransparentFile {
        TransparentFile { data }
    }
}

impl CardFile for TransparentFile {
    fn is_transparent(&self) -> bool {
        true
    }

    fn length(&self) -> u32 {
        self.data.len() as u32
    }

    fn read_all(&self) -> Result<Vec<u8>, CardError> {
        Ok(self.data.clone())
    }

    fn read_range(&self, offset: Option<u32>, length: Option<u32>) -> Result<Vec<u8>, CardError> {
        let offset = offset.unwrap_or(0) as usize;
        if offset > self.data.len() {
            return Err(CardError::OutOfRange(format!(
                "offset {} in a {} byte file",
                offset,
                self.data.len()
            )));
        }
        let remaining = self.data.len() - offset;
        let length = (length.map(|l| l as usize).unwrap_or(remaining)).min(remaining);
        Ok(self.data[offset..offset + length].to_vec())
    }

    fn read_record(&self, _record: u8) -> Result<Vec<u8>, CardError> {
        Err(CardError::NoSuchRecord)
    }
}
