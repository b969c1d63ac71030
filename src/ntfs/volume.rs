//! Raw volume access
//!
//! Absolute-offset reads from a volume device, a disk image or an in-memory
//! buffer. Short reads and I/O failures surface as `MftError::VolumeAccess`.

use crate::error::{MftError, Result};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

/// A readable block source holding an NTFS volume
pub trait VolumeSource: Send {
    /// Read up to `buffer.len()` bytes at a volume-relative offset
    fn read_at(&mut self, offset: u64, buffer: &mut [u8]) -> io::Result<usize>;
}

/// Any seekable reader: image files, Unix block devices, `Cursor<Vec<u8>>`
pub struct ImageSource<R> {
    inner: R,
}

impl<R: Read + Seek + Send> ImageSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek + Send> VolumeSource for ImageSource<R> {
    fn read_at(&mut self, offset: u64, buffer: &mut [u8]) -> io::Result<usize> {
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.read(buffer)
    }
}

/// An opened volume: a named source plus read accounting
pub struct Volume {
    name: String,
    source: Box<dyn VolumeSource>,
    bytes_read: u64,
}

impl Volume {
    pub fn new(name: impl Into<String>, source: impl VolumeSource + 'static) -> Self {
        Self {
            name: name.into(),
            source: Box::new(source),
            bytes_read: 0,
        }
    }

    /// Volume identifier used in error messages
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total bytes returned by the source so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Fill `buffer` from `offset`, failing on a short read
    pub fn read_exact_at(&mut self, offset: u64, buffer: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buffer.len() {
            let n = match self
                .source
                .read_at(offset + filled as u64, &mut buffer[filled..])
            {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(MftError::VolumeAccess(self.name.clone(), e)),
            };
            if n == 0 {
                return Err(MftError::short_read(&self.name, offset, buffer.len(), filled));
            }
            filled += n;
            self.bytes_read += n as u64;
        }
        Ok(())
    }
}

/// Extract a drive letter from `C`, `C:`, `C:\` or `\\.\C:`
pub fn parse_drive_letter(identifier: &str) -> Option<char> {
    let trimmed = identifier
        .strip_prefix(r"\\.\")
        .unwrap_or(identifier)
        .trim_end_matches(['\\', '/']);
    let mut chars = trimmed.chars();
    let letter = chars.next()?;
    let rest = chars.as_str();
    if letter.is_ascii_alphabetic() && (rest.is_empty() || rest == ":") {
        Some(letter.to_ascii_uppercase())
    } else {
        None
    }
}

/// Open a volume for raw reading.
///
/// Drive identifiers open the Windows volume device; anything else is
/// opened as a path (disk image, or a block device on Unix).
pub fn open_volume(identifier: &str) -> Result<Volume> {
    #[cfg(windows)]
    {
        if let Some(letter) = parse_drive_letter(identifier) {
            let source = crate::ntfs::winapi::DeviceSource::open(letter)?;
            return Ok(Volume::new(format!("{}:", letter), source));
        }
    }

    let file = File::open(identifier)
        .map_err(|e| MftError::VolumeAccess(identifier.to_string(), e))?;
    Ok(Volume::new(identifier, ImageSource::new(file)))
}
