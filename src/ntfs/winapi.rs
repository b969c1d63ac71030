//! Windows volume device access
//!
//! Safe wrappers around the Win32 calls needed to read `\\.\X:` directly.

use crate::error::{MftError, Result};
use crate::ntfs::volume::VolumeSource;
use std::ffi::OsStr;
use std::io;
use std::os::windows::ffi::OsStrExt;

pub const GENERIC_READ: u32 = 0x80000000;
pub const FILE_SHARE_READ: u32 = 0x00000001;
pub const FILE_SHARE_WRITE: u32 = 0x00000002;
pub const FILE_FLAG_SEQUENTIAL_SCAN: u32 = 0x08000000;

pub const INVALID_HANDLE_VALUE: isize = -1;

/// Raw volume handles only accept I/O on sector boundaries. 4096 covers
/// both 512-byte and 4K-native sectors.
const DEVICE_ALIGNMENT: u64 = 4096;

// ============================================================================
// Safe Handle Wrapper
// ============================================================================

/// RAII wrapper for Windows HANDLE
pub struct SafeHandle {
    handle: isize,
}

impl SafeHandle {
    /// Create from raw handle
    pub fn new(handle: isize) -> Option<Self> {
        if handle == INVALID_HANDLE_VALUE || handle == 0 {
            None
        } else {
            Some(Self { handle })
        }
    }

    fn raw(&self) -> windows::Win32::Foundation::HANDLE {
        windows::Win32::Foundation::HANDLE(self.handle as *mut std::ffi::c_void)
    }
}

impl Drop for SafeHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = windows::Win32::Foundation::CloseHandle(self.raw());
        }
    }
}

// ============================================================================
// Volume Operations
// ============================================================================

/// Open a volume by device path for raw read access
pub fn open_volume_path(path: &str) -> Result<SafeHandle> {
    use windows::core::PCWSTR;
    use windows::Win32::Storage::FileSystem::{
        CreateFileW, FILE_FLAGS_AND_ATTRIBUTES, FILE_SHARE_MODE, OPEN_EXISTING,
    };

    let wide_path: Vec<u16> = OsStr::new(path)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();

    let handle = unsafe {
        CreateFileW(
            PCWSTR::from_raw(wide_path.as_ptr()),
            GENERIC_READ,
            FILE_SHARE_MODE(FILE_SHARE_READ | FILE_SHARE_WRITE),
            None,
            OPEN_EXISTING,
            FILE_FLAGS_AND_ATTRIBUTES(FILE_FLAG_SEQUENTIAL_SCAN),
            None,
        )
    };

    match handle {
        Ok(h) => SafeHandle::new(h.0 as isize).ok_or_else(|| {
            MftError::VolumeAccess(path.to_string(), io::Error::last_os_error())
        }),
        Err(e) => Err(MftError::VolumeAccess(
            path.to_string(),
            io::Error::from_raw_os_error(e.code().0),
        )),
    }
}

/// Read raw bytes from the volume at an absolute offset
pub fn read_volume_at(handle: &SafeHandle, offset: u64, buffer: &mut [u8]) -> io::Result<usize> {
    use windows::Win32::Storage::FileSystem::{ReadFile, SetFilePointerEx, FILE_BEGIN};

    unsafe { SetFilePointerEx(handle.raw(), offset as i64, None, FILE_BEGIN) }
        .map_err(|e| io::Error::from_raw_os_error(e.code().0))?;

    let mut bytes_read: u32 = 0;
    unsafe { ReadFile(handle.raw(), Some(buffer), Some(&mut bytes_read), None) }
        .map_err(|e| io::Error::from_raw_os_error(e.code().0))?;

    Ok(bytes_read as usize)
}

// ============================================================================
// Device Source
// ============================================================================

/// `\\.\X:` volume device as a [`VolumeSource`]
pub struct DeviceSource {
    handle: SafeHandle,
    bounce: Vec<u8>,
}

impl DeviceSource {
    pub fn open(drive_letter: char) -> Result<Self> {
        let path = format!("\\\\.\\{}:", drive_letter);
        Ok(Self {
            handle: open_volume_path(&path)?,
            bounce: Vec::new(),
        })
    }
}

impl VolumeSource for DeviceSource {
    fn read_at(&mut self, offset: u64, buffer: &mut [u8]) -> io::Result<usize> {
        let aligned_start = offset - offset % DEVICE_ALIGNMENT;
        let end = offset + buffer.len() as u64;
        let aligned_end = end.div_ceil(DEVICE_ALIGNMENT) * DEVICE_ALIGNMENT;

        if aligned_start == offset && aligned_end == end {
            return read_volume_at(&self.handle, offset, buffer);
        }

        self.bounce.resize((aligned_end - aligned_start) as usize, 0);
        let n = read_volume_at(&self.handle, aligned_start, &mut self.bounce)?;
        let skip = (offset - aligned_start) as usize;
        if n <= skip {
            return Ok(0);
        }
        let available = (n - skip).min(buffer.len());
        buffer[..available].copy_from_slice(&self.bounce[skip..skip + available]);
        Ok(available)
    }
}
