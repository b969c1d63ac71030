//! Scan configuration
//!
//! `RetrieveMode` selects which optional data the reader materializes,
//! `ReaderOptions` configures one reader and `ScanConfig` is the
//! file-loadable form used by the scanner and the CLI.

use crate::error::{MftError, Result};
use serde::{Deserialize, Serialize};
use std::ops::{BitOr, BitOrAssign};
use std::path::Path;

/// Optional data to materialize while reading the MFT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RetrieveMode(u32);

impl RetrieveMode {
    /// Names, parents, sizes and flags only
    pub const MINIMAL: Self = Self(0);
    /// Keep $STANDARD_INFORMATION timestamps per node
    pub const STANDARD_INFO: Self = Self(0x1);
    /// Keep the fragment list of every non-resident stream
    pub const FRAGMENTS: Self = Self(0x2);
    /// Enumerate every data stream, resident and alternate ones included
    pub const STREAMS: Self = Self(0x4);
    pub const ALL: Self = Self(0x7);

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether any per-node stream list is kept
    pub fn keeps_streams(&self) -> bool {
        self.0 & (Self::FRAGMENTS.0 | Self::STREAMS.0) != 0
    }
}

impl BitOr for RetrieveMode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for RetrieveMode {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Options for a single `MftReader`
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub mode: RetrieveMode,
    /// Upper bound of one MFT chunk read, in bytes
    pub io_buffer_size: usize,
    /// Separator used when joining path segments
    pub path_separator: char,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            mode: RetrieveMode::MINIMAL,
            io_buffer_size: 1024 * 1024,
            path_separator: '\\',
        }
    }
}

impl ReaderOptions {
    pub fn with_mode(mut self, mode: RetrieveMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Configuration for the scanner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Keep creation/modification/access timestamps
    pub timestamps: bool,
    /// Keep per-stream fragment maps
    pub fragments: bool,
    /// Enumerate all data streams
    pub streams: bool,
    /// MFT chunk size in bytes
    pub io_buffer_size: usize,
    /// Show progress during scan
    pub show_progress: bool,
    pub path_separator: char,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let options = ReaderOptions::default();
        Self {
            timestamps: false,
            fragments: false,
            streams: false,
            io_buffer_size: options.io_buffer_size,
            show_progress: true,
            path_separator: options.path_separator,
        }
    }
}

impl ScanConfig {
    /// Load a JSON configuration file; missing keys keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| MftError::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| MftError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn retrieve_mode(&self) -> RetrieveMode {
        let mut mode = RetrieveMode::MINIMAL;
        if self.timestamps {
            mode |= RetrieveMode::STANDARD_INFO;
        }
        if self.fragments {
            mode |= RetrieveMode::FRAGMENTS;
        }
        if self.streams {
            mode |= RetrieveMode::STREAMS;
        }
        mode
    }

    pub fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            mode: self.retrieve_mode(),
            io_buffer_size: self.io_buffer_size,
            path_separator: self.path_separator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retrieve_mode_flags() {
        let mode = RetrieveMode::STANDARD_INFO | RetrieveMode::FRAGMENTS;
        assert!(mode.contains(RetrieveMode::STANDARD_INFO));
        assert!(mode.contains(RetrieveMode::FRAGMENTS));
        assert!(!mode.contains(RetrieveMode::STREAMS));
        assert!(mode.keeps_streams());
        assert!(!RetrieveMode::MINIMAL.keeps_streams());
        assert!(RetrieveMode::ALL.contains(mode));
    }

    #[test]
    fn test_scan_config_partial_json() {
        let config: ScanConfig =
            serde_json::from_str(r#"{ "timestamps": true, "io_buffer_size": 65536 }"#).unwrap();
        assert!(config.timestamps);
        assert!(!config.fragments);
        assert!(config.show_progress);
        let options = config.reader_options();
        assert_eq!(options.mode, RetrieveMode::STANDARD_INFO);
        assert_eq!(options.io_buffer_size, 65536);
        assert_eq!(options.path_separator, '\\');
    }

    #[test]
    fn test_scan_config_load_missing_file() {
        let err = ScanConfig::load(Path::new("/nonexistent/mftindex.json")).unwrap_err();
        assert!(matches!(err, MftError::Config(_)));
    }
}
