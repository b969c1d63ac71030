//! mftindex - NTFS Master File Table reader
//!
//! Builds a compact in-memory table of every live file-system object on an
//! NTFS volume by reading the MFT directly, then answers path-prefix queries
//! over it in parallel. Used as the discovery stage of a file-integrity
//! monitor: enumerate files fast, then hand their streams to a hasher.
//!
//! # Example
//!
//! ```no_run
//! use mftindex::{MftReader, ReaderOptions, RetrieveMode};
//!
//! fn main() -> mftindex::Result<()> {
//!     let options = ReaderOptions::default().with_mode(RetrieveMode::STANDARD_INFO);
//!     let reader = MftReader::open_with("C:", options)?;
//!
//!     println!("Nodes: {}", reader.len());
//!     println!("Skipped: {}", reader.skipped().len());
//!
//!     for node in reader.nodes_under("Windows\\System32\\drivers")? {
//!         println!("{} ({} bytes)", node.full_path()?, node.size());
//!     }
//!
//!     reader.close();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod node_table;
pub mod ntfs;
pub mod query;
pub mod reader;
pub mod scanner;

// Re-export main types
pub use config::{ReaderOptions, RetrieveMode, ScanConfig};
pub use error::{MftError, Result};
pub use node_table::{NameInterner, Node, NodeTable, Stream};
pub use query::{NodeRecord, NodeView, StreamRecord};
pub use reader::{MftReader, ScanStats, SkippedRecord};
pub use scanner::{scan_volumes, VolumeScanner};

// Re-export NTFS types that users might need
pub use ntfs::{
    Fragment, ImageSource, SkipReason, StandardTimes, StreamKind, VolumeGeometry, VolumeSource,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
