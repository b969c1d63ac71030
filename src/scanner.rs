//! Main Scanner Module
//!
//! Collaborator-facing entry points around `MftReader`: a logged,
//! progress-reporting single-volume scan and concurrent multi-volume scans.

use crate::config::ScanConfig;
use crate::error::Result;
use crate::logging;
use crate::ntfs::volume::open_volume;
use crate::reader::MftReader;
use crossbeam_channel::unbounded;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use std::time::Instant;

// ============================================================================
// Volume Scanner
// ============================================================================

/// Scanner for a single volume
pub struct VolumeScanner {
    /// Volume identifier (`C:`, image path, ...)
    volume: String,
    config: ScanConfig,
    /// Shared bar container when several scans run at once
    multi: Option<MultiProgress>,
}

impl VolumeScanner {
    pub fn new(volume: impl Into<String>) -> Self {
        Self {
            volume: volume.into(),
            config: ScanConfig::default(),
            multi: None,
        }
    }

    /// Configure the scanner
    pub fn with_config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    fn with_multi_progress(mut self, multi: MultiProgress) -> Self {
        self.multi = Some(multi);
        self
    }

    pub fn volume(&self) -> &str {
        &self.volume
    }

    /// Open the volume and build its node table
    pub fn scan(&self) -> Result<MftReader> {
        let start_time = Instant::now();
        let options = self.config.reader_options();

        logging::separator(&format!("SCAN START: {}", self.volume));
        info!(
            target: "SCANNER",
            "Config: mode=0x{:X}, io_buffer={}, separator={:?}",
            options.mode.bits(),
            options.io_buffer_size,
            options.path_separator
        );

        let pb = self.config.show_progress.then(|| self.progress_bar());
        if let Some(ref pb) = pb {
            pb.set_message(format!("Opening {}...", self.volume));
        }

        let volume = open_volume(&self.volume).inspect_err(|e| {
            warn!(target: "SCANNER", "Cannot open {}: {}", self.volume, e);
        })?;

        if let Some(ref pb) = pb {
            pb.set_message(format!("{}: reading MFT", self.volume));
        }

        let reader = MftReader::open_volume_with_progress(volume, options, |position, total| {
            if let Some(ref pb) = pb {
                pb.set_length(total);
                pb.set_position(position);
            }
        })
        .inspect_err(|e| {
            warn!(target: "SCANNER", "Scan of {} failed: {}", self.volume, e);
        })?;

        let stats = reader.stats();
        let geometry = reader.geometry();
        info!(
            target: "SCANNER",
            "Geometry: {} B/sector, {} B/cluster, {} B/record, MFT at LCN {}",
            geometry.bytes_per_sector,
            geometry.bytes_per_cluster,
            geometry.bytes_per_file_record,
            geometry.mft_start_lcn
        );
        for skipped in reader.skipped() {
            debug!(target: "SCANNER", "Skipped record {}: {}", skipped.inode, skipped.reason);
        }
        info!(
            target: "SCANNER",
            "Scan complete: {} nodes, {} skipped, {} slots, {} bytes read, {:.2}s",
            stats.nodes,
            stats.skipped,
            stats.max_inodes,
            stats.bytes_read,
            start_time.elapsed().as_secs_f64()
        );

        if let Some(ref pb) = pb {
            pb.finish_with_message(format!(
                "{}: {} nodes, {} skipped ({:.2}s)",
                self.volume,
                stats.nodes,
                stats.skipped,
                start_time.elapsed().as_secs_f64()
            ));
        }

        Ok(reader)
    }

    fn progress_bar(&self) -> ProgressBar {
        let style = ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
            )
            .map(|s| s.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());

        let pb = ProgressBar::new(0).with_style(style);
        match self.multi {
            Some(ref multi) => multi.add(pb),
            None => pb,
        }
    }
}

// ============================================================================
// Multi-Volume Scanning
// ============================================================================

/// Scan several volumes concurrently, one thread per volume.
///
/// Results come back in completion order. A failing volume does not affect
/// the others.
pub fn scan_volumes(volumes: &[String], config: &ScanConfig) -> Vec<(String, Result<MftReader>)> {
    let (tx, rx) = unbounded();
    let multi = MultiProgress::new();

    logging::separator(&format!("MULTI-VOLUME SCAN: {} volumes", volumes.len()));

    std::thread::scope(|scope| {
        for volume in volumes {
            let tx = tx.clone();
            let scanner = VolumeScanner::new(volume.clone())
                .with_config(config.clone())
                .with_multi_progress(multi.clone());
            scope.spawn(move || {
                let result = scanner.scan();
                let _ = tx.send((scanner.volume, result));
            });
        }
    });
    drop(tx);

    let results: Vec<_> = rx.iter().collect();
    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    info!(
        target: "SCANNER",
        "Multi-volume scan finished: {} ok, {} failed",
        results.len() - failed,
        failed
    );
    results
}
