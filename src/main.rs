//! mftindex CLI
//!
//! Command-line interface for the MFT reader: scan statistics, prefix
//! listings, JSON export, boot sector geometry and multi-volume scans.

use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use humansize::{format_size, BINARY};
use indicatif::HumanDuration;
use log::{info, LevelFilter};
use mftindex::{scan_volumes, MftError, MftReader, NodeView, ScanConfig, VolumeScanner};
use regex::Regex;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

/// mftindex - NTFS Master File Table indexer
///
/// Reads the MFT of a volume or disk image directly and lists
/// the files it describes.
#[derive(Parser)]
#[command(name = "mftindex")]
#[command(version)]
#[command(about = "NTFS Master File Table indexer", long_about = None)]
struct Cli {
    /// Log verbosity, written to mftindex.log beside the executable
    #[arg(short, long, global = true, value_enum, default_value = "info")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// Options shared by every command that opens a volume
#[derive(clap::Args, Clone)]
struct ScanArgs {
    /// Keep creation/modification/access timestamps
    #[arg(long)]
    timestamps: bool,

    /// Keep per-stream fragment maps
    #[arg(long)]
    fragments: bool,

    /// Enumerate every data stream, alternate streams included
    #[arg(long)]
    streams: bool,

    /// JSON configuration file; flags above are added to it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Hide the progress bar
    #[arg(long)]
    quiet: bool,
}

impl ScanArgs {
    fn to_config(&self) -> mftindex::Result<ScanConfig> {
        let mut config = match self.config {
            Some(ref path) => ScanConfig::load(path)?,
            None => ScanConfig::default(),
        };
        config.timestamps |= self.timestamps;
        config.fragments |= self.fragments;
        config.streams |= self.streams;
        if self.quiet {
            config.show_progress = false;
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a volume and display statistics
    Scan {
        /// Volume to scan (C:, \\.\C:, or an image path)
        volume: String,

        #[command(flatten)]
        args: ScanArgs,

        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// List nodes under a path prefix
    List {
        volume: String,

        /// Case-insensitive path prefix ("" lists everything)
        #[arg(short, long, default_value = "")]
        prefix: String,

        /// Regular expression the full path must match
        #[arg(long)]
        pattern: Option<String>,

        /// Maximum results
        #[arg(short, long, default_value = "100")]
        max: usize,

        #[command(flatten)]
        args: ScanArgs,

        /// Print nodes as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Export every node as a JSON array
    Export {
        volume: String,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Only export nodes under this prefix
        #[arg(short, long, default_value = "")]
        prefix: String,

        #[command(flatten)]
        args: ScanArgs,
    },

    /// Show the decoded boot sector geometry
    Geometry { volume: String },

    /// Dump one stream of a node
    Dump {
        volume: String,

        /// Inode of the node
        inode: u64,

        /// Stream index as listed by `list --streams --json`
        #[arg(short, long, default_value = "0")]
        index: usize,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Scan several volumes concurrently
    Multi {
        volumes: Vec<String>,

        #[command(flatten)]
        args: ScanArgs,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Some(path) = mftindex::logging::init(cli.log_level.into()) {
        eprintln!("{} {}", style("Logging to:").dim(), path.display());
    }
    info!(target: "MAIN", "mftindex {} starting up", mftindex::VERSION);

    let result = match cli.command {
        Commands::Scan { volume, args, json } => cmd_scan(&volume, &args, json),
        Commands::List {
            volume,
            prefix,
            pattern,
            max,
            args,
            json,
        } => cmd_list(&volume, &prefix, pattern.as_deref(), max, &args, json),
        Commands::Export {
            volume,
            output,
            prefix,
            args,
        } => cmd_export(&volume, &output, &prefix, &args),
        Commands::Geometry { volume } => cmd_geometry(&volume),
        Commands::Dump {
            volume,
            inode,
            index,
            output,
        } => cmd_dump(&volume, inode, index, &output),
        Commands::Multi { volumes, args } => cmd_multi(&volumes, &args),
    };

    if let Err(e) = result {
        log::error!(target: "MAIN", "{}", e);
        eprintln!("{} {}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }
}

fn open(volume: &str, args: &ScanArgs) -> mftindex::Result<MftReader> {
    VolumeScanner::new(volume)
        .with_config(args.to_config()?)
        .scan()
}

/// Scan command implementation
fn cmd_scan(volume: &str, args: &ScanArgs, json: bool) -> mftindex::Result<()> {
    let start = Instant::now();
    println!(
        "{} Scanning {}",
        style("→").cyan().bold(),
        style(volume).yellow()
    );

    let reader = open(volume, args)?;
    let elapsed = start.elapsed();
    let nodes = reader.nodes_under("")?;
    let directories = nodes.iter().filter(|n| n.is_directory()).count();
    let total_size: u64 = nodes.iter().filter(|n| !n.is_directory()).map(|n| n.size()).sum();
    let stats = reader.stats();

    if json {
        println!(
            "{}",
            serde_json::json!({
                "volume": volume,
                "nodes": stats.nodes,
                "files": nodes.len() - directories,
                "directories": directories,
                "total_size": total_size,
                "total_size_formatted": format_size(total_size, BINARY),
                "stats": stats,
                "skipped": reader.skipped(),
                "elapsed_seconds": elapsed.as_secs_f64(),
            })
        );
        return Ok(());
    }

    println!();
    println!(
        "{} Scan complete in {}",
        style("✓").green().bold(),
        style(HumanDuration(elapsed)).cyan()
    );
    println!();
    println!("  {} {}", style("Files:").bold(), nodes.len() - directories);
    println!("  {} {}", style("Directories:").bold(), directories);
    println!(
        "  {} {}",
        style("Total Size:").bold(),
        style(format_size(total_size, BINARY)).yellow()
    );
    println!(
        "  {} {} of {} slots",
        style("Records:").bold(),
        stats.records_scanned,
        stats.max_inodes
    );
    if stats.skipped > 0 {
        println!("  {} {}", style("Skipped:").bold(), style(stats.skipped).red());
    }
    println!(
        "  {} {}",
        style("Read:").bold(),
        format_size(stats.bytes_read, BINARY)
    );
    println!();
    println!(
        "  {} {:.0} records/sec",
        style("Speed:").bold(),
        stats.records_scanned as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );

    Ok(())
}

/// List command implementation
fn cmd_list(
    volume: &str,
    prefix: &str,
    pattern: Option<&str>,
    max: usize,
    args: &ScanArgs,
    json: bool,
) -> mftindex::Result<()> {
    let filter = pattern
        .map(Regex::new)
        .transpose()
        .map_err(|e| MftError::Config(format!("invalid pattern: {}", e)))?;

    let reader = open(volume, args)?;
    let mut nodes = reader.nodes_under(prefix)?;
    nodes.sort_unstable_by_key(|n| n.inode());

    let mut shown = 0;
    for node in &nodes {
        if shown >= max {
            break;
        }
        let path = node.full_path()?;
        if let Some(ref re) = filter {
            if !re.is_match(&path) {
                continue;
            }
        }
        shown += 1;

        if json {
            let record = node.to_record()?;
            println!("{}", serde_json::to_string(&record).map_err(std::io::Error::from)?);
        } else {
            print_node(shown, node, &path);
        }
    }

    if !json {
        println!(
            "\n{} {} of {} nodes under '{}'",
            style("✓").green().bold(),
            shown,
            nodes.len(),
            prefix
        );
    }
    Ok(())
}

fn print_node(index: usize, node: &NodeView<'_>, path: &str) {
    let size = if node.is_directory() {
        style("<DIR>".to_string()).blue()
    } else {
        style(format_size(node.size(), BINARY)).yellow()
    };
    println!(
        "{} {:>12} {}",
        style(format!("{:5}.", index)).dim(),
        size,
        style(path).cyan()
    );
}

/// Export command implementation
fn cmd_export(
    volume: &str,
    output: &PathBuf,
    prefix: &str,
    args: &ScanArgs,
) -> mftindex::Result<()> {
    println!(
        "{} Exporting {} to {}",
        style("→").cyan().bold(),
        style(volume).yellow(),
        style(output.display()).yellow()
    );

    let reader = open(volume, args)?;
    let mut nodes = reader.nodes_under(prefix)?;
    nodes.sort_unstable_by_key(|n| n.inode());
    let records = nodes
        .iter()
        .map(|n| n.to_record())
        .collect::<mftindex::Result<Vec<_>>>()?;

    let mut file = BufWriter::new(std::fs::File::create(output)?);
    serde_json::to_writer_pretty(&mut file, &records).map_err(std::io::Error::from)?;
    file.flush()?;

    println!(
        "{} Exported {} nodes to {}",
        style("✓").green().bold(),
        records.len(),
        output.display()
    );
    Ok(())
}

/// Geometry command implementation
fn cmd_geometry(volume: &str) -> mftindex::Result<()> {
    let mut handle = mftindex::ntfs::open_volume(volume)?;
    let mut boot = [0u8; 512];
    handle.read_exact_at(0, &mut boot)?;
    let geometry = mftindex::VolumeGeometry::from_boot_sector(&boot, handle.name())?;

    println!("{} {}", style("Volume:").bold(), style(volume).yellow());
    println!("  {} {}", style("Bytes/sector:").bold(), geometry.bytes_per_sector);
    println!("  {} {}", style("Sectors/cluster:").bold(), geometry.sectors_per_cluster);
    println!("  {} {}", style("Bytes/cluster:").bold(), geometry.bytes_per_cluster);
    println!("  {} {}", style("Bytes/record:").bold(), geometry.bytes_per_file_record);
    println!("  {} {}", style("Bytes/index:").bold(), geometry.bytes_per_index_record);
    println!(
        "  {} {} ({})",
        style("Volume size:").bold(),
        geometry.volume_size(),
        format_size(geometry.volume_size(), BINARY)
    );
    println!("  {} {}", style("MFT LCN:").bold(), geometry.mft_start_lcn);
    println!("  {} {}", style("MFT mirror LCN:").bold(), geometry.mft_mirror_start_lcn);
    println!(
        "  {} {:016X}",
        style("Serial:").bold(),
        geometry.volume_serial_number
    );
    Ok(())
}

/// Dump command implementation
fn cmd_dump(volume: &str, inode: u64, index: usize, output: &PathBuf) -> mftindex::Result<()> {
    let options = mftindex::ReaderOptions::default()
        .with_mode(mftindex::RetrieveMode::FRAGMENTS | mftindex::RetrieveMode::STREAMS);
    let reader = MftReader::open_with(volume, options)?;
    let content = reader.read_stream(inode, index)?;
    reader.close();

    std::fs::write(output, &content)?;
    println!(
        "{} Wrote {} from record {} to {}",
        style("✓").green().bold(),
        format_size(content.len() as u64, BINARY),
        inode,
        output.display()
    );
    Ok(())
}

/// Multi-volume scan implementation
fn cmd_multi(volumes: &[String], args: &ScanArgs) -> mftindex::Result<()> {
    let start = Instant::now();
    let config = args.to_config()?;
    let mut results = scan_volumes(volumes, &config);
    results.sort_by(|a, b| a.0.cmp(&b.0));

    println!();
    for (volume, result) in &results {
        match result {
            Ok(reader) => println!(
                "  {} {}: {} nodes, {} skipped",
                style("✓").green().bold(),
                style(volume).yellow(),
                reader.len(),
                reader.skipped().len()
            ),
            Err(e) => println!(
                "  {} {}: {}",
                style("✗").red().bold(),
                style(volume).yellow(),
                e
            ),
        }
    }
    println!(
        "\n{} {} volumes in {}",
        style("✓").green().bold(),
        results.len(),
        style(HumanDuration(start.elapsed())).cyan()
    );
    Ok(())
}
