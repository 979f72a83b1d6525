use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use std::path::PathBuf;

use crate::format::FormatOptions;
use crate::types::{Encoding, ScanConfig, BLOCK_SIZE, MAX_CARD_BYTES, MIN_CARD_BYTES};

/// GameCube memory card inspection and lost-file recovery
#[derive(Parser, Debug, Clone)]
#[command(name = "gcn-recover")]
#[command(version)]
#[command(about = "GameCube memory card inspection and lost-file recovery", long_about = None)]
pub struct Args {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show header, table state and file list
    Info {
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        /// Use this directory table copy instead of the card's choice
        #[arg(long = "dat")]
        dat: Option<u8>,

        /// Use this block table copy instead of the card's choice
        #[arg(long = "bat")]
        bat: Option<u8>,
    },

    /// Search for lost files and list the ones that can be recovered
    Scan {
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        /// Skip the inactive directory table
        #[arg(long = "no-inactive-dat")]
        no_inactive_dat: bool,

        /// Skip scanning unused data blocks
        #[arg(long = "no-block-pool")]
        no_block_pool: bool,

        /// Worker threads (0 = auto)
        #[arg(long = "threads", default_value = "0")]
        threads: usize,

        /// Write a JSON report to this path
        #[arg(long = "json", value_name = "OUT")]
        json: Option<PathBuf>,
    },

    /// Create a blank card image
    Format {
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        /// Card size in blocks, system blocks included
        #[arg(long = "blocks", default_value = "2048")]
        blocks: u16,

        #[arg(long = "encoding", value_enum, default_value = "ansi")]
        encoding: EncodingArg,
    },

    /// Print or save the raw bytes of one block
    DumpBlock {
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        #[arg(value_name = "INDEX")]
        index: u16,

        /// Write the block to a file instead of printing hex
        #[arg(long = "out")]
        out: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingArg {
    Ansi,
    Sjis,
}

impl From<EncodingArg> for Encoding {
    fn from(arg: EncodingArg) -> Self {
        match arg {
            EncodingArg::Ansi => Encoding::Ansi,
            EncodingArg::Sjis => Encoding::ShiftJis,
        }
    }
}

impl Args {
    /// Validate the arguments
    pub fn validate(&self) -> Result<(), String> {
        if self.image().as_os_str().is_empty() {
            return Err("Image path cannot be empty".to_string());
        }

        match &self.command {
            Command::Info { dat, bat, .. } => {
                for (name, idx) in [("dat", dat), ("bat", bat)] {
                    if let Some(idx) = idx {
                        if *idx > 1 {
                            return Err(format!("--{} must be 0 or 1, got {}", name, idx));
                        }
                    }
                }
            }
            Command::Format { blocks, .. } => {
                let min = (MIN_CARD_BYTES / BLOCK_SIZE as u64) as u16;
                let max = (MAX_CARD_BYTES / BLOCK_SIZE as u64) as u16;
                if !blocks.is_power_of_two() || *blocks < min || *blocks > max {
                    return Err(format!(
                        "blocks must be a power of two between {} and {}, got {}",
                        min, max, blocks
                    ));
                }
            }
            Command::Scan { .. } | Command::DumpBlock { .. } => {}
        }

        Ok(())
    }

    pub fn image(&self) -> &PathBuf {
        match &self.command {
            Command::Info { image, .. }
            | Command::Scan { image, .. }
            | Command::Format { image, .. }
            | Command::DumpBlock { image, .. } => image,
        }
    }

    /// Log level from the -v count
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    /// Scanner configuration for the `scan` command
    pub fn scan_config(&self) -> Option<ScanConfig> {
        match &self.command {
            Command::Scan {
                no_inactive_dat,
                no_block_pool,
                threads,
                ..
            } => Some(ScanConfig {
                num_threads: *threads,
                include_inactive_dat: !no_inactive_dat,
                scan_block_pool: !no_block_pool,
                ..Default::default()
            }),
            _ => None,
        }
    }

    /// Format options for the `format` command
    pub fn format_options(&self) -> Option<FormatOptions> {
        match &self.command {
            Command::Format {
                blocks, encoding, ..
            } => Some(FormatOptions {
                size_in_blocks: *blocks,
                encoding: (*encoding).into(),
                serial: None,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scan() {
        let args = Args::parse_from([
            "gcn-recover", "-vv", "scan", "card.raw", "--no-block-pool", "--threads", "4",
        ]);
        assert!(args.validate().is_ok());
        assert_eq!(args.log_level(), LevelFilter::Trace);
        assert_eq!(args.image(), &PathBuf::from("card.raw"));

        let config = args.scan_config().unwrap();
        assert_eq!(config.num_threads, 4);
        assert!(config.include_inactive_dat);
        assert!(!config.scan_block_pool);
        assert!(args.format_options().is_none());
    }

    #[test]
    fn test_format_validation() {
        let args = Args::parse_from(["gcn-recover", "format", "new.raw", "--blocks", "251"]);
        assert!(args.validate().is_err());

        let args = Args::parse_from(["gcn-recover", "format", "new.raw", "--blocks", "4096"]);
        assert!(args.validate().is_err());

        let args = Args::parse_from([
            "gcn-recover", "format", "new.raw", "--blocks", "256", "--encoding", "sjis",
        ]);
        assert!(args.validate().is_ok());
        let options = args.format_options().unwrap();
        assert_eq!(options.size_in_blocks, 256);
        assert_eq!(options.encoding, Encoding::ShiftJis);
    }

    #[test]
    fn test_info_table_index_validation() {
        let args = Args::parse_from(["gcn-recover", "info", "card.raw", "--dat", "2"]);
        assert!(args.validate().is_err());
        let args = Args::parse_from(["gcn-recover", "info", "card.raw", "--bat", "1"]);
        assert!(args.validate().is_ok());
        assert_eq!(args.log_level(), LevelFilter::Info);
    }

    #[test]
    fn test_dump_block_args() {
        let args = Args::parse_from(["gcn-recover", "dump-block", "card.raw", "7", "--out", "b7.bin"]);
        match args.command {
            Command::DumpBlock { index, out, .. } => {
                assert_eq!(index, 7);
                assert_eq!(out, Some(PathBuf::from("b7.bin")));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
