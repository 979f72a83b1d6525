use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::info;
use std::fs;

use gcn_recover::cli::{Args, Command};
use gcn_recover::report;
use gcn_recover::{Card, EntryScanner, BLOCK_SIZE};

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or(args.log_level().to_string()))
        .format_timestamp(None)
        .init();

    if let Err(e) = args.validate() {
        eprintln!("Invalid arguments: {}", e);
        std::process::exit(2);
    }

    if let Err(e) = run(&args) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    match &args.command {
        Command::Info { image, dat, bat } => {
            let mut card = open(image)?;
            if let Some(idx) = dat {
                card.set_active_dat_idx(*idx)?;
            }
            if let Some(idx) = bat {
                card.set_active_bat_idx(*idx)?;
            }
            print_card(&card);
            print_files(&card);
        }

        Command::Scan { image, json, .. } => {
            let mut card = open(image)?;
            let config = args.scan_config().unwrap_or_default();
            let scanner = EntryScanner::new(config);
            let candidates = scanner.scan(&card);
            let added = card.add_lost_files(&candidates);

            print_card(&card);
            println!();
            println!(
                "Candidates: {}  Recovered: {}",
                candidates.len(),
                added.len()
            );
            print_files(&card);

            if let Some(path) = json {
                let report = report::build_report(&card, candidates.len(), env!("CARGO_PKG_VERSION"));
                report::write_json(&report, path)
                    .with_context(|| format!("writing report to {}", path.display()))?;
                info!("Report written to {}", path.display());
            }
        }

        Command::Format { image, .. } => {
            let options = args.format_options().unwrap_or_default();
            let card = Card::format(image, &options)
                .with_context(|| format!("formatting {}", image.display()))?;
            println!(
                "Formatted {}: {} blocks ({} free), {}",
                image.display(),
                card.size_in_blocks(),
                card.free_blocks(),
                card.encoding()
            );
        }

        Command::DumpBlock { image, index, out } => {
            let card = open(image)?;
            let mut buf = vec![0u8; BLOCK_SIZE];
            card.read_block(*index, &mut buf)?;
            match out {
                Some(path) => {
                    fs::write(path, &buf)
                        .with_context(|| format!("writing {}", path.display()))?;
                    info!("Block {} written to {}", index, path.display());
                }
                None => {
                    for (i, line) in buf.chunks(16).enumerate() {
                        println!("{:04X}: {}", i * 16, hex::encode_upper(line));
                    }
                }
            }
        }
    }
    Ok(())
}

fn open(path: &std::path::Path) -> Result<Card> {
    Card::open(path).with_context(|| format!("opening {}", path.display()))
}

fn print_card(card: &Card) {
    let tables = card.tables();
    println!("Image:        {}", card.path().map(|p| p.display().to_string()).unwrap_or_default());
    println!("Size:         {} blocks ({} bytes)", card.size_in_blocks(), card.filesize());
    println!("Free:         {} of {} blocks", card.free_blocks(), card.size_in_blocks_no_sys());
    println!("Serial:       {}", card.serial_number());
    println!("Encoding:     {}", card.encoding());
    println!("Header sum:   {}", card.header_checksum_value());
    for idx in 0..2u8 {
        if let Some(copy) = tables.dats().copy(idx) {
            println!(
                "DAT {}:        counter {:5}  checksum {}  {}",
                idx,
                copy.table.update_counter,
                copy.checksum,
                if copy.valid { "valid" } else { "INVALID" }
            );
        }
    }
    for idx in 0..2u8 {
        if let Some(copy) = tables.bats().copy(idx) {
            println!(
                "BAT {}:        counter {:5}  checksum {}  {}",
                idx,
                copy.table.update_counter,
                copy.checksum,
                if copy.valid { "valid" } else { "INVALID" }
            );
        }
    }
    println!(
        "Active:       DAT {} (card: {:?}), BAT {} (card: {:?})",
        card.active_dat_idx(),
        card.active_dat_hdr_idx(),
        card.active_bat_idx(),
        card.active_bat_hdr_idx()
    );
    let errors = card.errors();
    if errors.is_empty() {
        println!("Errors:       none");
    } else {
        println!("Errors:       {}", errors.names().join(", "));
    }
}

fn print_files(card: &Card) {
    println!();
    println!("{:>3}  {:6}  {:32}  {:>5}  {:8}  chain", "#", "id", "filename", "len", "kind");
    for (i, file) in card.files().iter().enumerate() {
        let kind = match file.lost_info() {
            Some(lost) => format!("{:?}", lost.basis),
            None => "regular".to_string(),
        };
        let chain: Vec<String> = file.chain().iter().map(|b| b.to_string()).collect();
        let mut line = format!(
            "{:>3}  {:6}  {:32}  {:>5}  {:8}  {}",
            i,
            file.id6(),
            file.filename(),
            file.length(),
            kind,
            chain.join(",")
        );
        if !file.issues().is_empty() {
            line.push_str("  [damaged]");
        }
        println!("{}", line);
    }
}
