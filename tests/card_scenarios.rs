// End-to-end scenarios over synthetic card images built with the public API

use chrono::{TimeZone, Utc};
use gcn_recover::format::build_image;
use gcn_recover::layout::dir::{FILENAME_LEN, PERM_PUBLIC};
use gcn_recover::layout::{bat_block, dat_block};
use gcn_recover::report;
use gcn_recover::types::BAT_LAST;
use gcn_recover::{
    BlockTable, Card, CardError, CardErrors, CardEvent, ChainBasis, DirEntry, DirectoryTable,
    EntryScanner, FormatOptions, ScanConfig, BLOCK_SIZE,
};
use std::sync::{Arc, Mutex};

fn formatted(blocks: u16) -> Vec<u8> {
    let when = Utc.with_ymd_and_hms(2012, 3, 4, 5, 6, 7).unwrap();
    build_image(&FormatOptions::new(blocks), when).unwrap()
}

fn block_mut(data: &mut [u8], idx: u16) -> &mut [u8] {
    let start = idx as usize * BLOCK_SIZE;
    &mut data[start..start + BLOCK_SIZE]
}

fn entry(gamecode: &[u8; 4], name: &str, block: u16, length: u16) -> DirEntry {
    let mut filename = [0u8; FILENAME_LEN];
    filename[..name.len()].copy_from_slice(name.as_bytes());
    DirEntry {
        gamecode: *gamecode,
        company: *b"8P",
        pad_00: 0xFF,
        banner_fmt: 0x01,
        filename,
        last_modified: 3600,
        image_addr: 0,
        icon_fmt: 0x0001,
        icon_speed: 0x0002,
        permission: PERM_PUBLIC,
        copy_times: 0,
        block,
        length,
        pad_01: 0xFFFF,
        comment_addr: 0,
    }
}

fn edit_dat(data: &mut [u8], copy: u8, edit: impl FnOnce(&mut DirectoryTable)) {
    let block = block_mut(data, dat_block(copy));
    let mut table = DirectoryTable::parse(block).unwrap();
    edit(&mut table);
    table.write_to(block).unwrap();
}

fn edit_bat(data: &mut [u8], copy: u8, size: u16, edit: impl FnOnce(&mut BlockTable)) {
    let block = block_mut(data, bat_block(copy));
    let mut table = BlockTable::parse(block).unwrap();
    edit(&mut table);
    table.free_blocks = table.count_free(size);
    table.write_to(block).unwrap();
}

/// Add a file to the given table copies.
fn add_file(data: &mut [u8], size: u16, copies: &[u8], e: DirEntry, chain: &[u16]) {
    for &copy in copies {
        let e = e.clone();
        edit_dat(data, copy, |t| {
            if let Some(slot) = t.entries.iter_mut().find(|s| s.is_unused()) {
                *slot = e;
            }
        });
        edit_bat(data, copy, size, |t| {
            for pair in chain.windows(2) {
                t.set_entry(pair[0], pair[1]);
            }
            t.set_entry(chain[chain.len() - 1], BAT_LAST);
        });
    }
}

/// Directory entry and chain of every listed file.
fn snapshot(card: &Card) -> Vec<(DirEntry, Vec<u16>)> {
    card.files()
        .iter()
        .map(|f| (f.entry().clone(), f.chain().to_vec()))
        .collect()
}

fn three_file_card() -> Vec<u8> {
    let mut data = formatted(64);
    add_file(&mut data, 64, &[0, 1], entry(b"GALE", "smash", 5, 3), &[5, 6, 7]);
    add_file(&mut data, 64, &[0, 1], entry(b"GM4E", "mariokart", 8, 2), &[8, 12]);
    add_file(&mut data, 64, &[0, 1], entry(b"GFZE", "fzero", 9, 2), &[9, 10]);
    data
}

#[test]
fn active_tables_fall_back_from_invalid_preference() {
    let mut data = formatted(2048);
    // Make copy 0 the newer one, then break its checksum.
    edit_dat(&mut data, 0, |t| t.update_counter = 5);
    block_mut(&mut data, dat_block(0))[0x1FD0] ^= 0xFF;

    let card = Card::from_bytes(data).unwrap();
    assert_eq!(card.size_in_blocks(), 2048);
    assert_eq!(card.active_dat_idx(), 1);
    assert!(!card.is_dat_valid(0));
    assert!(card.is_dat_valid(1));
    assert!(!card.errors().contains(CardErrors::INVALID_DATS));
    assert_eq!(card.errors(), CardErrors::empty());
}

#[test]
fn both_tables_invalid_still_opens() {
    let mut data = formatted(64);
    for copy in 0..2 {
        block_mut(&mut data, bat_block(copy))[0x10] ^= 0x01;
    }
    let card = Card::from_bytes(data).unwrap();
    assert_eq!(card.errors(), CardErrors::INVALID_BATS);
    assert_eq!(card.active_bat_hdr_idx(), None);
    assert!(matches!(
        card.errors().to_error(),
        Some(CardError::AllocationTablesBothInvalid)
    ));
}

#[test]
fn format_produces_empty_card() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("new.raw");

    let card = Card::format(&path, &FormatOptions::new(256)).unwrap();
    assert_eq!(card.size_in_blocks(), 256);
    assert_eq!(card.free_blocks(), 251);
    assert!(card.is_empty());
    assert_eq!(card.errors(), CardErrors::empty());
    assert_eq!(card.path(), Some(path.as_path()));
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 256 * BLOCK_SIZE as u64);

    let reopened = Card::open(&path).unwrap();
    assert_eq!(reopened.serial_number(), card.serial_number());
}

#[test]
fn format_rejects_bad_sizes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.raw");
    assert!(matches!(
        Card::format(&path, &FormatOptions::new(100)),
        Err(CardError::InvalidArgument(_))
    ));
    assert!(!path.exists());
}

#[test]
fn trailing_partial_block_still_opens() {
    let mut data = formatted(128);
    data.extend(vec![0u8; 4096]);
    let card = Card::from_bytes(data).unwrap();
    assert_eq!(card.size_in_blocks(), 128);
    assert_eq!(card.errors(), CardErrors::SZ_NON_POW2);
    assert!(card.is_empty());
}

#[test]
fn used_block_map_counts_each_block_once() {
    let card = Card::from_bytes(three_file_card()).unwrap();
    assert_eq!(card.num_files(), 3);
    let used = card.used_block_map();
    for file in card.files() {
        for &block in file.chain() {
            assert_eq!(used[block as usize], 1);
        }
    }
    assert_eq!(used[11], 0);
    assert_eq!(card.free_blocks(), 59 - 7);
}

#[test]
fn free_first_block_excludes_entry() {
    let mut data = three_file_card();
    edit_dat(&mut data, 1, |t| {
        t.entries[5] = entry(b"GPOE", "pokemon", 30, 1);
    });
    let card = Card::from_bytes(data).unwrap();
    assert_eq!(card.num_files(), 3);
    assert!(card.files().iter().all(|f| f.id6() != "GPOE8P"));
}

#[test]
fn looping_chain_is_cut() {
    let mut data = formatted(64);
    add_file(&mut data, 64, &[0, 1], entry(b"GALE", "smash", 5, 3), &[5, 6, 7]);
    edit_bat(&mut data, 1, 64, |t| {
        t.set_entry(7, 5);
    });
    let card = Card::from_bytes(data).unwrap();
    let file = card.file(0).unwrap();
    assert_eq!(file.chain(), &[5, 6, 7]);
    assert!(file.issues().corrupt.is_some());
}

#[test]
fn explicit_chain_overlap_leaves_list_unchanged() {
    let mut card = Card::from_bytes(three_file_card()).unwrap();
    let before = snapshot(&card);

    let overlap = card.file(2).unwrap().chain()[1];
    let result = card.add_lost_file_with_chain(entry(b"GSNE", "sonic", 20, 2), vec![20, overlap]);
    assert!(matches!(result, Err(CardError::OverlapRejected { block }) if block == overlap));

    assert_eq!(snapshot(&card), before);
}

#[test]
fn lost_file_add_and_remove_restores_list() {
    let mut data = three_file_card();
    // A deleted save: still in the older directory copy, blocks released.
    add_file(&mut data, 64, &[0], entry(b"GPOE", "pokemon", 20, 3), &[20, 21, 22]);
    edit_bat(&mut data, 0, 64, |t| {
        for b in 20..23 {
            t.set_entry(b, 0);
        }
    });

    let mut card = Card::from_bytes(data).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    card.subscribe(Box::new(move |e: &CardEvent| sink.lock().unwrap().push(*e)));

    let regular = card.num_files();
    let before = snapshot(&card);
    let candidates = EntryScanner::new(ScanConfig::default()).scan(&card);
    assert_eq!(candidates.len(), 1);

    let added = card.add_lost_files(&candidates);
    assert_eq!(added, vec![regular]);
    let lost = card.file(regular).unwrap();
    assert!(lost.is_lost());
    assert_eq!(lost.chain(), &[20, 21, 22]);
    assert_eq!(lost.lost_info().unwrap().basis, ChainBasis::Contiguous);
    assert_eq!(card.used_block_map()[20], 0);

    card.remove_lost_files();
    assert_eq!(card.num_files(), regular);
    assert_eq!(snapshot(&card), before);
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            CardEvent::FilesAboutToBeInserted { start: 3, end: 3 },
            CardEvent::FilesInserted,
            CardEvent::FilesAboutToBeRemoved { start: 3, end: 3 },
            CardEvent::FilesRemoved,
        ]
    );
}

#[test]
fn report_lists_lost_files() {
    let mut card = Card::from_bytes(three_file_card()).unwrap();
    card.add_lost_file(entry(b"GSNE", "sonic", 40, 2)).unwrap();

    let report = report::build_report(&card, 1, "test");
    assert_eq!(report.files.len(), 4);
    assert_eq!(report.files[3].basis, Some(ChainBasis::Contiguous));
    assert_eq!(report.files[3].chain, vec![40, 41]);
    assert!(report::to_json(&report).unwrap().contains("\"GSNE8P\""));
}
