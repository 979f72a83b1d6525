use ahash::AHashSet;
use log::{debug, info};
use rayon::prelude::*;
use std::time::Instant;

use super::{looks_like_direntry, CandidateSource, SearchCandidate};
use crate::card::Card;
use crate::layout::dat_block;
use crate::layout::dir::{DIRENTRY_SIZE, DIR_ENTRIES};
use crate::layout::DirEntry;
use crate::types::{ScanConfig, BLOCK_SIZE, SYS_BLOCKS};

/// Parallel scanner for lost directory entries
pub struct EntryScanner {
    config: ScanConfig,
}

impl EntryScanner {
    pub fn new(config: ScanConfig) -> Self {
        // Configure global thread pool if requested
        if config.num_threads > 0 {
            let _ = rayon::ThreadPoolBuilder::new()
                .num_threads(config.num_threads)
                .build_global();
        }

        Self { config }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Collect candidates from the inactive directory table and the unused
    /// data blocks, ordered by image offset.
    pub fn scan(&self, card: &Card) -> Vec<SearchCandidate> {
        let start_time = Instant::now();
        let mut candidates = Vec::new();

        if self.config.include_inactive_dat {
            candidates.extend(self.scan_inactive_dat(card));
        }
        if self.config.scan_block_pool {
            candidates.extend(self.scan_block_pool(card));
        }

        if self.config.skip_known {
            let active = card.active_dat();
            candidates.retain(|c| !active.contains(&c.entry));
        }

        candidates.sort_by_key(|c| c.offset);
        let mut seen = AHashSet::new();
        candidates.retain(|c| seen.insert(c.key()));

        info!(
            "Scan found {} candidate entries in {:.3}s",
            candidates.len(),
            start_time.elapsed().as_secs_f64()
        );
        candidates
    }

    fn scan_inactive_dat(&self, card: &Card) -> Vec<SearchCandidate> {
        let inactive_idx = card.active_dat_idx() ^ 1;
        let base = dat_block(inactive_idx) as u64 * BLOCK_SIZE as u64;
        let size = card.size_in_blocks();

        card.tables()
            .dats()
            .inactive()
            .entries
            .iter()
            .take(DIR_ENTRIES)
            .enumerate()
            .filter(|(_, e)| looks_like_direntry(e, size))
            .map(|(slot, e)| {
                SearchCandidate::new(
                    e.clone(),
                    base + (slot * DIRENTRY_SIZE) as u64,
                    CandidateSource::InactiveDat,
                )
            })
            .collect()
    }

    fn scan_block_pool(&self, card: &Card) -> Vec<SearchCandidate> {
        let used = card.used_block_map();
        let free_blocks: Vec<u16> = (SYS_BLOCKS..card.size_in_blocks())
            .filter(|&b| used.get(b as usize).copied().unwrap_or(0) == 0)
            .collect();
        debug!("Scanning {} unused blocks", free_blocks.len());

        let alignment = self.config.alignment.max(1);
        let size = card.size_in_blocks();
        let image = card.image();

        free_blocks
            .par_iter()
            .filter_map(|&block| image.block(block as u32).ok().map(|data| (block, data)))
            .flat_map_iter(|(block, data)| scan_block(data, block, alignment, size))
            .collect()
    }
}

/// Entry-shaped records inside one data block.
pub fn scan_block(data: &[u8], block: u16, alignment: usize, size_in_blocks: u16) -> Vec<SearchCandidate> {
    let base = block as u64 * BLOCK_SIZE as u64;
    let mut found = Vec::new();
    let mut pos = 0;

    while pos + DIRENTRY_SIZE <= data.len() {
        if let Ok(entry) = DirEntry::parse(&data[pos..pos + DIRENTRY_SIZE]) {
            if looks_like_direntry(&entry, size_in_blocks) {
                found.push(SearchCandidate::new(
                    entry,
                    base + pos as u64,
                    CandidateSource::BlockPool,
                ));
            }
        }
        pos += alignment;
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::dir::tests::entry;
    use crate::testutil::CardBuilder;

    fn scanner() -> EntryScanner {
        EntryScanner::new(ScanConfig::default())
    }

    #[test]
    fn test_scan_block_alignment() {
        let mut data = vec![0u8; BLOCK_SIZE];
        data[128..192].copy_from_slice(&entry(b"GALE", "smash", 10, 2).to_bytes());
        data[200..264].copy_from_slice(&entry(b"GFZE", "fzero", 10, 2).to_bytes());

        let found = scan_block(&data, 7, 64, 64);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].offset, 7 * BLOCK_SIZE as u64 + 128);

        let found = scan_block(&data, 7, 8, 64);
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_scan_finds_stale_and_pool_entries() {
        let stale = entry(b"GPOE", "pokemon", 20, 2);
        let data = CardBuilder::new(64)
            .file(b"GALE", "smash", &[5, 6])
            .file_in(0, b"GPOE", "pokemon", &[20, 21])
            .data(30, 256, &entry(b"GSNE", "sonic", 40, 1).to_bytes())
            // Copy of a live entry inside a free block is not a lost file.
            .data(31, 0, &entry(b"GALE", "smash", 5, 2).to_bytes())
            // Inside a used block: ignored.
            .data(6, 0, &entry(b"GMPE", "party", 50, 1).to_bytes())
            .build();
        let card = Card::from_bytes(data).unwrap();

        let found = scanner().scan(&card);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].entry, stale);
        assert_eq!(found[0].source, CandidateSource::InactiveDat);
        assert_eq!(found[0].offset, BLOCK_SIZE as u64 + 64);
        assert_eq!(found[1].entry.id6_string(), "GSNE01");
        assert_eq!(found[1].source, CandidateSource::BlockPool);
        assert_eq!(found[1].offset, 30 * BLOCK_SIZE as u64 + 256);
    }

    #[test]
    fn test_scan_dedups_repeated_sightings() {
        let lost = entry(b"GSNE", "sonic", 40, 1);
        let data = CardBuilder::new(64)
            .data(30, 0, &lost.to_bytes())
            .data(33, 64, &lost.to_bytes())
            .build();
        let card = Card::from_bytes(data).unwrap();
        let found = scanner().scan(&card);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].offset, 30 * BLOCK_SIZE as u64);
    }

    #[test]
    fn test_scan_respects_config() {
        let data = CardBuilder::new(64)
            .file_in(0, b"GPOE", "pokemon", &[20])
            .data(30, 0, &entry(b"GSNE", "sonic", 40, 1).to_bytes())
            .build();
        let card = Card::from_bytes(data).unwrap();

        let only_dat = EntryScanner::new(ScanConfig {
            scan_block_pool: false,
            ..Default::default()
        });
        let found = only_dat.scan(&card);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source, CandidateSource::InactiveDat);

        let only_pool = EntryScanner::new(ScanConfig {
            include_inactive_dat: false,
            ..Default::default()
        });
        let found = only_pool.scan(&card);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source, CandidateSource::BlockPool);
    }
}
