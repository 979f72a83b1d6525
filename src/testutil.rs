//! In-memory card images for unit tests.

use crate::disk::CardImage;
use crate::layout::dir::tests::entry;
use crate::layout::{bat_block, dat_block, BlockTable, CardHeader, DirEntry, DirectoryTable};
use crate::types::{Encoding, BAT_LAST, BLOCK_SIZE};

pub(crate) struct CardBuilder {
    size: u16,
    encoding: Encoding,
    dats: [DirectoryTable; 2],
    bats: [BlockTable; 2],
    corrupt_header: bool,
    corrupt_dats: [bool; 2],
    corrupt_bats: [bool; 2],
    free_override: [Option<u16>; 2],
    raw: Vec<(usize, Vec<u8>)>,
}

impl CardBuilder {
    /// Formatted card; copy 1 of each table is the newer one.
    pub(crate) fn new(size: u16) -> Self {
        Self {
            size,
            encoding: Encoding::Ansi,
            dats: [DirectoryTable::empty(0), DirectoryTable::empty(1)],
            bats: [BlockTable::formatted(0, size), BlockTable::formatted(1, size)],
            corrupt_header: false,
            corrupt_dats: [false; 2],
            corrupt_bats: [false; 2],
            free_override: [None; 2],
            raw: Vec::new(),
        }
    }

    pub(crate) fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// A file present in both table copies.
    pub(crate) fn file(self, gamecode: &[u8; 4], name: &str, chain: &[u16]) -> Self {
        self.file_in(0, gamecode, name, chain).file_in(1, gamecode, name, chain)
    }

    /// A file present only in table copy `copy`.
    pub(crate) fn file_in(self, copy: u8, gamecode: &[u8; 4], name: &str, chain: &[u16]) -> Self {
        let e = entry(gamecode, name, chain[0], chain.len() as u16);
        self.entry_in(copy, e).chain_in(copy, chain)
    }

    /// Directory entry only, no allocation entries.
    pub(crate) fn entry_in(mut self, copy: u8, e: DirEntry) -> Self {
        let dat = &mut self.dats[copy as usize];
        if let Some(slot) = dat.entries.iter_mut().find(|s| s.is_unused()) {
            *slot = e;
        }
        self
    }

    /// Allocation links only.
    pub(crate) fn chain_in(mut self, copy: u8, chain: &[u16]) -> Self {
        let bat = &mut self.bats[copy as usize];
        for pair in chain.windows(2) {
            bat.set_entry(pair[0], pair[1]);
        }
        if let Some(&last) = chain.last() {
            bat.set_entry(last, BAT_LAST);
        }
        self
    }

    pub(crate) fn link(mut self, copy: u8, block: u16, next: u16) -> Self {
        self.bats[copy as usize].set_entry(block, next);
        self
    }

    pub(crate) fn corrupt_header(mut self) -> Self {
        self.corrupt_header = true;
        self
    }

    pub(crate) fn corrupt_dat(mut self, copy: u8) -> Self {
        self.corrupt_dats[copy as usize] = true;
        self
    }

    pub(crate) fn corrupt_bat(mut self, copy: u8) -> Self {
        self.corrupt_bats[copy as usize] = true;
        self
    }

    pub(crate) fn bat_free_counter(mut self, copy: u8, free: u16) -> Self {
        self.free_override[copy as usize] = Some(free);
        self
    }

    /// Raw bytes at `offset` within data block `block`.
    pub(crate) fn data(mut self, block: u16, offset: usize, bytes: &[u8]) -> Self {
        self.raw.push((block as usize * BLOCK_SIZE + offset, bytes.to_vec()));
        self
    }

    pub(crate) fn build(self) -> Vec<u8> {
        let mut image = vec![0u8; self.size as usize * BLOCK_SIZE];

        let header = CardHeader {
            serial: *b"TESTCARD0001",
            format_time: 0,
            sram_bias: 0,
            sram_lang: 0,
            device_id: 0,
            size_mbits: self.size / 16,
            encoding: self.encoding.as_raw(),
            stored_checksum: 0,
        };
        let _ = header.write_to(&mut image[..BLOCK_SIZE]);
        if self.corrupt_header {
            image[0x30] ^= 0x5A;
        }

        for copy in 0..2usize {
            let start = dat_block(copy as u8) as usize * BLOCK_SIZE;
            let block = &mut image[start..start + BLOCK_SIZE];
            let _ = self.dats[copy].write_to(block);
            if self.corrupt_dats[copy] {
                block[0x1FD0] ^= 0x01;
            }

            let mut bat = self.bats[copy].clone();
            let counted = bat.count_free(self.size);
            bat.free_blocks = self.free_override[copy].unwrap_or(counted);
            let start = bat_block(copy as u8) as usize * BLOCK_SIZE;
            let block = &mut image[start..start + BLOCK_SIZE];
            let _ = bat.write_to(block);
            if self.corrupt_bats[copy] {
                block[0x1000] ^= 0x01;
            }
        }

        for (offset, bytes) in &self.raw {
            image[*offset..*offset + bytes.len()].copy_from_slice(bytes);
        }
        image
    }

    pub(crate) fn build_image(self) -> CardImage {
        CardImage::from_bytes(self.build())
    }
}
