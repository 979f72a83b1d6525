use crate::error::{CardError, Result};
use crate::types::BLOCK_SIZE;
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Clone)]
enum Backing {
    Mapped(Arc<Mmap>),
    Owned(Arc<Vec<u8>>),
}

/// Read-only card image, memory-mapped from disk or held in memory
#[derive(Clone)]
pub struct CardImage {
    data: Backing,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for CardImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardImage")
            .field("len", &self.len())
            .field("path", &self.path)
            .finish()
    }
}

impl CardImage {
    /// Open a card image file with memory mapping
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref)?;
        let metadata = file.metadata()?;

        // Zero-length files cannot be mapped.
        let data = if metadata.len() == 0 {
            Backing::Owned(Arc::new(Vec::new()))
        } else {
            let mmap = unsafe {
                Mmap::map(&file)
                    .map_err(|e| CardError::Mmap(format!("Failed to mmap {}: {}", path_ref.display(), e)))?
            };
            Backing::Mapped(Arc::new(mmap))
        };

        Ok(Self {
            data,
            path: Some(path_ref.to_path_buf()),
        })
    }

    /// Wrap an in-memory image
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data: Backing::Owned(Arc::new(data)),
            path: None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.data {
            Backing::Mapped(mmap) => &mmap[..],
            Backing::Owned(vec) => &vec[..],
        }
    }

    /// Total image size in bytes
    pub fn len(&self) -> u64 {
        self.as_bytes().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of whole blocks in the image
    pub fn block_count(&self) -> u32 {
        (self.len() / BLOCK_SIZE as u64) as u32
    }

    /// Zero-copy view of one block with bounds checking
    pub fn block(&self, index: u32) -> Result<&[u8]> {
        let count = self.block_count();
        if index >= count {
            return Err(CardError::BlockOutOfRange { index, size: count });
        }
        let start = index as usize * BLOCK_SIZE;
        Ok(&self.as_bytes()[start..start + BLOCK_SIZE])
    }
}
