use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the storage engine.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Error: Duplicate key.")]
    DuplicateKey,

    #[error("cannot open file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Db file is not a whole number of pages ({length} bytes). Corrupt file.")]
    CorruptFile { length: u64 },

    #[error("unknown node type tag {0}")]
    UnknownNodeType(u8),

    #[error("root page {0} is not marked as root")]
    MissingRoot(u32),

    #[error("tried to flush page {0}, which is not cached")]
    FlushUncached(u32),

    #[error("internal node on page {0} has no right child")]
    EmptyInternalNode(u32),

    #[error("page {page_num} is past the end of the file ({num_pages} pages). Corrupt file.")]
    PageOutOfBounds { page_num: u32, num_pages: u32 },

    #[error("page {page_num} is corrupt: {reason}. Corrupt file.")]
    CorruptPage { page_num: u32, reason: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl DbError {
    /// Whether the session can keep going after reporting this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DbError::DuplicateKey)
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
