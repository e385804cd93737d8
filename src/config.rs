//! Tunables for a database instance.

/// Extension of per-table blob files.
pub const TABLE_FILE_EXTENSION: &str = "tbl";

/// Lightweight metadata listing of every table.
pub const CATALOG_FILE_NAME: &str = "catalog.meta";

/// Scratch file the bufferpool writes evicted pages to.
pub const SPILL_FILE_NAME: &str = "pages.spill";

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Number of frames in the shared bufferpool.
    pub bufferpool_frames: usize,
    /// Tail records a page range must accumulate before `merge` compacts it.
    pub merge_threshold: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            bufferpool_frames: 64,
            merge_threshold: 64,
        }
    }
}

impl DatabaseConfig {
    pub fn with_bufferpool_frames(mut self, frames: usize) -> Self {
        self.bufferpool_frames = frames;
        self
    }

    pub fn with_merge_threshold(mut self, threshold: usize) -> Self {
        self.merge_threshold = threshold;
        self
    }
}
