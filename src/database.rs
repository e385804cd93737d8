use crate::access::{Table, TableMeta};
use crate::config::{DatabaseConfig, CATALOG_FILE_NAME, SPILL_FILE_NAME, TABLE_FILE_EXTENSION};
use crate::error::{DbError, DbResult};
use crate::persist;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::disk::{MemoryStore, SpillFile};
use crate::storage::page::TableId;
use log::{info, warn};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Tolerated problem found while opening a database directory.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadWarning {
    /// A zero-byte table file was skipped instead of loaded.
    EmptyTableFile(PathBuf),
}

impl fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadWarning::EmptyTableFile(path) => {
                write!(f, "skipped empty table file {}", path.display())
            }
        }
    }
}

/// Top-level handle: one bufferpool shared by every table of one directory.
pub struct Database {
    path: Option<PathBuf>,
    config: DatabaseConfig,
    buffer_pool: BufferPoolManager,
    tables: BTreeMap<String, Table>,
    next_table_id: u32,
    warnings: Vec<LoadWarning>,
}

impl Database {
    /// Database without a directory. Nothing it holds can be saved.
    pub fn in_memory(config: DatabaseConfig) -> Self {
        let config = Self::normalize(config);
        let buffer_pool =
            BufferPoolManager::with_lru(Box::new(MemoryStore::new()), config.bufferpool_frames);
        Self::with_buffer_pool(None, config, buffer_pool)
    }

    fn with_buffer_pool(
        path: Option<PathBuf>,
        config: DatabaseConfig,
        buffer_pool: BufferPoolManager,
    ) -> Self {
        Self {
            path,
            config,
            buffer_pool,
            tables: BTreeMap::new(),
            next_table_id: 0,
            warnings: Vec::new(),
        }
    }

    pub fn open(path: &Path) -> DbResult<Self> {
        Self::open_with_config(path, DatabaseConfig::default())
    }

    /// Open the database stored in `path`, creating an empty one if the
    /// directory does not exist.
    pub fn open_with_config(path: &Path, config: DatabaseConfig) -> DbResult<Self> {
        let config = Self::normalize(config);
        if !path.exists() {
            fs::create_dir_all(path)?;
            info!("created database directory {}", path.display());
        }

        let spill = SpillFile::create(&path.join(SPILL_FILE_NAME))?;
        let buffer_pool = BufferPoolManager::with_lru(Box::new(spill), config.bufferpool_frames);

        let mut db = Self::with_buffer_pool(Some(path.to_path_buf()), config, buffer_pool);
        db.load_tables(path)?;
        Ok(db)
    }

    fn normalize(mut config: DatabaseConfig) -> DatabaseConfig {
        config.bufferpool_frames = config.bufferpool_frames.max(1);
        config.merge_threshold = config.merge_threshold.max(1);
        config
    }

    fn load_tables(&mut self, dir: &Path) -> DbResult<()> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let file_path = entry?.path();
            let is_table = file_path.is_file()
                && file_path.extension().and_then(|e| e.to_str()) == Some(TABLE_FILE_EXTENSION);
            if is_table {
                files.push(file_path);
            }
        }
        files.sort();

        let mut seen_ids = HashSet::new();
        for file_path in files {
            let bytes = fs::read(&file_path)?;
            if bytes.is_empty() {
                warn!("skipping empty table file {}", file_path.display());
                self.warnings.push(LoadWarning::EmptyTableFile(file_path));
                continue;
            }

            let stem = file_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let image = persist::decode_image(&bytes)
                .map_err(|e| DbError::corrupt(format!("{}: {}", file_path.display(), e)))?;
            if image.meta.name != stem {
                return Err(DbError::corrupt(format!(
                    "{} holds table '{}'",
                    file_path.display(),
                    image.meta.name
                )));
            }
            let table_id = image.meta.table_id;
            if !seen_ids.insert(table_id) {
                return Err(DbError::corrupt(format!(
                    "{} reuses table id {}",
                    file_path.display(),
                    table_id
                )));
            }

            let table = Table::from_image(
                image,
                self.buffer_pool.clone(),
                self.config.merge_threshold,
            )?;
            info!(
                "loaded table '{}' ({} records) from {}",
                stem,
                table.len(),
                file_path.display()
            );
            self.next_table_id = self.next_table_id.max(table_id.0 + 1);
            self.tables.insert(stem, table);
        }
        Ok(())
    }

    /// Flush the bufferpool and write every table blob plus the catalog.
    pub fn close(&mut self) -> DbResult<()> {
        let dir = self.path.clone().ok_or(DbError::NoPathSet)?;

        self.buffer_pool.flush_all()?;
        for (name, table) in &self.tables {
            let file_path = Self::table_file(&dir, name);
            persist::save_to(table, &file_path)?;
            info!("saved table '{}' to {}", name, file_path.display());
        }

        let metas: Vec<TableMeta> = self.tables.values().map(|t| t.meta().clone()).collect();
        persist::write_catalog(&dir.join(CATALOG_FILE_NAME), &metas)?;
        Ok(())
    }

    pub fn create_table(
        &mut self,
        name: &str,
        num_columns: usize,
        key_index: usize,
    ) -> DbResult<&mut Table> {
        Table::validate_schema(num_columns, key_index)?;
        Self::validate_name(name)?;
        if self.tables.contains_key(name) {
            return Err(DbError::DuplicateTable(name.to_string()));
        }

        let table = Table::new(
            name,
            TableId(self.next_table_id),
            num_columns,
            key_index,
            self.buffer_pool.clone(),
            self.config.merge_threshold,
        )?;
        self.next_table_id += 1;
        Ok(self.tables.entry(name.to_string()).or_insert(table))
    }

    /// Remove a table, its file and its catalog entry. Unknown names are
    /// ignored. The table stays registered if its pages cannot be discarded.
    pub fn drop_table(&mut self, name: &str) -> DbResult<()> {
        let Some(table) = self.tables.get(name) else {
            return Ok(());
        };
        table.discard_pages()?;
        self.tables.remove(name);

        if let Some(dir) = &self.path {
            match fs::remove_file(Self::table_file(dir, name)) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }

            let catalog_path = dir.join(CATALOG_FILE_NAME);
            if catalog_path.exists() {
                let mut metas = persist::read_catalog(&catalog_path)?;
                metas.retain(|meta| meta.name != name);
                persist::write_catalog(&catalog_path, &metas)?;
            }
        }
        info!("dropped table '{}'", name);
        Ok(())
    }

    pub fn get_table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn get_table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.get_mut(name)
    }

    /// Registered table names in ascending order.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn bufferpool(&self) -> &BufferPoolManager {
        &self.buffer_pool
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn warnings(&self) -> &[LoadWarning] {
        &self.warnings
    }

    /// Table metadata recorded by the last close of the database in `path`,
    /// minus tables dropped since.
    pub fn read_catalog(path: &Path) -> DbResult<Vec<TableMeta>> {
        persist::read_catalog(&path.join(CATALOG_FILE_NAME))
    }

    fn table_file(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{}.{}", name, TABLE_FILE_EXTENSION))
    }

    /// Names double as file stems.
    fn validate_name(name: &str) -> DbResult<()> {
        let bad = name.is_empty()
            || name
                .chars()
                .any(|c| c == '/' || c == '\\' || c == '.' || c.is_control());
        if bad {
            return Err(DbError::InvalidTableName(name.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{Rid, Value};
    use crate::error::Missing;
    use crate::storage::disk::PageStore;
    use crate::storage::page::PageId;
    use crate::storage::PageBuf;
    use std::io;
    use tempfile::tempdir;

    #[test]
    fn test_open_creates_directory() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let db_path = dir.path().join("db");

        let db = Database::open(&db_path)?;
        assert!(db_path.is_dir());
        assert!(db.table_names().is_empty());
        assert!(db.get_table("anything").is_none());
        assert!(db.warnings().is_empty());
        Ok(())
    }

    #[test]
    fn test_create_table_validation() -> anyhow::Result<()> {
        let mut db = Database::in_memory(DatabaseConfig::default());

        assert!(matches!(
            db.create_table("t", 3, 3),
            Err(DbError::InvalidKeyIndex {
                key_index: 3,
                num_columns: 3
            })
        ));
        assert!(matches!(
            db.create_table("../escape", 2, 0),
            Err(DbError::InvalidTableName(_))
        ));
        assert!(matches!(
            db.create_table("", 2, 0),
            Err(DbError::InvalidTableName(_))
        ));

        db.create_table("t", 2, 0)?;
        assert!(matches!(
            db.create_table("t", 4, 1),
            Err(DbError::DuplicateTable(name)) if name == "t"
        ));
        assert_eq!(db.table_names(), vec!["t".to_string()]);
        Ok(())
    }

    #[test]
    fn test_in_memory_close_fails() {
        let mut db = Database::in_memory(DatabaseConfig::default());
        assert!(matches!(db.close(), Err(DbError::NoPathSet)));
    }

    #[test]
    fn test_close_and_reopen() -> anyhow::Result<()> {
        let dir = tempdir()?;
        {
            let mut db = Database::open(dir.path())?;
            let table = db.create_table("Grades", 4, 0)?;
            let rid = table.insert(vec![1.into(), "A".into(), "B".into(), "C".into()])?;
            table.update(rid, [(2, Value::from("Z"))])?;
            db.close()?;
        }

        let mut db = Database::open(dir.path())?;
        let table = db.get_table_mut("Grades").ok_or_else(|| anyhow::anyhow!("missing"))?;
        assert_eq!(
            table.select(Rid(0))?.columns,
            vec![1.into(), "A".into(), "Z".into(), "C".into()]
        );
        assert_eq!(table.insert(vec![2.into(), "".into(), "".into(), "".into()])?, Rid(1));

        let catalog = Database::read_catalog(dir.path())?;
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].name, "Grades");
        assert_eq!(catalog[0].next_rid, Rid(1));
        Ok(())
    }

    #[test]
    fn test_new_table_ids_do_not_collide_after_reopen() -> anyhow::Result<()> {
        let dir = tempdir()?;
        {
            let mut db = Database::open(dir.path())?;
            db.create_table("a", 1, 0)?;
            db.create_table("b", 1, 0)?;
            db.close()?;
        }
        let mut db = Database::open(dir.path())?;
        let id = db.create_table("c", 1, 0)?.table_id();
        assert_eq!(id, TableId(2));
        Ok(())
    }

    #[test]
    fn test_empty_file_skipped_with_warning() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let empty = dir.path().join("ghost.tbl");
        fs::write(&empty, b"")?;

        let db = Database::open(dir.path())?;
        assert!(db.get_table("ghost").is_none());
        assert_eq!(db.warnings(), &[LoadWarning::EmptyTableFile(empty)]);
        Ok(())
    }

    #[test]
    fn test_garbage_file_fails_open() -> anyhow::Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("junk.tbl"), b"definitely not a table")?;
        assert!(matches!(
            Database::open(dir.path()),
            Err(DbError::CorruptData(_))
        ));
        Ok(())
    }

    #[test]
    fn test_deeply_nested_file_fails_open() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let mut bytes = persist::codec::MAGIC.to_vec();
        bytes.extend_from_slice(&persist::codec::FORMAT_VERSION.to_le_bytes());
        for _ in 0..20_000 {
            bytes.extend_from_slice(&6u32.to_le_bytes());
            bytes.extend_from_slice(&1u64.to_le_bytes());
        }
        bytes.extend_from_slice(&0u32.to_le_bytes());
        fs::write(dir.path().join("t.tbl"), bytes)?;

        assert!(matches!(
            Database::open(dir.path()),
            Err(DbError::CorruptData(_))
        ));
        Ok(())
    }

    #[test]
    fn test_renamed_file_fails_open() -> anyhow::Result<()> {
        let dir = tempdir()?;
        {
            let mut db = Database::open(dir.path())?;
            db.create_table("orig", 2, 0)?;
            db.close()?;
        }
        fs::rename(dir.path().join("orig.tbl"), dir.path().join("other.tbl"))?;
        assert!(matches!(
            Database::open(dir.path()),
            Err(DbError::CorruptData(_))
        ));
        Ok(())
    }

    #[test]
    fn test_drop_table() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let mut db = Database::open(dir.path())?;
        let table = db.create_table("gone", 2, 0)?;
        table.insert(vec![1.into(), 2.into()])?;
        db.close()?;
        assert!(dir.path().join("gone.tbl").exists());

        let resident_before = db.bufferpool().resident_pages();
        assert!(resident_before > 0);

        db.drop_table("gone")?;
        assert!(db.get_table("gone").is_none());
        assert!(!dir.path().join("gone.tbl").exists());
        assert_eq!(db.bufferpool().resident_pages(), 0);

        // Unknown names are fine
        db.drop_table("gone")?;
        db.drop_table("never")?;

        let reopened = Database::open(dir.path())?;
        assert!(reopened.get_table("gone").is_none());
        Ok(())
    }

    #[test]
    fn test_drop_table_updates_catalog() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let mut db = Database::open(dir.path())?;
        db.create_table("kept", 2, 0)?;
        db.create_table("gone", 2, 0)?;
        db.close()?;

        db.drop_table("gone")?;
        let names: Vec<_> = Database::read_catalog(dir.path())?
            .into_iter()
            .map(|meta| meta.name)
            .collect();
        assert_eq!(names, vec!["kept".to_string()]);
        Ok(())
    }

    /// Store whose removals always fail.
    #[derive(Debug, Default)]
    struct StuckStore(MemoryStore);

    impl PageStore for StuckStore {
        fn read_page(&mut self, page_id: PageId, buf: &mut PageBuf) -> DbResult<bool> {
            self.0.read_page(page_id, buf)
        }

        fn write_page(&mut self, page_id: PageId, data: &PageBuf) -> DbResult<()> {
            self.0.write_page(page_id, data)
        }

        fn remove_page(&mut self, _page_id: PageId) -> DbResult<()> {
            Err(DbError::Io(io::Error::new(io::ErrorKind::Other, "remove refused")))
        }

        fn contains(&self, page_id: PageId) -> bool {
            self.0.contains(page_id)
        }

        fn sync(&mut self) -> DbResult<()> {
            self.0.sync()
        }

        fn num_pages(&self) -> usize {
            self.0.num_pages()
        }
    }

    #[test]
    fn test_failed_drop_keeps_table() -> anyhow::Result<()> {
        let config = DatabaseConfig::default();
        let buffer_pool =
            BufferPoolManager::with_lru(Box::new(StuckStore::default()), config.bufferpool_frames);
        let mut db = Database::with_buffer_pool(None, config, buffer_pool);
        let table = db.create_table("stuck", 2, 0)?;
        table.insert(vec![1.into(), 2.into()])?;

        assert!(matches!(db.drop_table("stuck"), Err(DbError::Io(_))));
        assert!(db.get_table("stuck").is_some());
        assert_eq!(db.table_names(), vec!["stuck".to_string()]);
        Ok(())
    }

    #[test]
    fn test_select_by_key_through_database() -> anyhow::Result<()> {
        let mut db = Database::in_memory(DatabaseConfig::default().with_bufferpool_frames(4));
        let table = db.create_table("kv", 2, 1)?;
        table.insert(vec!["v".into(), 10.into()])?;

        let table = db.get_table("kv").ok_or_else(|| anyhow::anyhow!("missing"))?;
        assert_eq!(table.select_by_key(&Value::Int(10))?.columns[0], Value::from("v"));
        assert!(matches!(
            table.select_by_key(&Value::Int(11)),
            Err(DbError::NotFound(Missing::Key(_)))
        ));
        Ok(())
    }
}
