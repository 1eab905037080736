use crate::errors::StoreResult;
use rocksdb::Options;
use std::path::Path;
use std::sync::Arc;

/// The DB type backing silo stores.
pub type DB = rocksdb::DB;

/// Opens (creating if missing) the database at `db_path`.
pub fn open_db(db_path: &Path) -> StoreResult<Arc<DB>> {
    let mut options = Options::default();
    options.create_if_missing(true);
    Ok(Arc::new(DB::open(&options, db_path)?))
}

/// Deletes an existing DB if it exists.
pub fn delete_db(db_path: &Path) -> StoreResult<()> {
    if db_path.exists() {
        DB::destroy(&Options::default(), db_path)?;
    }
    Ok(())
}

/// Creates a DB in a fresh temporary directory. The directory (and with it
/// the DB) is removed when the returned guard drops.
pub fn create_temp_db() -> StoreResult<(tempfile::TempDir, Arc<DB>)> {
    let dir = tempfile::tempdir().expect("creating a temp dir must succeed");
    let db = open_db(dir.path())?;
    Ok((dir, db))
}
