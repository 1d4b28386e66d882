//! Shard discovery, the active ingestion shard, and parallel read fan-out.
//!
//! An index is a directory of `shard-<N>.decaf` files with `N` dense from
//! zero. Exactly one shard is ever open read-write (the newest, during
//! ingestion); queries open per-shard read-only connections inside a worker
//! pool sized to half the hardware concurrency and stream `(shard, row)`
//! pairs back over a bounded channel. Rows from one shard arrive in query
//! order; different shards interleave arbitrarily. Dropping the stream
//! cancels outstanding work at the next row boundary.

use crate::error::{Error, Result};
use crate::shard::{shard_file, ShardStore};
use log::debug;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;

/// Bounded per-query row buffer; workers block once readers fall behind.
const ROW_BUFFER: usize = 1024;

/// Queries for a fan-out: one broadcast to every shard, or one per shard.
#[derive(Debug, Clone)]
pub enum ShardQueries {
    Broadcast(String),
    PerShard(Vec<String>),
}

impl ShardQueries {
    fn resolve(self, num_shards: usize) -> Result<Vec<String>> {
        match self {
            ShardQueries::Broadcast(query) => Ok(vec![query; num_shards]),
            ShardQueries::PerShard(queries) => {
                if queries.len() != num_shards {
                    return Err(Error::Configuration(format!(
                        "got {} queries for {} shards (expected one per shard or a single broadcast)",
                        queries.len(),
                        num_shards
                    )));
                }
                Ok(queries)
            }
        }
    }
}

/// Streaming result rows of a fan-out, tagged with their shard.
pub struct RowStream<T> {
    receiver: Receiver<Result<(usize, T)>>,
}

impl<T> Iterator for RowStream<T> {
    type Item = Result<(usize, T)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.receiver.recv().ok()
    }
}

/// Owns the set of shards of one index directory.
pub struct ShardManager {
    index_dir: PathBuf,
    num_shards: usize,
    active: Option<ShardStore>,
    pool: rayon::ThreadPool,
}

impl ShardManager {
    /// Open an index directory, discovering `shard-0.decaf`,
    /// `shard-1.decaf`, … until the first gap.
    pub fn open(index_dir: &Path) -> Result<Self> {
        if !index_dir.is_dir() {
            return Err(Error::Configuration(format!(
                "index directory '{}' does not exist",
                index_dir.display()
            )));
        }
        let mut num_shards = 0;
        while shard_file(index_dir, num_shards).exists() {
            num_shards += 1;
        }
        debug!(
            "discovered {} shard(s) in {}",
            num_shards,
            index_dir.display()
        );
        Ok(Self {
            index_dir: index_dir.to_path_buf(),
            num_shards,
            active: None,
            pool: build_query_pool()?,
        })
    }

    /// Create an index directory with an empty first shard.
    pub fn create(index_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(index_dir).map_err(|e| Error::io(index_dir, e))?;
        let mut manager = Self::open(index_dir)?;
        if manager.num_shards == 0 {
            manager.add_shard()?;
        }
        Ok(manager)
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    pub fn num_shards(&self) -> usize {
        self.num_shards
    }

    /// Append a new shard and make it the active write target.
    pub fn add_shard(&mut self) -> Result<usize> {
        let index = self.num_shards;
        self.disconnect()?;
        let store = ShardStore::create(&self.index_dir, index)?;
        self.num_shards += 1;
        self.active = Some(store);
        Ok(index)
    }

    /// Open the newest shard read-write as the active ingestion target,
    /// committing and closing any previously active connection.
    pub fn connect(&mut self) -> Result<()> {
        if self.num_shards == 0 {
            return Err(Error::Configuration(
                "index has no shards; create it first".to_string(),
            ));
        }
        let newest = self.num_shards - 1;
        if let Some(active) = &self.active {
            if active.index() == newest {
                return Ok(());
            }
        }
        self.disconnect()?;
        self.active = Some(ShardStore::open(&self.index_dir, newest)?);
        Ok(())
    }

    /// Commit and close the active connection, if any.
    pub fn disconnect(&mut self) -> Result<()> {
        if let Some(active) = self.active.take() {
            active.close()?;
        }
        Ok(())
    }

    /// The active write shard.
    pub fn active(&mut self) -> Result<&mut ShardStore> {
        self.active.as_mut().ok_or(Error::NotConnected)
    }

    /// Open one shard for reading (surface-text export, masking).
    pub fn reader(&self, shard: usize) -> Result<ShardStore> {
        if shard >= self.num_shards {
            return Err(Error::Configuration(format!(
                "shard {} out of range (index has {})",
                shard, self.num_shards
            )));
        }
        ShardStore::open_read_only(&self.index_dir, shard)
    }

    /// Fan a query (or one query per shard) out across all shards and
    /// stream back `(shard, row)` pairs.
    ///
    /// Each worker handles a contiguous chunk of shards sequentially, so
    /// rows of one shard keep their query order while shards interleave.
    pub fn query_shards<T, F>(&self, queries: ShardQueries, map_row: F) -> Result<RowStream<T>>
    where
        T: Send + 'static,
        F: Fn(&duckdb::Row<'_>) -> duckdb::Result<T> + Send + Sync + 'static,
    {
        let queries = queries.resolve(self.num_shards)?;
        let (sender, receiver) = sync_channel(ROW_BUFFER);
        if self.num_shards == 0 {
            return Ok(RowStream { receiver });
        }

        let map_row = Arc::new(map_row);
        let pool_size = self.pool.current_num_threads().max(1);
        let chunk_size = self.num_shards.div_ceil(pool_size);
        let work: Vec<(usize, String)> = queries.into_iter().enumerate().collect();

        for chunk in work.chunks(chunk_size) {
            let chunk: Vec<(usize, String)> = chunk.to_vec();
            let sender: SyncSender<Result<(usize, T)>> = sender.clone();
            let map_row = Arc::clone(&map_row);
            let index_dir = self.index_dir.clone();
            self.pool.spawn(move || {
                for (shard, query) in chunk {
                    if !run_shard_query(&index_dir, shard, &query, map_row.as_ref(), &sender) {
                        // Receiver dropped: stop at the row boundary.
                        return;
                    }
                }
            });
        }
        Ok(RowStream { receiver })
    }
}

impl Drop for ShardManager {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

fn build_query_pool() -> Result<rayon::ThreadPool> {
    let threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        / 2;
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .build()
        .map_err(|e| Error::Configuration(format!("failed to build query pool: {}", e)))
}

/// Run one query against one shard, streaming rows into the channel.
/// Returns false once the receiving side has gone away.
fn run_shard_query<T, F>(
    index_dir: &Path,
    shard: usize,
    query: &str,
    map_row: &F,
    sender: &SyncSender<Result<(usize, T)>>,
) -> bool
where
    T: Send,
    F: Fn(&duckdb::Row<'_>) -> duckdb::Result<T>,
{
    let outcome = (|| -> Result<bool> {
        let store = ShardStore::open_read_only(index_dir, shard)?;
        let mut stmt = store.connection().prepare(query)?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let value = map_row(row)?;
            if sender.send(Ok((shard, value))).is_err() {
                return Ok(false);
            }
        }
        Ok(true)
    })();
    match outcome {
        Ok(receiver_alive) => receiver_alive,
        Err(e) => sender.send(Err(e)).is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IndexBatch, Literal, Structure};
    use tempfile::TempDir;

    fn seeded_index(num_shards: usize) -> (TempDir, ShardManager) {
        let dir = TempDir::new().unwrap();
        let mut manager = ShardManager::create(dir.path()).unwrap();
        for shard in 0..num_shards {
            if shard > 0 {
                manager.add_shard().unwrap();
            }
            let mut batch = IndexBatch::new();
            let l = batch.push_literal(Literal::new(0, 1, format!("{}", shard)));
            batch.push_structure(Structure::new(
                0,
                1,
                "token",
                Some(format!("t{}", shard)),
                vec![l],
            ));
            manager.active().unwrap().add(&mut batch).unwrap();
        }
        manager.disconnect().unwrap();
        (dir, manager)
    }

    #[test]
    fn test_discovery_stops_at_gap() {
        let (dir, manager) = seeded_index(3);
        drop(manager);
        // Removing the middle shard hides everything after it.
        std::fs::remove_file(shard_file(dir.path(), 1)).unwrap();
        let manager = ShardManager::open(dir.path()).unwrap();
        assert_eq!(manager.num_shards(), 1);
    }

    #[test]
    fn test_open_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            ShardManager::open(&missing),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_active_requires_connection() {
        let (_dir, mut manager) = seeded_index(1);
        assert!(matches!(manager.active(), Err(Error::NotConnected)));
        manager.connect().unwrap();
        assert_eq!(manager.active().unwrap().index(), 0);
    }

    #[test]
    fn test_broadcast_reaches_every_shard() {
        let (_dir, manager) = seeded_index(3);
        let rows: Vec<(usize, String)> = manager
            .query_shards(
                ShardQueries::Broadcast("SELECT value FROM structures".to_string()),
                |row| row.get::<_, String>(0),
            )
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        let mut seen: Vec<(usize, String)> = rows;
        seen.sort();
        assert_eq!(
            seen,
            vec![
                (0, "t0".to_string()),
                (1, "t1".to_string()),
                (2, "t2".to_string())
            ]
        );
    }

    #[test]
    fn test_per_shard_queries_are_zipped() {
        let (_dir, manager) = seeded_index(2);
        let queries = vec![
            "SELECT COUNT(*) FROM literals".to_string(),
            "SELECT COUNT(*) FROM structures".to_string(),
        ];
        let rows: Vec<(usize, i64)> = manager
            .query_shards(ShardQueries::PerShard(queries), |row| {
                row.get::<_, i64>(0)
            })
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_query_count_mismatch_is_configuration_error() {
        let (_dir, manager) = seeded_index(3);
        let queries = vec!["SELECT 1".to_string(), "SELECT 1".to_string()];
        let result = manager.query_shards(ShardQueries::PerShard(queries), |row| {
            row.get::<_, i64>(0)
        });
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_rows_within_shard_keep_query_order() {
        let dir = TempDir::new().unwrap();
        let mut manager = ShardManager::create(dir.path()).unwrap();
        let mut batch = IndexBatch::new();
        for i in 0..10 {
            batch.push_literal(Literal::new(i, i + 1, format!("{}", i)));
        }
        manager.active().unwrap().add(&mut batch).unwrap();
        manager.disconnect().unwrap();

        let rows: Vec<(usize, i64)> = manager
            .query_shards(
                ShardQueries::Broadcast("SELECT id FROM literals ORDER BY id".to_string()),
                |row| row.get::<_, i64>(0),
            )
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let ids: Vec<i64> = rows.into_iter().map(|(_, id)| id).collect();
        assert_eq!(ids, (1..=10).collect::<Vec<i64>>());
    }
}
