//! RedbMessageStore - redb に永続化するメッセージストア
//!
//! 全キューで 1 つのデータベースファイルを共有します。
//! - `messages`: キー `(queue, ulid)`、値は JSON の `StoredMessage`
//! - `queues`: キー `queue`、値は JSON のメタデータと tombstone
//!
//! 変更系の操作はそれぞれ 1 つの書き込みトランザクションなので、失敗すると
//! 何も残りません。スキャンは redb の順序付きイテレータをそのまま使います。

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::domain::{QueueId, QueueMetadata, StoreResult, StoredMessage};
use crate::ports::{BatchOp, MessageStore, StoreFactory, WriteBatch};

const MESSAGES: TableDefinition<(u128, u128), &[u8]> = TableDefinition::new("messages");
const QUEUES: TableDefinition<u128, &[u8]> = TableDefinition::new("queues");

/// `queues` テーブルの 1 行
#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueRecord {
    #[serde(default)]
    metadata: Option<QueueMetadata>,
    #[serde(default)]
    deleted: bool,
}

/// 1 キュー分の redb ストア
pub struct RedbMessageStore {
    db: Arc<Database>,
    queue: u128,
}

impl RedbMessageStore {
    /// `f` を 1 つの書き込みトランザクションで実行する。`f` が失敗したら中断する。
    fn write<T>(&self, f: impl FnOnce(&WriteTransaction) -> StoreResult<T>) -> StoreResult<T> {
        let txn = self.db.begin_write()?;
        match f(&txn) {
            Ok(out) => {
                txn.commit()?;
                Ok(out)
            }
            Err(err) => {
                txn.abort()?;
                Err(err)
            }
        }
    }

    fn queue_record(&self) -> StoreResult<QueueRecord> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(QUEUES)?;
        let record = match table.get(self.queue)? {
            Some(value) => serde_json::from_slice(value.value())?,
            None => QueueRecord::default(),
        };
        Ok(record)
    }

    fn update_queue(&self, f: impl FnOnce(&mut QueueRecord)) -> StoreResult<()> {
        self.write(|txn| update_queue_in(txn, self.queue, f))
    }

    fn messages_in(&self, end_exclusive: u128, limit: usize) -> StoreResult<Vec<(Ulid, StoredMessage)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(MESSAGES)?;
        let mut found = Vec::new();
        for item in table
            .range((self.queue, 0u128)..(self.queue, end_exclusive))?
            .take(limit)
        {
            let (key, value) = item?;
            let (_, id) = key.value();
            found.push((Ulid(id), serde_json::from_slice(value.value())?));
        }
        Ok(found)
    }
}

fn update_queue_in(
    txn: &WriteTransaction,
    queue: u128,
    f: impl FnOnce(&mut QueueRecord),
) -> StoreResult<()> {
    let mut table = txn.open_table(QUEUES)?;
    let mut record: QueueRecord = match table.get(queue)? {
        Some(value) => serde_json::from_slice(value.value())?,
        None => QueueRecord::default(),
    };
    f(&mut record);
    let bytes = serde_json::to_vec(&record)?;
    table.insert(queue, bytes.as_slice())?;
    Ok(())
}

#[async_trait]
impl MessageStore for RedbMessageStore {
    async fn put(&self, key: Ulid, record: StoredMessage) -> StoreResult<()> {
        let bytes = serde_json::to_vec(&record)?;
        self.write(|txn| {
            txn.open_table(MESSAGES)?
                .insert((self.queue, key.0), bytes.as_slice())?;
            Ok(())
        })
    }

    async fn get(&self, key: Ulid) -> StoreResult<Option<StoredMessage>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(MESSAGES)?;
        let record = match table.get((self.queue, key.0))? {
            Some(value) => Some(serde_json::from_slice(value.value())?),
            None => None,
        };
        Ok(record)
    }

    async fn delete(&self, key: Ulid) -> StoreResult<bool> {
        self.write(|txn| {
            let removed = txn
                .open_table(MESSAGES)?
                .remove((self.queue, key.0))?
                .is_some();
            Ok(removed)
        })
    }

    async fn scan(
        &self,
        end_exclusive: Ulid,
        limit: usize,
    ) -> StoreResult<Vec<(Ulid, StoredMessage)>> {
        self.messages_in(end_exclusive.0, limit)
    }

    async fn list_all(&self) -> StoreResult<Vec<(Ulid, StoredMessage)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(MESSAGES)?;
        let mut found = Vec::new();
        for item in table.range((self.queue, 0u128)..=(self.queue, u128::MAX))? {
            let (key, value) = item?;
            let (_, id) = key.value();
            found.push((Ulid(id), serde_json::from_slice(value.value())?));
        }
        Ok(found)
    }

    async fn delete_all(&self) -> StoreResult<()> {
        self.write(|txn| {
            {
                let mut table = txn.open_table(MESSAGES)?;
                let keys = table
                    .range((self.queue, 0u128)..=(self.queue, u128::MAX))?
                    .map(|item| item.map(|(key, _)| key.value()))
                    .collect::<Result<Vec<_>, redb::StorageError>>()?;
                for key in keys {
                    table.remove(key)?;
                }
            }
            update_queue_in(txn, self.queue, |record| record.metadata = None)
        })
    }

    async fn apply(&self, batch: WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.write(|txn| {
            let mut table = txn.open_table(MESSAGES)?;
            for op in batch.into_ops() {
                match op {
                    BatchOp::Put { key, record } => {
                        let bytes = serde_json::to_vec(&record)?;
                        table.insert((self.queue, key.0), bytes.as_slice())?;
                    }
                    BatchOp::Delete { key } => {
                        table.remove((self.queue, key.0))?;
                    }
                }
            }
            Ok(())
        })
    }

    async fn metadata(&self) -> StoreResult<Option<QueueMetadata>> {
        Ok(self.queue_record()?.metadata)
    }

    async fn put_metadata(&self, metadata: &QueueMetadata) -> StoreResult<()> {
        self.update_queue(|record| record.metadata = Some(metadata.clone()))
    }

    async fn is_tombstoned(&self) -> StoreResult<bool> {
        Ok(self.queue_record()?.deleted)
    }

    async fn set_tombstone(&self) -> StoreResult<()> {
        self.update_queue(|record| record.deleted = true)
    }
}

/// 1 つの redb ファイルを全キューで共有するファクトリ
///
/// redb はファイルをロックするので、同じパスのファクトリはプロセスに 1 つだけ。
pub struct RedbStoreFactory {
    db: Arc<Database>,
}

impl RedbStoreFactory {
    /// `path` のデータベースを開く（なければ親ディレクトリごと作る）
    pub fn create(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;
        let txn = db.begin_write()?;
        {
            txn.open_table(MESSAGES)?;
            txn.open_table(QUEUES)?;
        }
        txn.commit()?;

        tracing::debug!(path = %path.display(), "opened redb store");
        Ok(Self { db: Arc::new(db) })
    }
}

#[async_trait]
impl StoreFactory for RedbStoreFactory {
    async fn open(&self, queue_id: QueueId) -> StoreResult<Arc<dyn MessageStore>> {
        Ok(Arc::new(RedbMessageStore {
            db: Arc::clone(&self.db),
            queue: queue_id.as_ulid().0,
        }))
    }

    async fn known_queues(&self) -> StoreResult<Vec<QueueId>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(QUEUES)?;
        let mut queues = Vec::new();
        for item in table.range::<u128>(..)? {
            let (key, _) = item?;
            queues.push(QueueId::from_ulid(Ulid(key.value())));
        }
        Ok(queues)
    }
}
