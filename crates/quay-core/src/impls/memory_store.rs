//! InMemoryMessageStore - プロセス内のメッセージストア
//!
//! ULID をキーにした `BTreeMap` で昇順スキャンを実現します。状態全体を 1 つの
//! async mutex の裏に置くので、`WriteBatch` の途中状態は誰からも見えません。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::domain::{QueueId, QueueMetadata, StoreResult, StoredMessage};
use crate::ports::{BatchOp, MessageStore, StoreFactory, WriteBatch};

#[derive(Debug, Default)]
struct StoreState {
    metadata: Option<QueueMetadata>,
    deleted: bool,
    records: BTreeMap<Ulid, StoredMessage>,
}

/// 1 キュー分のインメモリストア
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    state: Mutex<StoreState>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn put(&self, key: Ulid, record: StoredMessage) -> StoreResult<()> {
        self.state.lock().await.records.insert(key, record);
        Ok(())
    }

    async fn get(&self, key: Ulid) -> StoreResult<Option<StoredMessage>> {
        Ok(self.state.lock().await.records.get(&key).cloned())
    }

    async fn delete(&self, key: Ulid) -> StoreResult<bool> {
        Ok(self.state.lock().await.records.remove(&key).is_some())
    }

    async fn scan(
        &self,
        end_exclusive: Ulid,
        limit: usize,
    ) -> StoreResult<Vec<(Ulid, StoredMessage)>> {
        Ok(self
            .state
            .lock()
            .await
            .records
            .range(..end_exclusive)
            .take(limit)
            .map(|(key, record)| (*key, record.clone()))
            .collect())
    }

    async fn list_all(&self) -> StoreResult<Vec<(Ulid, StoredMessage)>> {
        Ok(self
            .state
            .lock()
            .await
            .records
            .iter()
            .map(|(key, record)| (*key, record.clone()))
            .collect())
    }

    async fn delete_all(&self) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.records.clear();
        state.metadata = None;
        Ok(())
    }

    async fn apply(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, record } => {
                    state.records.insert(key, record);
                }
                BatchOp::Delete { key } => {
                    state.records.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn metadata(&self) -> StoreResult<Option<QueueMetadata>> {
        Ok(self.state.lock().await.metadata.clone())
    }

    async fn put_metadata(&self, metadata: &QueueMetadata) -> StoreResult<()> {
        self.state.lock().await.metadata = Some(metadata.clone());
        Ok(())
    }

    async fn is_tombstoned(&self) -> StoreResult<bool> {
        Ok(self.state.lock().await.deleted)
    }

    async fn set_tombstone(&self) -> StoreResult<()> {
        self.state.lock().await.deleted = true;
        Ok(())
    }
}

/// キュー ID ごとに `InMemoryMessageStore` を 1 つ配り、プロセスが終わるまで保持する
///
/// 再生成されたアクターも同じデータを見る。
#[derive(Default)]
pub struct InMemoryStoreFactory {
    stores: Mutex<HashMap<QueueId, Arc<InMemoryMessageStore>>>,
}

impl InMemoryStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreFactory for InMemoryStoreFactory {
    async fn open(&self, queue_id: QueueId) -> StoreResult<Arc<dyn MessageStore>> {
        let mut stores = self.stores.lock().await;
        let store = stores
            .entry(queue_id)
            .or_insert_with(|| Arc::new(InMemoryMessageStore::new()));
        Ok(Arc::clone(store) as Arc<dyn MessageStore>)
    }

    async fn known_queues(&self) -> StoreResult<Vec<QueueId>> {
        let mut queues: Vec<QueueId> = self.stores.lock().await.keys().copied().collect();
        queues.sort();
        Ok(queues)
    }
}
