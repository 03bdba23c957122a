//! MessageStore port - キュー 1 つ分の順序付き KV ストア
//!
//! キーは ULID でスキャンは昇順なので、ストアは新着メッセージの FIFO であると同時に
//! lease 中メッセージのスケジュールでもあります。ストアはちょうど 1 つのキューに属し、
//! そのキューのアクターだけが操作します。

use std::sync::Arc;

use async_trait::async_trait;
use ulid::Ulid;

use crate::domain::{QueueId, QueueMetadata, StoreResult, StoredMessage};

/// アトミックな書き込みバッチの 1 操作
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put { key: Ulid, record: StoredMessage },
    Delete { key: Ulid },
}

/// `MessageStore::apply` が全部かゼロかで適用する操作列
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Ulid, record: StoredMessage) {
        self.ops.push(BatchOp::Put { key, record });
    }

    pub fn delete(&mut self, key: Ulid) {
        self.ops.push(BatchOp::Delete { key });
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// MessageStore は 1 キュー分の順序付きメッセージストレージ
///
/// # 設計原則
/// - 変更系の操作はそれぞれ全部かゼロか（失敗したら何も残らない）
/// - 実装はスレッドセーフであること
#[async_trait]
pub trait MessageStore: Send + Sync {
    // --- メッセージレコード ---

    async fn put(&self, key: Ulid, record: StoredMessage) -> StoreResult<()>;

    async fn get(&self, key: Ulid) -> StoreResult<Option<StoredMessage>>;

    /// レコードを消したかどうかを返す
    async fn delete(&self, key: Ulid) -> StoreResult<bool>;

    /// キーが `end_exclusive` 未満のレコードを小さい順に最大 `limit` 件
    async fn scan(&self, end_exclusive: Ulid, limit: usize)
    -> StoreResult<Vec<(Ulid, StoredMessage)>>;

    /// 全レコードを小さい順に
    async fn list_all(&self) -> StoreResult<Vec<(Ulid, StoredMessage)>>;

    /// 全メッセージレコードとメタデータを消す。tombstone は残る。
    async fn delete_all(&self) -> StoreResult<()>;

    async fn apply(&self, batch: WriteBatch) -> StoreResult<()>;

    // --- キューの状態 ---

    async fn metadata(&self) -> StoreResult<Option<QueueMetadata>>;

    async fn put_metadata(&self, metadata: &QueueMetadata) -> StoreResult<()>;

    async fn is_tombstoned(&self) -> StoreResult<bool>;

    /// キューを削除済みとして永続化する。元には戻せない。
    async fn set_tombstone(&self) -> StoreResult<()>;
}

/// StoreFactory はキュー ID からストアを引く
///
/// 同じ ID には常に同じ実体のストレージを返す。
#[async_trait]
pub trait StoreFactory: Send + Sync {
    async fn open(&self, queue_id: QueueId) -> StoreResult<Arc<dyn MessageStore>>;

    /// ストレージを持っているキュー ID すべて（削除済みを含む）
    async fn known_queues(&self) -> StoreResult<Vec<QueueId>>;
}
