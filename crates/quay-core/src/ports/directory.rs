//! QueueDirectory port - キューメタデータの一覧サービス
//!
//! ディレクトリは全キューで共有し、結果整合でかまいません。答えるのは
//! 「このキューは存在するか」と「どんなキューがあるか」だけで、メッセージの
//! 配送には使いません。
//!
//! # 実装予定
//! - 永続ディレクトリ。今は起動時に `QueueService::restore` でストアから作り直している

use async_trait::async_trait;

use crate::domain::{QueueId, QueueMetadata, StoreResult};

/// キューのエントリのキープレフィックス
pub const QUEUE_KEY_PREFIX: &str = "queue:";

pub fn queue_key(queue_id: QueueId) -> String {
    format!("{QUEUE_KEY_PREFIX}{queue_id}")
}

/// 一覧の 1 ページ
#[derive(Debug, Clone, Default)]
pub struct DirectoryPage {
    pub entries: Vec<QueueMetadata>,
    /// 続きがありうる時だけ入る。呼び出し側にとっては不透明な値。
    pub cursor: Option<String>,
}

#[async_trait]
pub trait QueueDirectory: Send + Sync {
    async fn put(&self, metadata: &QueueMetadata) -> StoreResult<()>;

    async fn get(&self, queue_id: QueueId) -> StoreResult<Option<QueueMetadata>>;

    async fn delete(&self, queue_id: QueueId) -> StoreResult<()>;

    /// キーが `prefix` で始まるエントリを `cursor` の次から返す
    ///
    /// 1 つの一覧のページをまたいでも順序は変わらない。
    async fn list(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> StoreResult<DirectoryPage>;
}
