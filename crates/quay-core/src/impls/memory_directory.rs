//! InMemoryQueueDirectory - インメモリのキューディレクトリ

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{QueueId, QueueMetadata, StoreResult};
use crate::ports::{DirectoryPage, QueueDirectory, queue_key};

/// `queue:{queue_id}` をキーにした `BTreeMap` のディレクトリ
///
/// 一覧はキー順に歩くので、カーソルは最後に返したキーそのもの。ページの間に
/// 作られたキューは、カーソルより後ろに並ぶ場合に限り後のページに出る。
#[derive(Debug, Default)]
pub struct InMemoryQueueDirectory {
    entries: RwLock<BTreeMap<String, QueueMetadata>>,
}

impl InMemoryQueueDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueDirectory for InMemoryQueueDirectory {
    async fn put(&self, metadata: &QueueMetadata) -> StoreResult<()> {
        self.entries
            .write()
            .await
            .insert(queue_key(metadata.queue_id), metadata.clone());
        Ok(())
    }

    async fn get(&self, queue_id: QueueId) -> StoreResult<Option<QueueMetadata>> {
        Ok(self.entries.read().await.get(&queue_key(queue_id)).cloned())
    }

    async fn delete(&self, queue_id: QueueId) -> StoreResult<()> {
        self.entries.write().await.remove(&queue_key(queue_id));
        Ok(())
    }

    async fn list(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> StoreResult<DirectoryPage> {
        let entries = self.entries.read().await;
        let page: Vec<(&String, &QueueMetadata)> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| cursor.is_none_or(|after| key.as_str() > after))
            .take(limit)
            .collect();

        let cursor = if limit > 0 && page.len() == limit {
            page.last().map(|(key, _)| (*key).clone())
        } else {
            None
        };

        Ok(DirectoryPage {
            entries: page.into_iter().map(|(_, meta)| meta.clone()).collect(),
            cursor,
        })
    }
}
