//! QueueService - ルーティングテーブルとディレクトリの流れ
//!
//! キュー ID からアクター（ストアファクトリから必要になった時に起動）を引き、
//! キューの作成と削除にディレクトリを追従させます。存在の判定はディレクトリ、
//! それ以外はすべてアクターが持ちます。

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument};

use crate::domain::{
    MessageId, MessageMetadata, NewQueue, PopReceipt, PoppedMessage, QueueError, QueueId,
    QueueMetadata, QueueResult,
};
use crate::ports::{Clock, QUEUE_KEY_PREFIX, QueueDirectory, SortableIdGenerator, StoreFactory};

use super::actor::{QueueActor, QueueHandle};
use super::config::ServiceConfig;
use super::status::QueueStats;

/// キュー一覧の 1 ページ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueListing {
    pub queues: Vec<QueueMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

pub struct QueueService {
    config: ServiceConfig,
    directory: Arc<dyn QueueDirectory>,
    stores: Arc<dyn StoreFactory>,
    clock: Arc<dyn Clock>,
    ids: Mutex<SortableIdGenerator>,
    actors: RwLock<HashMap<QueueId, QueueHandle>>,
}

impl QueueService {
    pub fn new(
        config: ServiceConfig,
        directory: Arc<dyn QueueDirectory>,
        stores: Arc<dyn StoreFactory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            directory,
            stores,
            clock,
            ids: Mutex::new(SortableIdGenerator::new()),
            actors: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// ストアファクトリが持っている生きたキューをディレクトリに登録し直す
    ///
    /// 永続ストアで起動した時に使う（キューはインメモリのディレクトリより長生きする）。
    /// 登録した数を返す。
    pub async fn restore(&self) -> QueueResult<usize> {
        let mut restored = 0;
        for queue_id in self.stores.known_queues().await? {
            let store = self.stores.open(queue_id).await?;
            if store.is_tombstoned().await? {
                continue;
            }
            if let Some(metadata) = store.metadata().await? {
                self.directory.put(&metadata).await?;
                restored += 1;
            }
        }
        if restored > 0 {
            info!(restored, "queues restored");
        }
        Ok(restored)
    }

    async fn spawn_actor(&self, queue_id: QueueId) -> QueueResult<QueueHandle> {
        let store = self.stores.open(queue_id).await?;
        QueueActor::spawn(
            queue_id,
            store,
            self.clock.clone(),
            self.config.mailbox_capacity,
        )
        .await
    }

    /// ディレクトリにあるキューを担当するアクター。初回に起動する。
    ///
    /// ストアを開いてアクターを起動する間はロックを持たない。同じキューで競合したら
    /// 先に登録されたほうを使い、負けたアクターはハンドルが落ちた時点で止まる。
    async fn actor(&self, queue_id: QueueId) -> QueueResult<QueueHandle> {
        if let Some(handle) = self.actors.read().await.get(&queue_id) {
            return Ok(handle.clone());
        }

        let spawned = self.spawn_actor(queue_id).await?;

        let mut actors = self.actors.write().await;
        if let Some(handle) = actors.get(&queue_id) {
            return Ok(handle.clone());
        }
        // 起動中に削除されたキューのアクターは tombstone を読む前の状態なので登録しない
        if self.directory.get(queue_id).await?.is_none() {
            return Err(QueueError::QueueNotFound(queue_id.to_string()));
        }
        actors.insert(queue_id, spawned.clone());
        Ok(spawned)
    }

    /// `queue_id` をパースしてディレクトリを確認する。パースできない ID も
    /// 未知の ID もただの not found。
    async fn resolve(&self, queue_id: &str) -> QueueResult<QueueHandle> {
        let not_found = || QueueError::QueueNotFound(queue_id.to_string());
        let id: QueueId = queue_id.parse().map_err(|_| not_found())?;
        if self.directory.get(id).await?.is_none() {
            return Err(not_found());
        }
        self.actor(id).await
    }

    #[instrument(skip_all)]
    pub async fn create_queue(&self, request: NewQueue) -> QueueResult<QueueMetadata> {
        let now = self.clock.now();
        let queue_id = QueueId::from_ulid(self.ids.lock().await.next(now));
        let metadata = QueueMetadata::new(
            queue_id,
            request,
            self.config.default_visibility_timeout,
            now,
        );

        // ID は新品でまだ誰からも引けないので、ルーティングテーブルに直接入れる
        let handle = self.spawn_actor(queue_id).await?;
        let metadata = handle.create(metadata).await?;
        self.actors.write().await.insert(queue_id, handle);
        self.directory.put(&metadata).await?;

        info!(queue_id = %queue_id, name = ?metadata.name, "queue created");
        Ok(metadata)
    }

    pub async fn list_queues(&self, cursor: Option<&str>) -> QueueResult<QueueListing> {
        let page = self
            .directory
            .list(QUEUE_KEY_PREFIX, cursor, self.config.list_page_size)
            .await?;
        Ok(QueueListing {
            queues: page.entries,
            cursor: page.cursor,
        })
    }

    pub async fn get_queue(&self, queue_id: &str) -> QueueResult<QueueMetadata> {
        self.resolve(queue_id).await?.metadata().await
    }

    /// アクター経由で tombstone を立ててから、ディレクトリとルーティングテーブルから外す
    #[instrument(skip_all, fields(queue_id = %queue_id))]
    pub async fn delete_queue(&self, queue_id: &str) -> QueueResult<()> {
        let handle = self.resolve(queue_id).await?;
        handle.delete().await?;

        self.directory.delete(handle.queue_id()).await?;
        self.actors.write().await.remove(&handle.queue_id());

        info!("queue removed");
        Ok(())
    }

    pub async fn enqueue(&self, queue_id: &str, body: String) -> QueueResult<MessageMetadata> {
        self.resolve(queue_id).await?.enqueue(body).await
    }

    /// 最大 `limit` 件（省略時 1）を lease する。visibility timeout を省略したら
    /// キュー自身の値を使う。
    pub async fn lease(
        &self,
        queue_id: &str,
        limit: Option<usize>,
        visibility_timeout: Option<u64>,
    ) -> QueueResult<Vec<PoppedMessage>> {
        self.resolve(queue_id)
            .await?
            .lease(limit.unwrap_or(1), visibility_timeout)
            .await
    }

    pub async fn acknowledge(
        &self,
        queue_id: &str,
        message_id: &str,
        pop_receipt: Option<&str>,
    ) -> QueueResult<()> {
        let handle = self.resolve(queue_id).await?;
        let pop_receipt = pop_receipt.ok_or_else(|| QueueError::invalid("pop_receipt is required"))?;
        let message_id: MessageId = message_id.parse()?;
        let pop_receipt: PopReceipt = pop_receipt.parse()?;
        handle.acknowledge(message_id, pop_receipt).await
    }

    pub async fn stats(&self, queue_id: &str) -> QueueResult<QueueStats> {
        self.resolve(queue_id).await?.stats().await
    }
}
