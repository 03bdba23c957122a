//! QueueActor - キュー 1 つの唯一の書き手
//!
//! キューごとに tokio タスクを 1 つ持ち、そのタスクが `MessageEngine` と
//! tombstone フラグを所有します。呼び出し側は `QueueHandle` 経由でコマンドを
//! 有界メールボックスに積み、oneshot の返信を待ちます。コマンドはメールボックスの
//! 順に 1 つずつ実行されるので、ストアへの操作が交錯することはありません。

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::domain::{
    MessageId, MessageMetadata, PopReceipt, PoppedMessage, QueueError, QueueId, QueueMetadata,
    QueueResult,
};
use crate::ports::{Clock, MessageStore};

use super::engine::MessageEngine;
use super::status::QueueStats;

type Reply<T> = oneshot::Sender<QueueResult<T>>;

/// キューアクターが受け付けるコマンド。どれも返信チャネルを持つ。
pub enum QueueCommand {
    Create {
        metadata: QueueMetadata,
        reply: Reply<QueueMetadata>,
    },
    Enqueue {
        body: String,
        reply: Reply<MessageMetadata>,
    },
    Lease {
        limit: usize,
        visibility_timeout: Option<u64>,
        reply: Reply<Vec<PoppedMessage>>,
    },
    Acknowledge {
        message_id: MessageId,
        pop_receipt: PopReceipt,
        reply: Reply<()>,
    },
    Metadata {
        reply: Reply<QueueMetadata>,
    },
    Stats {
        reply: Reply<QueueStats>,
    },
    Delete {
        reply: Reply<()>,
    },
}

pub struct QueueActor {
    engine: MessageEngine,
    metadata: Option<QueueMetadata>,
    deleted: bool,
}

impl QueueActor {
    /// 永続化された状態を読み込んでタスクを起動する
    ///
    /// tombstone とメタデータの読み込み、ID ジェネレータの初期化はメールボックスを
    /// 作る前に済ませるので、最初のコマンドからそれが見える。
    pub async fn spawn(
        queue_id: QueueId,
        store: Arc<dyn MessageStore>,
        clock: Arc<dyn Clock>,
        mailbox_capacity: usize,
    ) -> QueueResult<QueueHandle> {
        let deleted = store.is_tombstoned().await?;
        let metadata = store.metadata().await?;

        let mut engine = MessageEngine::new(queue_id, store, clock);
        engine.recover().await?;

        let actor = QueueActor {
            engine,
            metadata,
            deleted,
        };

        let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
        tokio::spawn(actor.run(rx));

        debug!(queue_id = %queue_id, deleted, "queue actor started");
        Ok(QueueHandle { queue_id, tx })
    }

    async fn run(mut self, mut rx: mpsc::Receiver<QueueCommand>) {
        while let Some(command) = rx.recv().await {
            self.handle(command).await;
        }
        debug!(queue_id = %self.engine.queue_id(), "queue actor stopped");
    }

    async fn handle(&mut self, command: QueueCommand) {
        // 受信側が落ちていても処理自体は済んでいる
        match command {
            QueueCommand::Create { metadata, reply } => {
                let _ = reply.send(self.create(metadata).await);
            }
            QueueCommand::Enqueue { body, reply } => {
                let result = match self.live() {
                    Ok(_) => self.engine.enqueue(body).await,
                    Err(err) => Err(err),
                };
                let _ = reply.send(result);
            }
            QueueCommand::Lease {
                limit,
                visibility_timeout,
                reply,
            } => {
                let result = match self.live() {
                    Ok(metadata) => {
                        let timeout = visibility_timeout.unwrap_or(metadata.visibility_timeout);
                        self.engine.lease(limit, timeout).await
                    }
                    Err(err) => Err(err),
                };
                let _ = reply.send(result);
            }
            QueueCommand::Acknowledge {
                message_id,
                pop_receipt,
                reply,
            } => {
                let result = match self.live() {
                    Ok(_) => self.engine.acknowledge(message_id, pop_receipt).await,
                    Err(err) => Err(err),
                };
                let _ = reply.send(result);
            }
            QueueCommand::Metadata { reply } => {
                let _ = reply.send(self.live().cloned());
            }
            QueueCommand::Stats { reply } => {
                let result = match self.live() {
                    Ok(_) => self.engine.stats().await,
                    Err(err) => Err(err),
                };
                let _ = reply.send(result);
            }
            QueueCommand::Delete { reply } => {
                let _ = reply.send(self.delete().await);
            }
        }
    }

    fn not_found(&self) -> QueueError {
        QueueError::QueueNotFound(self.engine.queue_id().to_string())
    }

    /// キューが存在し削除されていなければそのメタデータ
    fn live(&self) -> QueueResult<&QueueMetadata> {
        if self.deleted {
            return Err(self.not_found());
        }
        self.metadata.as_ref().ok_or_else(|| self.not_found())
    }

    async fn create(&mut self, metadata: QueueMetadata) -> QueueResult<QueueMetadata> {
        if self.deleted {
            return Err(self.not_found());
        }
        if self.metadata.is_some() {
            return Err(QueueError::invalid(format!(
                "queue {} already exists",
                metadata.queue_id
            )));
        }

        self.engine.store().put_metadata(&metadata).await?;
        self.metadata = Some(metadata.clone());
        Ok(metadata)
    }

    /// tombstone を永続化してからフラグを立て、最後にレコードを消す
    ///
    /// tombstone の書き込みに失敗したらキューは何も変わらない。消去に失敗しても
    /// キューは削除済みのままで、残ったレコードには二度と届かない。
    async fn delete(&mut self) -> QueueResult<()> {
        self.live()?;
        let queue_id = self.engine.queue_id();

        if let Err(err) = self.engine.store().set_tombstone().await {
            warn!(queue_id = %queue_id, error = %err, "failed to persist tombstone");
            return Err(err.into());
        }
        self.deleted = true;
        self.metadata = None;

        if let Err(err) = self.engine.clear().await {
            warn!(queue_id = %queue_id, error = %err, "tombstoned queue left records behind");
            return Err(err);
        }

        info!(queue_id = %queue_id, "queue deleted");
        Ok(())
    }
}

/// キューアクターの送信側。clone は安い。
#[derive(Clone)]
pub struct QueueHandle {
    queue_id: QueueId,
    tx: mpsc::Sender<QueueCommand>,
}

impl QueueHandle {
    pub fn queue_id(&self) -> QueueId {
        self.queue_id
    }

    /// 返信を待たずにコマンドをメールボックスに積む
    pub async fn send(&self, command: QueueCommand) -> QueueResult<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| QueueError::ActorUnavailable(self.queue_id.to_string()))
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> QueueCommand) -> QueueResult<T> {
        let (reply, rx) = oneshot::channel();
        self.send(command(reply)).await?;
        rx.await
            .map_err(|_| QueueError::ActorUnavailable(self.queue_id.to_string()))?
    }

    pub async fn create(&self, metadata: QueueMetadata) -> QueueResult<QueueMetadata> {
        self.request(|reply| QueueCommand::Create { metadata, reply })
            .await
    }

    pub async fn enqueue(&self, body: String) -> QueueResult<MessageMetadata> {
        self.request(|reply| QueueCommand::Enqueue { body, reply })
            .await
    }

    pub async fn lease(
        &self,
        limit: usize,
        visibility_timeout: Option<u64>,
    ) -> QueueResult<Vec<PoppedMessage>> {
        self.request(|reply| QueueCommand::Lease {
            limit,
            visibility_timeout,
            reply,
        })
        .await
    }

    pub async fn acknowledge(
        &self,
        message_id: MessageId,
        pop_receipt: PopReceipt,
    ) -> QueueResult<()> {
        self.request(|reply| QueueCommand::Acknowledge {
            message_id,
            pop_receipt,
            reply,
        })
        .await
    }

    pub async fn metadata(&self) -> QueueResult<QueueMetadata> {
        self.request(|reply| QueueCommand::Metadata { reply }).await
    }

    pub async fn stats(&self) -> QueueResult<QueueStats> {
        self.request(|reply| QueueCommand::Stats { reply }).await
    }

    pub async fn delete(&self) -> QueueResult<()> {
        self.request(|reply| QueueCommand::Delete { reply }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewQueue, StoreError, StoreResult, StoredMessage};
    use crate::impls::InMemoryMessageStore;
    use crate::ports::{FixedClock, WriteBatch};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;
    use ulid::Ulid;

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ))
    }

    async fn live_queue(store: Arc<InMemoryMessageStore>) -> QueueHandle {
        let queue_id = QueueId::from_ulid(Ulid::new());
        let clock = clock();
        let handle = QueueActor::spawn(queue_id, store, clock.clone(), 8)
            .await
            .unwrap();
        let metadata = QueueMetadata::new(
            queue_id,
            NewQueue {
                name: Some("orders".to_string()),
                visibility_timeout: Some(45),
            },
            30,
            clock.now(),
        );
        handle.create(metadata).await.unwrap();
        handle
    }

    #[tokio::test]
    async fn create_persists_metadata() {
        let store = Arc::new(InMemoryMessageStore::new());
        let handle = live_queue(store.clone()).await;

        let meta = handle.metadata().await.unwrap();
        assert_eq!(meta.name.as_deref(), Some("orders"));
        assert_eq!(store.metadata().await.unwrap(), Some(meta));
    }

    #[tokio::test]
    async fn second_create_is_rejected() {
        let store = Arc::new(InMemoryMessageStore::new());
        let handle = live_queue(store).await;
        let meta = handle.metadata().await.unwrap();

        let err = handle.create(meta).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn operations_before_create_are_not_found() {
        let store = Arc::new(InMemoryMessageStore::new());
        let handle = QueueActor::spawn(QueueId::from_ulid(Ulid::new()), store, clock(), 8)
            .await
            .unwrap();

        let err = handle.enqueue("hi".to_string()).await.unwrap_err();
        assert!(matches!(err, QueueError::QueueNotFound(_)));
    }

    #[tokio::test]
    async fn lease_defaults_to_queue_visibility_timeout() {
        let store = Arc::new(InMemoryMessageStore::new());
        let handle = live_queue(store).await;
        handle.enqueue("hi".to_string()).await.unwrap();

        let leased = handle.lease(1, None).await.unwrap();
        assert_eq!(leased[0].visibility_timeout, 45);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_leases_never_share_a_message() {
        let store = Arc::new(InMemoryMessageStore::new());
        let handle = live_queue(store).await;
        for i in 0..20 {
            handle.enqueue(format!("m{i}")).await.unwrap();
        }

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move { handle.lease(1, Some(30)).await }));
        }

        let mut seen = HashSet::new();
        for task in tasks {
            for m in task.await.unwrap().unwrap() {
                assert!(seen.insert(m.message.message_id), "delivered twice");
            }
        }
        assert_eq!(seen.len(), 20);
    }

    #[tokio::test]
    async fn delete_is_final() {
        let store = Arc::new(InMemoryMessageStore::new());
        let handle = live_queue(store.clone()).await;
        handle.enqueue("hi".to_string()).await.unwrap();

        handle.delete().await.unwrap();
        assert!(store.is_tombstoned().await.unwrap());
        assert!(store.list_all().await.unwrap().is_empty());

        let id = MessageId::from_ulid(Ulid::new());
        let receipt = PopReceipt::from_ulid(Ulid::new());
        assert!(matches!(
            handle.enqueue("again".to_string()).await,
            Err(QueueError::QueueNotFound(_))
        ));
        assert!(matches!(
            handle.lease(1, None).await,
            Err(QueueError::QueueNotFound(_))
        ));
        assert!(matches!(
            handle.acknowledge(id, receipt).await,
            Err(QueueError::QueueNotFound(_))
        ));
        assert!(matches!(
            handle.delete().await,
            Err(QueueError::QueueNotFound(_))
        ));
    }

    /// tombstone の書き込みだけが失敗するストア
    struct TombstoneFails {
        inner: InMemoryMessageStore,
    }

    #[async_trait]
    impl MessageStore for TombstoneFails {
        async fn put(&self, key: Ulid, record: StoredMessage) -> StoreResult<()> {
            self.inner.put(key, record).await
        }
        async fn get(&self, key: Ulid) -> StoreResult<Option<StoredMessage>> {
            self.inner.get(key).await
        }
        async fn delete(&self, key: Ulid) -> StoreResult<bool> {
            self.inner.delete(key).await
        }
        async fn scan(
            &self,
            end_exclusive: Ulid,
            limit: usize,
        ) -> StoreResult<Vec<(Ulid, StoredMessage)>> {
            self.inner.scan(end_exclusive, limit).await
        }
        async fn list_all(&self) -> StoreResult<Vec<(Ulid, StoredMessage)>> {
            self.inner.list_all().await
        }
        async fn delete_all(&self) -> StoreResult<()> {
            self.inner.delete_all().await
        }
        async fn apply(&self, batch: WriteBatch) -> StoreResult<()> {
            self.inner.apply(batch).await
        }
        async fn metadata(&self) -> StoreResult<Option<QueueMetadata>> {
            self.inner.metadata().await
        }
        async fn put_metadata(&self, metadata: &QueueMetadata) -> StoreResult<()> {
            self.inner.put_metadata(metadata).await
        }
        async fn is_tombstoned(&self) -> StoreResult<bool> {
            self.inner.is_tombstoned().await
        }
        async fn set_tombstone(&self) -> StoreResult<()> {
            Err(StoreError::Io(std::io::Error::other("disk full")))
        }
    }

    #[tokio::test]
    async fn failed_tombstone_leaves_the_queue_intact() {
        let store = Arc::new(TombstoneFails {
            inner: InMemoryMessageStore::new(),
        });
        let queue_id = QueueId::from_ulid(Ulid::new());
        let clock = clock();
        let handle = QueueActor::spawn(queue_id, store.clone(), clock.clone(), 8)
            .await
            .unwrap();
        let metadata = QueueMetadata::new(queue_id, NewQueue::default(), 30, clock.now());
        handle.create(metadata.clone()).await.unwrap();
        handle.enqueue("kept".to_string()).await.unwrap();

        let err = handle.delete().await.unwrap_err();
        assert!(matches!(err, QueueError::Store(_)));

        assert_eq!(store.list_all().await.unwrap().len(), 1);
        assert_eq!(store.metadata().await.unwrap(), Some(metadata.clone()));
        assert_eq!(handle.metadata().await.unwrap(), metadata);
        handle.enqueue("still open".to_string()).await.unwrap();
        assert_eq!(handle.lease(10, Some(30)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn tombstone_is_loaded_on_spawn() {
        let store = Arc::new(InMemoryMessageStore::new());
        let handle = live_queue(store.clone()).await;
        let queue_id = handle.queue_id();
        handle.delete().await.unwrap();

        let respawned = QueueActor::spawn(queue_id, store, clock(), 8).await.unwrap();
        assert!(matches!(
            respawned.metadata().await,
            Err(QueueError::QueueNotFound(_))
        ));
        let meta = QueueMetadata::new(queue_id, NewQueue::default(), 30, Utc::now());
        assert!(matches!(
            respawned.create(meta).await,
            Err(QueueError::QueueNotFound(_))
        ));
    }

    #[tokio::test]
    async fn commands_queued_before_delete_complete() {
        let store = Arc::new(InMemoryMessageStore::new());
        let handle = live_queue(store).await;

        let (enqueue_tx, enqueue_rx) = oneshot::channel();
        let (delete_tx, delete_rx) = oneshot::channel();
        let (late_tx, late_rx) = oneshot::channel();
        handle
            .send(QueueCommand::Enqueue {
                body: "first".to_string(),
                reply: enqueue_tx,
            })
            .await
            .unwrap();
        handle
            .send(QueueCommand::Delete { reply: delete_tx })
            .await
            .unwrap();
        handle
            .send(QueueCommand::Enqueue {
                body: "late".to_string(),
                reply: late_tx,
            })
            .await
            .unwrap();

        assert!(enqueue_rx.await.unwrap().is_ok());
        assert!(delete_rx.await.unwrap().is_ok());
        assert!(matches!(
            late_rx.await.unwrap(),
            Err(QueueError::QueueNotFound(_))
        ));
    }

    #[tokio::test]
    async fn stats_track_leases() {
        let store = Arc::new(InMemoryMessageStore::new());
        let handle = live_queue(store).await;
        for body in ["a", "b", "c"] {
            handle.enqueue(body.to_string()).await.unwrap();
        }
        handle.lease(1, Some(30)).await.unwrap();

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats, QueueStats { visible: 2, leased: 1 });
    }
}
