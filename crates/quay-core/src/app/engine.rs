//! MessageEngine - キュー 1 つ分のメッセージライフサイクル
//!
//! 可視性はストアのキーに埋め込みます。
//! - 新しいメッセージは message id（enqueue 時刻）の下に置く
//! - lease すると、再び見えるべき時刻の新しいキーへ移す。このキーが pop receipt
//!
//! 「準備済み」は「キーの時刻 <= now」なので、now で区切った昇順スキャン 1 回で
//! 準備済みのレコードが古い順にすべて見つかります。
//!
//! エンジン自身はロックしません。同時に操作するのは 1 つの呼び出し元（キューの
//! アクター）だけでなければならず、そうでないと 2 つの lease が同じレコードを取りえます。

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::domain::{
    Message, MessageId, MessageMetadata, PopReceipt, PoppedMessage, QueueError, QueueId,
    QueueResult, StoredMessage,
};
use crate::ports::{Clock, MessageStore, SortableIdGenerator, WriteBatch};

use super::status::QueueStats;

pub struct MessageEngine {
    queue_id: QueueId,
    store: Arc<dyn MessageStore>,
    clock: Arc<dyn Clock>,
    ids: SortableIdGenerator,
}

impl MessageEngine {
    pub fn new(queue_id: QueueId, store: Arc<dyn MessageStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            queue_id,
            store,
            clock,
            ids: SortableIdGenerator::new(),
        }
    }

    /// 保存済みのレコードから ID ジェネレータを初期化する
    ///
    /// 再起動後に発行する ID は、時計が戻っていても既存のものより後ろに並ぶ。
    pub async fn recover(&mut self) -> QueueResult<()> {
        let records = self.store.list_all().await?;
        for (key, record) in &records {
            self.ids.observe_issued(record.message().message_id.as_ulid());
            self.ids.observe(*key);
        }
        debug!(queue_id = %self.queue_id, records = records.len(), "id generator seeded");
        Ok(())
    }

    pub fn queue_id(&self) -> QueueId {
        self.queue_id
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// 新しい visible メッセージを保存する
    #[instrument(skip_all, fields(queue_id = %self.queue_id))]
    pub async fn enqueue(&mut self, body: String) -> QueueResult<MessageMetadata> {
        if body.is_empty() {
            return Err(QueueError::invalid("message_body must not be empty"));
        }

        let now = self.clock.now();
        let message = Message {
            message_id: MessageId::from_ulid(self.ids.next(now)),
            queue_id: self.queue_id,
            inserted_time: now,
            message_body: body,
        };
        let metadata = message.metadata();

        self.store
            .put(message.message_id.as_ulid(), StoredMessage::Visible(message))
            .await?;

        debug!(message_id = %metadata.message_id, "enqueued");
        Ok(metadata)
    }

    /// 準備済みのメッセージを最大 `limit` 件 lease し、それぞれ
    /// `visibility_timeout` 秒隠す
    ///
    /// 古いキーの削除と新しいキーの書き込みは 1 つのバッチなので、
    /// 同じレコードが両方のキーに存在することはない。
    #[instrument(skip_all, fields(queue_id = %self.queue_id, limit = limit, visibility_timeout = visibility_timeout))]
    pub async fn lease(
        &mut self,
        limit: usize,
        visibility_timeout: u64,
    ) -> QueueResult<Vec<PoppedMessage>> {
        if limit == 0 {
            return Err(QueueError::invalid("limit must be at least 1"));
        }

        let now = self.clock.now();
        // now + 1ms の排他境界: now 以前の時刻のキーが準備済み
        let bound = SortableIdGenerator::encode(now + chrono::Duration::milliseconds(1));
        let ready = self.store.scan(bound.lower_key(), limit).await?;
        if ready.is_empty() {
            return Ok(Vec::new());
        }

        let mut batch = WriteBatch::new();
        let mut leased = Vec::with_capacity(ready.len());
        for (old_key, record) in ready {
            let pop_receipt = PopReceipt::from_ulid(self.ids.next_after(now, visibility_timeout));
            let popped = PoppedMessage {
                message: record.into_message(),
                pop_receipt,
                visibility_timeout,
            };
            batch.delete(old_key);
            batch.put(pop_receipt.as_ulid(), StoredMessage::Leased(popped.clone()));
            leased.push(popped);
        }
        self.store.apply(batch).await?;

        debug!(count = leased.len(), "leased");
        Ok(leased)
    }

    /// `pop_receipt` の下で lease されているのが `message_id` なら削除する
    ///
    /// それ以外は何も変えず、不正なリクエストになる。
    #[instrument(skip_all, fields(queue_id = %self.queue_id, message_id = %message_id, pop_receipt = %pop_receipt))]
    pub async fn acknowledge(
        &mut self,
        message_id: MessageId,
        pop_receipt: PopReceipt,
    ) -> QueueResult<()> {
        match self.store.get(pop_receipt.as_ulid()).await? {
            Some(StoredMessage::Leased(popped)) if popped.message.message_id == message_id => {
                self.store.delete(pop_receipt.as_ulid()).await?;
                debug!("acknowledged");
                Ok(())
            }
            _ => Err(QueueError::invalid(format!(
                "no message {message_id} is leased under pop receipt {pop_receipt}"
            ))),
        }
    }

    /// このキューの全レコードを消す
    #[instrument(skip_all, fields(queue_id = %self.queue_id))]
    pub async fn clear(&mut self) -> QueueResult<()> {
        self.store.delete_all().await?;
        Ok(())
    }

    pub async fn stats(&self) -> QueueResult<QueueStats> {
        let records = self.store.list_all().await?;
        Ok(QueueStats::from_records(
            records.iter().map(|(_, record)| record),
            self.clock.now_ms(),
        ))
    }
}
