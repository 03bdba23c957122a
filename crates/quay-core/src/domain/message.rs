//! Message - クライアントに見せる形とストアに置く形

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::ids::{MessageId, PopReceipt, QueueId};
use super::state::MessageState;

/// enqueue の戻り値
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub message_id: MessageId,
    pub queue_id: QueueId,
    pub inserted_time: DateTime<Utc>,
}

/// 一度も lease されていないメッセージ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub queue_id: QueueId,
    pub inserted_time: DateTime<Utc>,
    pub message_body: String,
}

impl Message {
    pub fn metadata(&self) -> MessageMetadata {
        MessageMetadata {
            message_id: self.message_id,
            queue_id: self.queue_id,
            inserted_time: self.inserted_time,
        }
    }
}

/// 一度以上 lease されたメッセージ
///
/// `pop_receipt` の下に保存され、receipt のタイムスタンプが再び見えるようになる時刻。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoppedMessage {
    #[serde(flatten)]
    pub message: Message,
    pub pop_receipt: PopReceipt,
    /// lease で指定された秒数
    pub visibility_timeout: u64,
}

/// キューのストアの 1 レコード
///
/// enqueue されて acknowledge されていないメッセージ 1 つにちょうど 1 つ。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum StoredMessage {
    Visible(Message),
    Leased(PoppedMessage),
}

impl StoredMessage {
    /// このレコードが置かれるキー
    pub fn key(&self) -> Ulid {
        match self {
            StoredMessage::Visible(message) => message.message_id.as_ulid(),
            StoredMessage::Leased(popped) => popped.pop_receipt.as_ulid(),
        }
    }

    pub fn message(&self) -> &Message {
        match self {
            StoredMessage::Visible(message) => message,
            StoredMessage::Leased(popped) => &popped.message,
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            StoredMessage::Visible(message) => message,
            StoredMessage::Leased(popped) => popped.message,
        }
    }

    /// `now_ms` 時点の状態。キーに埋め込まれた時刻から決まる。
    pub fn state_at(&self, now_ms: u64) -> MessageState {
        if self.key().timestamp_ms() <= now_ms {
            MessageState::Visible
        } else {
            MessageState::Leased
        }
    }
}
