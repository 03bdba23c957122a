//! Queue - キューのメタデータ

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::QueueId;

/// visibility timeout の既定値（秒）
pub const DEFAULT_VISIBILITY_TIMEOUT: u64 = 30;

/// キュー作成のリクエスト。どちらのフィールドも省略できる。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewQueue {
    pub name: Option<String>,
    pub visibility_timeout: Option<u64>,
}

/// 作成時に一度だけ決まり、キューが消えるまで変わらない
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetadata {
    pub queue_id: QueueId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// lease が秒数を指定しなかった時にメッセージを隠す秒数
    pub visibility_timeout: u64,
    pub created_time: DateTime<Utc>,
}

impl QueueMetadata {
    pub fn new(
        queue_id: QueueId,
        request: NewQueue,
        default_visibility_timeout: u64,
        created_time: DateTime<Utc>,
    ) -> Self {
        Self {
            queue_id,
            name: request.name,
            visibility_timeout: request
                .visibility_timeout
                .unwrap_or(default_visibility_timeout),
            created_time,
        }
    }
}
