//! Status - キューごとのメッセージ数

use serde::{Deserialize, Serialize};

use crate::domain::{MessageState, StoredMessage};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// 次の lease で取れる
    pub visible: usize,
    /// lease が切れるまで隠れている
    pub leased: usize,
}

impl QueueStats {
    pub fn from_records<'a>(
        records: impl IntoIterator<Item = &'a StoredMessage>,
        now_ms: u64,
    ) -> Self {
        let mut stats = QueueStats::default();
        for record in records {
            match record.state_at(now_ms) {
                MessageState::Visible => stats.visible += 1,
                MessageState::Leased => stats.leased += 1,
            }
        }
        stats
    }
}
