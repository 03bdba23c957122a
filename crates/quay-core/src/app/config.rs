//! ServiceConfig - サービスの設定
//!
//! 全フィールドに既定値があるので、空の JSON オブジェクトもファイルなしも
//! 正しい設定です。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{DEFAULT_VISIBILITY_TIMEOUT, StoreResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// 作成時に指定がなかったキューの visibility timeout（秒）
    pub default_visibility_timeout: u64,

    /// 一覧 1 ページあたりの最大キュー数
    pub list_page_size: usize,

    /// 送信側を待たせるまでにアクターが溜めるコマンド数
    pub mailbox_capacity: usize,

    /// redb ファイルを置くディレクトリ。`None` なら全部メモリ上。
    pub data_dir: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            list_page_size: 1000,
            mailbox_capacity: 64,
            data_dir: None,
        }
    }
}

impl ServiceConfig {
    pub async fn load(path: &Path) -> StoreResult<Self> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
