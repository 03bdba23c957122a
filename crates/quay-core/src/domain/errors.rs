//! Errors - エラー型と分類
//!
//! ストアのエラー（インフラ）とキューのエラー（ドメイン）を分け、
//! クライアントにはステータスコードで分類を返します。

use thiserror::Error;

use super::ids::IdParseError;

/// ErrorKind はクライアントに見せる分類
///
/// # 分類
/// - InvalidRequest: 不正な入力、空の body、一致しない acknowledge (400)
/// - NotFound: 存在しないか削除済みのキュー (404)
/// - Internal: ストアまたはアクターの障害 (500)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    NotFound,
    Internal,
}

impl ErrorKind {
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::InvalidRequest => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Internal => 500,
        }
    }
}

/// StoreError はストア層のエラー。インフラ障害だけで、ドメインエラーは返さない。
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] redb::Error),
}

// redb は操作ごとにエラー型が分かれているので、すべて redb::Error 経由で受ける
macro_rules! database_error {
    ($($source:ty),* $(,)?) => {
        $(
            impl From<$source> for StoreError {
                fn from(err: $source) -> Self {
                    StoreError::Database(err.into())
                }
            }
        )*
    };
}

database_error!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

/// QueueError はエンジン・アクター・サービスのエラー
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error("queue actor unavailable: {0}")]
    ActorUnavailable(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl QueueError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        QueueError::InvalidRequest(reason.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            QueueError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            QueueError::QueueNotFound(_) => ErrorKind::NotFound,
            QueueError::ActorUnavailable(_) | QueueError::Store(_) => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }
}

impl From<IdParseError> for QueueError {
    fn from(err: IdParseError) -> Self {
        QueueError::InvalidRequest(err.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type QueueResult<T> = std::result::Result<T, QueueError>;
