//! Impls - ポートの実装
//!
//! # 含まれるもの
//! - **InMemoryMessageStore** / **InMemoryStoreFactory**: プロセスが生きている間だけのストレージ
//! - **RedbMessageStore** / **RedbStoreFactory**: redb ファイル 1 つに全キューを永続化
//! - **InMemoryQueueDirectory**: ページング付きのキュー一覧

pub mod memory_directory;
pub mod memory_store;
pub mod redb_store;

pub use self::memory_directory::InMemoryQueueDirectory;
pub use self::memory_store::{InMemoryMessageStore, InMemoryStoreFactory};
pub use self::redb_store::{RedbMessageStore, RedbStoreFactory};
