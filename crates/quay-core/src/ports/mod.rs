//! Ports - 抽象化レイヤー
//!
//! ライフサイクルエンジンの外側との継ぎ目です。
//! - 時刻（Clock）
//! - ID 生成（SortableIdGenerator）
//! - キューごとの順序付きストア（MessageStore / StoreFactory）
//! - 全キュー共有のディレクトリ（QueueDirectory）
//!
//! 実装は `impls` にあります。

pub mod clock;
pub mod directory;
pub mod id_generator;
pub mod message_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::directory::{DirectoryPage, QueueDirectory, QUEUE_KEY_PREFIX, queue_key};
pub use self::id_generator::{SortableIdGenerator, TimePrefix};
pub use self::message_store::{BatchOp, MessageStore, StoreFactory, WriteBatch};
