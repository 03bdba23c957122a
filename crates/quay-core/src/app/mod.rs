//! App - アプリケーション層
//!
//! ポートを組み合わせて動くサービスにします。
//!
//! # コンポーネント
//! - **MessageEngine**: キューごとのライフサイクル（enqueue, lease, acknowledge, clear）
//! - **QueueActor** / **QueueHandle**: キューごとに直列化されたタスク
//! - **QueueService**: ルーティングテーブル、ディレクトリ、キューの作成と削除
//! - **surface**: メソッドとパスの振り分け、クライアント向けステータスコード
//! - **ServiceConfig**: JSON から読む設定
//! - **QueueStats**: visible / leased の件数

pub mod actor;
pub mod config;
pub mod engine;
pub mod service;
pub mod status;
pub mod surface;

pub use self::actor::{QueueActor, QueueCommand, QueueHandle};
pub use self::config::ServiceConfig;
pub use self::engine::MessageEngine;
pub use self::service::{QueueListing, QueueService};
pub use self::status::QueueStats;
pub use self::surface::{ApiRequest, ApiResponse, Method, dispatch};
