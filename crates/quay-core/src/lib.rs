//! quay-core
//!
//! Core building blocks for the Quay message-queue service.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, message, queue metadata, state, errors）
//! - **ports**: 抽象化レイヤー（Clock, SortableIdGenerator, MessageStore, QueueDirectory）
//! - **impls**: 実装（インメモリと redb のストア、インメモリのディレクトリ）
//! - **app**: アプリケーションロジック（engine, actor, service, surface, config）
//! - **telemetry**: tracing subscriber の初期化

pub mod domain;
pub mod ports;
pub mod impls;
pub mod app;
pub mod telemetry;
