//! waypoint-core
//!
//! Scan-job intake and dispatch: queue consumption, in-flight task tracking,
//! target URL resolution and drain-before-exit shutdown.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（TaskId, JobEnvelope, Task, ScanOutcome, URL の wire 形式）
//! - **ports**: 外部とのインターフェース（Transport, ObjectStore, ScanApi, ScanExecutor）
//! - **app**: アプリケーションロジック（TaskTracker, Consumer, UrlResolver, Service, shutdown）
//! - **impls**: 実装（AMQP, S3, HTTP, InMemoryBroker）
//! - **config**: YAML 設定
//! - **observability**: tracing の初期化

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;

pub use error::WaypointError;
