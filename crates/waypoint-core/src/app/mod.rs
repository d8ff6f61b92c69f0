//! App - アプリケーション層
//!
//! ports を組み合わせて受信・追跡・URL 解決・終了処理を実装する。
//!
//! # 主要コンポーネント
//! - **TaskTracker**: 処理中タスクの登録簿
//! - **Consumer**: 受信ループ（decode → 登録 → spawn → ack）
//! - **TaskProcessor**: 1 タスク分の処理
//! - **UrlResolver**: 4 つの取得戦略から対象 URL を集める
//! - **Service**: 再接続つき consumer 監督 + drain
//! - **Publisher**: producer 側

pub mod consumer;
pub mod processor;
pub mod publisher;
pub mod resolver;
pub mod retry;
pub mod service;
pub mod shutdown;
pub mod tracker;

pub use self::consumer::{AckTiming, Consumer, ConsumerExit, ConsumerSettings, ConsumerState};
pub use self::processor::TaskProcessor;
pub use self::publisher::Publisher;
pub use self::resolver::{ResolveRequest, Strategy, UrlResolver};
pub use self::retry::RetryPolicy;
pub use self::service::{Service, ServiceSettings};
pub use self::shutdown::{DrainConfig, DrainOutcome, drain, wait_for_shutdown_signal};
pub use self::tracker::{TaskSummary, TaskTracker};
