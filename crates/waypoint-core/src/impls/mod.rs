//! Impls - ports の実装
//!
//! # 本番用
//! - **AmqpConnector**: RabbitMQ（lapin）
//! - **S3ObjectStore**: deep-scan 文書（aws-sdk-s3）
//! - **HttpScanApi**: 内部 scan API（reqwest）
//!
//! # 開発・テスト用
//! - **InMemoryBroker**: プロセス内の配送路
//! - **NoopExecutor**: scan 本体の代わり

pub mod amqp;
pub mod http_api;
pub mod inmem_transport;
pub mod noop_executor;
pub mod s3;

pub use self::amqp::AmqpConnector;
pub use self::http_api::HttpScanApi;
pub use self::inmem_transport::InMemoryBroker;
pub use self::noop_executor::NoopExecutor;
pub use self::s3::S3ObjectStore;
