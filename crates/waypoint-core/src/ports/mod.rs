//! Ports - 抽象化レイヤー
//!
//! 外部システム（broker, S3, scan API, scanner）へのインターフェース。
//! 実装は `impls` にある。

pub mod executor;
pub mod object_store;
pub mod scan_api;
pub mod transport;

pub use self::executor::ScanExecutor;
pub use self::object_store::{ObjectStore, StorageError};
pub use self::scan_api::{ApiError, ScanApi};
pub use self::transport::{
    Acker, Delivery, DeliveryStream, Transport, TransportConnector, TransportError,
};
