//! Domain identifiers (strongly-typed IDs).
//!
//! `TaskId` は transport の delivery tag から作る。
//! 同じ job が再配送されると別の `TaskId` になる（delivery 単位で一意）。

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one in-flight delivery.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(u64);

impl TaskId {
    /// Delivery tag から TaskId を作成
    pub fn from_delivery_tag(tag: u64) -> Self {
        Self(tag)
    }

    pub fn delivery_tag(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(tag: u64) -> Self {
        Self::from_delivery_tag(tag)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_has_prefix() {
        let id = TaskId::from_delivery_tag(42);
        assert_eq!(id.to_string(), "task-42");
        assert_eq!(id.delivery_tag(), 42);
    }

    #[test]
    fn ids_order_by_tag() {
        let a: TaskId = 1.into();
        let b: TaskId = 2.into();
        assert!(a < b);
    }
}
