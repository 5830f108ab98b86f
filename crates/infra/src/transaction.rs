//! Transaction boundary for orchestration flows.
//!
//! One transaction per flow invocation; transactions are never shared or nested.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of an open transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(Uuid);

impl TxId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TxId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransactionError {
    #[error("unknown or already finished transaction: {0}")]
    UnknownTransaction(TxId),
    #[error("transaction store lock poisoned")]
    Poisoned,
    #[error("transaction backend error: {0}")]
    Backend(String),
}

pub trait TransactionManager: Send + Sync {
    fn begin(&self) -> Result<TxId, TransactionError>;

    /// Make every write staged under `tx` visible.
    fn commit(&self, tx: &TxId) -> Result<(), TransactionError>;

    /// Discard every write staged under `tx`.
    fn rollback(&self, tx: &TxId) -> Result<(), TransactionError>;
}

impl<T> TransactionManager for Arc<T>
where
    T: TransactionManager + ?Sized,
{
    fn begin(&self) -> Result<TxId, TransactionError> {
        (**self).begin()
    }

    fn commit(&self, tx: &TxId) -> Result<(), TransactionError> {
        (**self).commit(tx)
    }

    fn rollback(&self, tx: &TxId) -> Result<(), TransactionError> {
        (**self).rollback(tx)
    }
}
