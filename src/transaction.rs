//! Storage transactions
//!
//! Back-ends without transactional semantics hand out the shared
//! [`EmptyTransaction`]. Back-ends with real transactions implement
//! [`Transaction`] themselves and use [`TransactionStatus`] to enforce the
//! `Open -> Committed | RolledBack` lifecycle.

use std::sync::{Arc, LazyLock, Mutex};

use async_trait::async_trait;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Committed,
    RolledBack,
}

#[async_trait]
pub trait Transaction: Send + Sync {
    fn state(&self) -> TransactionState;

    /// Apply all buffered work. Fails once the transaction is closed.
    async fn commit(&self) -> Result<()>;

    /// Discard all buffered work. Fails once the transaction is closed.
    async fn rollback(&self) -> Result<()>;
}

static EMPTY_TRANSACTION: LazyLock<Arc<EmptyTransaction>> =
    LazyLock::new(|| Arc::new(EmptyTransaction));

/// Stateless no-op transaction.
#[derive(Debug, Default)]
pub struct EmptyTransaction;

impl EmptyTransaction {
    /// The process-wide instance.
    pub fn shared() -> Arc<dyn Transaction> {
        EMPTY_TRANSACTION.clone()
    }
}

#[async_trait]
impl Transaction for EmptyTransaction {
    fn state(&self) -> TransactionState {
        TransactionState::Open
    }

    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        Ok(())
    }
}

/// Lifecycle guard shared by stateful transactions.
#[derive(Debug)]
pub struct TransactionStatus {
    state: Mutex<TransactionState>,
}

impl Default for TransactionStatus {
    fn default() -> Self {
        Self {
            state: Mutex::new(TransactionState::Open),
        }
    }
}

impl TransactionStatus {
    pub fn get(&self) -> TransactionState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_open(&self) -> bool {
        self.get() == TransactionState::Open
    }

    /// Fail unless the transaction is still open.
    pub fn ensure_open(&self) -> Result<()> {
        match self.get() {
            TransactionState::Open => Ok(()),
            closed => Err(Error::invalid_state(format!(
                "transaction is already {:?}",
                closed
            ))),
        }
    }

    /// Move from `Open` to a terminal state.
    pub fn close(&self, to: TransactionState) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *state != TransactionState::Open {
            return Err(Error::invalid_state(format!(
                "transaction is already {:?}",
                *state
            )));
        }
        *state = to;
        Ok(())
    }
}
