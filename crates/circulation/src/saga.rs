//! Saga state machine for one borrow or return call.
//!
//! Forward path:
//!
//! ```text
//! borrow: Start -> StockChecked -> StockUpdated -> RecordWritten -> Done
//! return: Start -> StockChecked -> RecordWritten -> StockUpdated -> Done
//! ```
//!
//! Compensation paths:
//!
//! ```text
//! borrow: StockUpdated -> RecordWriteFailed -> StockRestored -> Aborted
//!         StockChecked -> StockUpdateFailed -> Aborted
//! return: RecordWritten -> StockUpdateFailed -> RecordRestored -> Aborted
//! ```
//!
//! A failed compensation goes straight from the `*Failed` state to `Aborted`.

use serde::Serialize;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaKind {
    Borrow,
    Return,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaState {
    Start,
    StockChecked,
    StockUpdated,
    RecordWritten,
    Done,
    StockUpdateFailed,
    RecordWriteFailed,
    StockRestored,
    RecordRestored,
    Aborted,
}

impl SagaState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SagaState::Done | SagaState::Aborted)
    }
}

impl SagaKind {
    /// Whether `from -> to` is an edge of this saga's state machine.
    pub fn allows(self, from: SagaState, to: SagaState) -> bool {
        use SagaState::*;

        // Lookups and validation can abort before anything was written.
        if matches!((from, to), (Start, Aborted) | (StockChecked, Aborted)) {
            return true;
        }

        match self {
            SagaKind::Borrow => matches!(
                (from, to),
                (Start, StockChecked)
                    | (StockChecked, StockUpdated)
                    | (StockChecked, StockUpdateFailed)
                    | (StockUpdateFailed, Aborted)
                    | (StockUpdated, RecordWritten)
                    | (StockUpdated, RecordWriteFailed)
                    | (RecordWritten, Done)
                    | (RecordWriteFailed, StockRestored)
                    | (RecordWriteFailed, Aborted)
                    | (StockRestored, Aborted)
            ),
            SagaKind::Return => matches!(
                (from, to),
                (Start, StockChecked)
                    | (StockChecked, RecordWritten)
                    | (RecordWritten, StockUpdated)
                    | (RecordWritten, StockUpdateFailed)
                    | (StockUpdated, Done)
                    | (StockUpdateFailed, RecordRestored)
                    | (StockUpdateFailed, Aborted)
                    | (RecordRestored, Aborted)
            ),
        }
    }
}

/// Tracks the current state of one saga run and traces each transition.
#[derive(Debug)]
pub(crate) struct Saga {
    kind: SagaKind,
    state: SagaState,
}

impl Saga {
    pub(crate) fn begin(kind: SagaKind) -> Self {
        Self {
            kind,
            state: SagaState::Start,
        }
    }

    pub(crate) fn state(&self) -> SagaState {
        self.state
    }

    pub(crate) fn advance(&mut self, to: SagaState) {
        debug_assert!(
            self.kind.allows(self.state, to),
            "illegal {:?} saga transition {:?} -> {:?}",
            self.kind,
            self.state,
            to
        );
        tracing::debug!(saga = ?self.kind, from = ?self.state, to = ?to, "saga transition");
        self.state = to;
    }

    /// Move to `Aborted` and hand back the error that caused it.
    pub(crate) fn abort<E>(&mut self, error: E) -> E {
        self.advance(SagaState::Aborted);
        error
    }
}
