//! Batch results
//!
//! Batch calls run under one lock acquisition and report one outcome per
//! input item, in input order.

use crate::error::Result;
use crate::StockroomError;

/// What a failing item does to the rest of the batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchPolicy {
    /// Attempt every item and report each independently
    #[default]
    BestEffort,

    /// Stop at the first failure; later items are reported as skipped
    StopOnError,
}

/// Outcome of one batch item
#[derive(Debug)]
pub enum ItemOutcome<T> {
    Done(T),
    Failed(StockroomError),
    Skipped,
}

impl<T> ItemOutcome<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, ItemOutcome::Done(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            ItemOutcome::Done(v) => Some(v),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&StockroomError> {
        match self {
            ItemOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// `Skipped` becomes `Err(StockroomError::Skipped)`
    pub fn into_result(self) -> Result<T> {
        match self {
            ItemOutcome::Done(v) => Ok(v),
            ItemOutcome::Failed(e) => Err(e),
            ItemOutcome::Skipped => Err(StockroomError::Skipped),
        }
    }
}

/// Per-item outcomes of a batch call
#[derive(Debug)]
pub struct BatchReport<T> {
    pub items: Vec<ItemOutcome<T>>,
}

impl<T> BatchReport<T> {
    /// Apply `op` to every input under `policy`
    pub(crate) fn run<I, F>(inputs: I, policy: BatchPolicy, mut op: F) -> Self
    where
        I: IntoIterator,
        F: FnMut(I::Item) -> Result<T>,
    {
        let mut stopped = false;
        let items = inputs
            .into_iter()
            .map(|input| {
                if stopped {
                    return ItemOutcome::Skipped;
                }
                match op(input) {
                    Ok(v) => ItemOutcome::Done(v),
                    Err(e) => {
                        stopped = policy == BatchPolicy::StopOnError;
                        ItemOutcome::Failed(e)
                    }
                }
            })
            .collect();
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.is_done()).count()
    }

    pub fn failed(&self) -> usize {
        self.items.iter().filter(|i| i.error().is_some()).count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.items.iter().all(ItemOutcome::is_done)
    }

    /// Successful values, in input order
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.items.iter().filter_map(ItemOutcome::value)
    }

    pub fn into_results(self) -> Vec<Result<T>> {
        self.items.into_iter().map(ItemOutcome::into_result).collect()
    }
}
