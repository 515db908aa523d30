//! Transaction
//!
//! Stages saves, updates and deletes against one store and applies them
//! all-or-nothing. The exclusive store lock is held from `begin` until the
//! transaction ends, so staged reads see a stable durable state.

use std::collections::BTreeMap;
use std::mem;

use serde_json::Value;
use tracing::{debug, info};

use crate::engine::{Engine, Mutation};
use crate::error::Result;
use crate::lock::ExclusiveGuard;
use crate::record;
use crate::StockroomError;

/// Lifecycle of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Open,
    Committed,
    Aborted,
}

/// Final staged operation for one id
#[derive(Debug, Clone)]
enum Staged {
    Put(Value),
    Delete,
}

/// A unit of staged changes, applied on `commit`
///
/// Dropping an open transaction aborts it.
pub struct Transaction<'e> {
    engine: &'e Engine,
    _guard: ExclusiveGuard<'e>,
    staged: BTreeMap<String, Staged>,

    /// Ids in the order they were first staged
    order: Vec<String>,
    state: TxnState,
}

impl<'e> Transaction<'e> {
    pub(crate) fn new(engine: &'e Engine, guard: ExclusiveGuard<'e>) -> Self {
        debug!("transaction started");
        Self {
            engine,
            _guard: guard,
            staged: BTreeMap::new(),
            order: Vec::new(),
            state: TxnState::Open,
        }
    }

    /// Stage a new document; returns the id it will be stored under
    pub fn save(&mut self, doc: Value) -> Result<String> {
        let (id, doc) = record::prepare_new(doc, self.engine.config())?;
        if self.current(&id)?.is_some() {
            return Err(StockroomError::Duplicate(id));
        }
        self.stage(&id, Staged::Put(doc));
        Ok(id)
    }

    /// Stage a replacement for a record visible to this transaction
    pub fn update(&mut self, id: &str, doc: Value) -> Result<()> {
        let previous = self
            .current(id)?
            .ok_or_else(|| StockroomError::NotFound(id.to_string()))?;
        let doc = record::prepare_replacement(id, doc, &previous, self.engine.config())?;
        self.stage(id, Staged::Put(doc));
        Ok(())
    }

    /// Stage removal of a record visible to this transaction
    pub fn delete(&mut self, id: &str) -> Result<()> {
        if self.current(id)?.is_none() {
            return Err(StockroomError::NotFound(id.to_string()));
        }
        self.stage(id, Staged::Delete);
        Ok(())
    }

    /// Read through staged changes
    pub fn get(&self, id: &str) -> Result<Value> {
        self.current(id)?
            .ok_or_else(|| StockroomError::NotFound(id.to_string()))
    }

    /// Number of ids with staged changes
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Apply every staged change or none
    ///
    /// On failure the durable state is restored byte for byte and the error
    /// comes back as `TransactionAborted`.
    pub fn commit(mut self) -> Result<()> {
        let staged = mem::take(&mut self.staged);
        let order = mem::take(&mut self.order);

        let mut mutation = Mutation::begin(self.engine);
        let mut applied = Ok(());
        for id in &order {
            let step = match staged.get(id) {
                Some(Staged::Put(doc)) => mutation.put(id, doc),
                // a staged save followed by a delete never reached disk
                Some(Staged::Delete) if !self.engine.records().exists(id) => Ok(()),
                Some(Staged::Delete) => mutation.erase(id),
                None => Ok(()),
            };
            if let Err(e) = step {
                applied = Err(e);
                break;
            }
        }

        match mutation.finish(applied) {
            Ok(()) => {
                self.state = TxnState::Committed;
                info!(changes = order.len(), "transaction committed");
                Ok(())
            }
            Err(e) => {
                self.state = TxnState::Aborted;
                Err(match e {
                    aborted @ StockroomError::TransactionAborted(_) => aborted,
                    other => StockroomError::TransactionAborted(other.to_string()),
                })
            }
        }
    }

    /// Discard every staged change
    pub fn abort(mut self) {
        self.discard();
    }

    fn discard(&mut self) {
        if self.state == TxnState::Open {
            debug!(discarded = self.staged.len(), "transaction aborted");
            self.staged.clear();
            self.order.clear();
            self.state = TxnState::Aborted;
        }
    }

    fn stage(&mut self, id: &str, op: Staged) {
        if self.staged.insert(id.to_string(), op).is_none() {
            self.order.push(id.to_string());
        }
    }

    /// Record as this transaction sees it, `None` if absent
    fn current(&self, id: &str) -> Result<Option<Value>> {
        match self.staged.get(id) {
            Some(Staged::Put(doc)) => return Ok(Some(doc.clone())),
            Some(Staged::Delete) => return Ok(None),
            None => {}
        }
        match self.engine.records().read(id) {
            Ok(doc) => Ok(Some(doc)),
            Err(StockroomError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.discard();
    }
}
