//! Generation, session, transaction and insert identifiers.
//!
//! Transaction ids are handed out by a [`TxnIdAllocator`] that every manager in
//! the process shares, so two connections never observe the same id. Insert ids
//! are local to one manager.

use std::sync::{Arc, Mutex};

use crate::core::lock;
use crate::error::{ExecError, Result};

/// Source of process-wide transaction ids.
///
/// Not persisted: ids are unique within one process lifetime. Uniqueness
/// across restarts comes from the generation id.
#[derive(Debug, Default)]
pub struct TxnIdAllocator {
    current: Mutex<i64>,
}

impl TxnIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_txn_id(&self) -> i64 {
        let mut current = lock(&self.current);
        *current += 1;
        *current
    }
}

/// The durable backend that owns generation and session ids.
pub trait GenerationStore: Send + Sync {
    fn current_generation(&self) -> Result<Option<i64>>;
    fn next_generation(&self) -> Result<i64>;
    fn new_session(&self, generation_id: i64) -> Result<i64>;
}

/// A [`GenerationStore`] that lives in memory.
#[derive(Debug, Default)]
pub struct InMemoryGenerationStore {
    state: Mutex<StoreState>,
}

#[derive(Debug, Default)]
struct StoreState {
    generation: Option<i64>,
    sessions: i64,
}

impl InMemoryGenerationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_generation(generation_id: i64) -> Self {
        Self {
            state: Mutex::new(StoreState {
                generation: Some(generation_id),
                sessions: 0,
            }),
        }
    }
}

impl GenerationStore for InMemoryGenerationStore {
    fn current_generation(&self) -> Result<Option<i64>> {
        Ok(lock(&self.state).generation)
    }

    fn next_generation(&self) -> Result<i64> {
        let mut state = lock(&self.state);
        let next = state.generation.unwrap_or(0) + 1;
        state.generation = Some(next);
        state.sessions = 0;
        Ok(next)
    }

    fn new_session(&self, generation_id: i64) -> Result<i64> {
        let mut state = lock(&self.state);
        if state.generation != Some(generation_id) {
            return Err(ExecError::Backend(format!(
                "generation {generation_id} is not current"
            )));
        }
        state.sessions += 1;
        Ok(state.sessions)
    }
}

/// Issues ids for one session.
#[derive(Debug)]
pub struct TxnCounterManager {
    txn_ids: Arc<TxnIdAllocator>,
    generation_id: i64,
    session_id: i64,
    insert_id: Mutex<i64>,
}

impl TxnCounterManager {
    pub fn new(txn_ids: Arc<TxnIdAllocator>, generation_id: i64, session_id: i64) -> Self {
        Self {
            txn_ids,
            generation_id,
            session_id,
            insert_id: Mutex::new(0),
        }
    }

    /// Picks up the current generation (or starts the next one) and opens a
    /// session in it. Backend failures abort construction.
    pub fn from_store(store: &dyn GenerationStore, txn_ids: Arc<TxnIdAllocator>) -> Result<Self> {
        let generation_id = match store.current_generation()? {
            Some(generation_id) => generation_id,
            None => store.next_generation()?,
        };
        let session_id = store.new_session(generation_id)?;
        log::debug!("txn counters: generation = {generation_id}, session = {session_id}");
        Ok(Self::new(txn_ids, generation_id, session_id))
    }

    /// A manager for a new statement in the same session: same generation,
    /// session and transaction id source, fresh insert ids.
    pub fn for_statement(&self) -> Self {
        Self::new(self.txn_ids.clone(), self.generation_id, self.session_id)
    }

    pub fn generation_id(&self) -> i64 {
        self.generation_id
    }

    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    pub fn next_txn_id(&self) -> i64 {
        self.txn_ids.next_txn_id()
    }

    pub fn next_insert_id(&self) -> i64 {
        let mut insert_id = lock(&self.insert_id);
        *insert_id += 1;
        *insert_id
    }
}

/// The identifiers stamped on everything one statement writes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TxnControlCounters {
    pub generation_id: i64,
    pub session_id: i64,
    pub txn_id: i64,
    pub insert_id: i64,
    pub discovery_generation_id: i64,
}

impl TxnControlCounters {
    pub fn new(mgr: &TxnCounterManager) -> Self {
        Self {
            generation_id: mgr.generation_id(),
            session_id: mgr.session_id(),
            txn_id: mgr.next_txn_id(),
            insert_id: mgr.next_insert_id(),
            discovery_generation_id: 0,
        }
    }

    pub fn set_txn_id(&mut self, txn_id: i64) {
        self.txn_id = txn_id;
    }

    pub fn clone_with_discovery_generation_id(&self, discovery_generation_id: i64) -> Self {
        Self {
            discovery_generation_id,
            ..*self
        }
    }

    pub fn clone_and_increment_insert_id(&self) -> Self {
        Self {
            insert_id: self.insert_id + 1,
            ..*self
        }
    }
}
