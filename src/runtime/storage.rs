//! The persistence seam. The indexer never talks to a database itself; it
//! asks the store where to resume and brackets every unit of work with
//! `begin_transaction` / `end_transaction`.

use anyhow::{bail, Result};
use futures::future::BoxFuture;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// What a transaction covers, so the store can persist its cursor
/// atomically with the commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxScope {
    /// The genesis import; on commit the next height is `initial_height`.
    Genesis { initial_height: u64 },
    /// One chain height; on commit the next height is `height + 1`.
    Height(u64),
}

impl TxScope {
    pub fn next_height_after_commit(&self) -> u64 {
        match self {
            TxScope::Genesis { initial_height } => *initial_height,
            TxScope::Height(height) => height.saturating_add(1),
        }
    }
}

pub trait IndexerStore: Send + Sync + 'static {
    /// The next height to process, or `None` for a store that has never
    /// committed anything.
    fn next_height(&self) -> BoxFuture<'_, Result<Option<u64>>>;

    fn begin_transaction(&self, scope: TxScope) -> BoxFuture<'_, Result<()>>;

    /// Commits when `committed` is true, rolls back otherwise.
    fn end_transaction(&self, committed: bool) -> BoxFuture<'_, Result<()>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreCall {
    NextHeight,
    Begin(TxScope),
    End { scope: TxScope, committed: bool },
}

#[derive(Debug, Default)]
struct MemoryState {
    cursor: Option<u64>,
    open: Option<TxScope>,
    journal: Vec<StoreCall>,
}

/// In-memory store that keeps a cursor and journals every call.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already committed everything below `height`.
    pub fn with_next_height(height: u64) -> Self {
        let store = Self::default();
        store.lock().cursor = Some(height);
        store
    }

    pub fn cursor(&self) -> Option<u64> {
        self.lock().cursor
    }

    pub fn journal(&self) -> Vec<StoreCall> {
        self.lock().journal.clone()
    }

    /// Heights whose transaction committed, in commit order.
    pub fn committed_heights(&self) -> Vec<u64> {
        self.ended_heights(true)
    }

    /// Heights whose transaction rolled back, in order.
    pub fn rolled_back_heights(&self) -> Vec<u64> {
        self.ended_heights(false)
    }

    pub fn genesis_commits(&self) -> usize {
        self.lock()
            .journal
            .iter()
            .filter(|call| {
                matches!(
                    call,
                    StoreCall::End {
                        scope: TxScope::Genesis { .. },
                        committed: true
                    }
                )
            })
            .count()
    }

    fn ended_heights(&self, wanted: bool) -> Vec<u64> {
        self.lock()
            .journal
            .iter()
            .filter_map(|call| match call {
                StoreCall::End {
                    scope: TxScope::Height(height),
                    committed,
                } if *committed == wanted => Some(*height),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl IndexerStore for MemoryStore {
    fn next_height(&self) -> BoxFuture<'_, Result<Option<u64>>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.journal.push(StoreCall::NextHeight);
            Ok(state.cursor)
        })
    }

    fn begin_transaction(&self, scope: TxScope) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.lock();
            if let Some(open) = state.open {
                bail!("cannot begin {scope:?}: {open:?} is still open");
            }
            state.open = Some(scope);
            state.journal.push(StoreCall::Begin(scope));
            Ok(())
        })
    }

    fn end_transaction(&self, committed: bool) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.lock();
            let Some(scope) = state.open.take() else {
                bail!("no open transaction to end");
            };
            if committed {
                state.cursor = Some(scope.next_height_after_commit());
            }
            state.journal.push(StoreCall::End { scope, committed });
            Ok(())
        })
    }
}
