//! In-memory storage implementations.
//!
//! Used by unit tests and by the `memory` storage type. Each write operation
//! holds one mutex for its whole unit of work and works on a copy of the
//! state, so a failed operation leaves nothing behind.

mod genealogy_store;
mod ledger_store;

pub use genealogy_store::MockGenealogyStore;
pub use ledger_store::MockLedgerStore;
