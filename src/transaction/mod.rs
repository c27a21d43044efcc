//! Units of work and the actions deferred until they commit.

pub mod pending;
pub mod unit_of_work;

pub use pending::{PendingAction, PendingActions};
pub use unit_of_work::{TransactionListener, TransactionStatus, UnitOfWork};
