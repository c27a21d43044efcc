//! Asynchronous action queues and their equivalence filters.

pub mod async_queue;
pub mod filter;

pub use async_queue::{
    ActionRunner, AsyncActionQueue, AsyncExecutionListener, AsyncOutcome, OngoingAsyncAction,
    QueuedAction, SubmitOutcome,
};
pub use filter::{ActionFilter, FilterRegistry, FnFilter, SameTargetFilter};
