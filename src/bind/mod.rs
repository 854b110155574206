//! Contract binding runtime: calls, transactions and event streams over
//! pluggable transport capabilities.

pub mod abi;
pub mod backend;
pub mod contract;
pub mod event;
pub mod iterator;
pub mod opts;
pub mod stream;
pub mod topics;
pub mod watch;

#[cfg(test)]
pub(crate) mod mock;

pub use abi::{CallOutput, InterfaceTable};
pub use backend::{ContractCaller, ContractFilterer, ContractTransactor, LogQuery, LogWatch};
pub use contract::{BoundContract, Session};
pub use event::{DynEvent, TypedEvent};
pub use iterator::{EventIterator, IterState};
pub use opts::{CallOpts, FilterOpts, TransactOpts, WatchOpts};
pub use stream::{LogStream, Subscription};
pub use topics::LogFilterSpec;
pub use watch::EventSubscription;
