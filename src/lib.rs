pub mod bind;
pub mod config;
pub mod error;
pub mod ethereum;

pub use bind::{
    BoundContract, CallOpts, CallOutput, EventIterator, FilterOpts, InterfaceTable, Session,
    TransactOpts, TypedEvent, WatchOpts,
};
pub use error::{BindError, TransportError};
