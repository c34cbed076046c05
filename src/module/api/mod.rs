//! Shared collaborators handed to modules through the
//! [`ModuleContext`](crate::module::context::ModuleContext)

pub mod events;
pub mod players;
pub mod store;

pub use events::{Event, EventBus};
pub use players::{PlayerRegistry, PlayerSession};
pub use store::SharedStore;
