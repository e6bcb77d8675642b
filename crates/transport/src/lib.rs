pub mod collect;
pub mod dispatcher;
pub mod error;
pub mod log;
pub mod registry;

pub use collect::HttpCollectDispatcher;
pub use dispatcher::{Dispatcher, DynDispatcher};
pub use error::TransportError;
pub use log::LogDispatcher;
pub use registry::DispatcherRegistry;
