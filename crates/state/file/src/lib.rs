mod store;

pub use store::FileBackend;
