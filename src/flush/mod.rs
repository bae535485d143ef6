pub mod service;

pub use service::FlushWorker;
