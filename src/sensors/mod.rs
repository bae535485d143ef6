pub mod service;

pub use service::{is_fresh, AggregateReading, SensorService};
