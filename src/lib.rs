pub mod api;
pub mod cache;
pub mod config;
pub mod flush;
pub mod metrics;
pub mod readiness;
pub mod sensebox;
pub mod sensors;
pub mod storage;
pub mod temperature;

#[cfg(test)]
mod testing;
