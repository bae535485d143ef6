pub mod service;

pub use service::{
    TemperatureResponse, TemperatureService, TemperatureStatus, CACHE_KEY_LATEST, CACHE_LOCK_KEY,
};
