pub mod config;
pub mod error;
pub mod protocol;
pub mod state;
pub mod task;
pub mod types;

pub use error::CoreError;

/// Seconds since the unix epoch, as used in profile and state records.
pub fn timestamp() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
