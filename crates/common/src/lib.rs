#![forbid(unsafe_code)]

mod error;

pub use error::*;

pub const DEFAULT_BIND: &str = "127.0.0.1:6380";
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;
pub const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024; // 4 KB
pub const MAX_REQUEST_SIZE: usize = 1024 * 1024; // 1 MiB

pub const MAX_KEY_SIZE: usize = 512;
pub const MAX_VALUE_SIZE: usize = 64 * 1024; // 64 KiB
pub const MAX_LOG_RECORD_SIZE: usize = 64 * 1024 * 1024; // 64 MB

pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 100;
pub const SWEEP_SAMPLES: usize = 20;
pub const SWEEP_REPEAT_THRESHOLD: f64 = 0.25;

pub const DEFAULT_LOG_MAX_BYTES: u64 = 64 * 1024 * 1024; // 64 MB
pub const WRITE_TIMEOUT_SECS: u64 = 30;
