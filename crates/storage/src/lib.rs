#![forbid(unsafe_code)]

pub mod dir;
mod entry;
mod store;
mod sweeper;
pub mod wal;

pub use dir::DataDir;
pub use entry::{Entry, Value};
pub use store::{Mutation, Outcome, Store, SweepStats, TtlState};
pub use sweeper::{SweeperConfig, spawn_sweeper};
pub use wal::{DurabilityMode, LogJob, LogWriter, ReplayStats, create_log, replay, wall_now_ms};
