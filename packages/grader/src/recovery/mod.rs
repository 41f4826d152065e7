//! Recovery for submissions that never got a timely result.

pub mod sweeper;

pub use sweeper::{Recovered, RecoveryAction, RecoverySweeper};
