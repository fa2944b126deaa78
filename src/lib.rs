pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod peer;
pub mod piece;
pub mod scheduler;
pub mod torrent;

pub use config::SchedulerConfig;
pub use error::{Result, SwarmError};
pub use scheduler::{AssignmentStatus, SwarmScheduler};
