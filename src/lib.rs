//! segue: follows a live musical performance through a reference score and
//! signals page turns, with automatic recovery when tracking diverges.

pub mod audio;
pub mod chroma;
pub mod cli;
pub mod config;
pub mod recovery;
pub mod score;
pub mod session;
pub mod tracker;
