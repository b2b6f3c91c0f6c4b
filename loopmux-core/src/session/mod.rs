pub mod recording;
pub mod scheduler;
