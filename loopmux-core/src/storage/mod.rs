pub mod metadata;
pub mod sink_writer;
