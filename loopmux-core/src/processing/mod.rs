pub mod convert;
pub mod gain;
pub mod level_meter;
pub mod multiplexer;
pub mod sample_queue;
pub mod wav_format;
