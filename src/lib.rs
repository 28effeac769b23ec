pub mod audio;
pub mod common;
pub mod configs;
pub mod hls;
pub mod sources;
