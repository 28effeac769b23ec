pub mod demux;
pub mod processor;

pub use processor::{AudioProcessor, DecoderCommand, ElementaryDecoder};
