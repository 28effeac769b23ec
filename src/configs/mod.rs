pub mod base;
pub mod gaana;
pub mod logging;

pub use base::*;
pub use gaana::*;
pub use logging::*;
