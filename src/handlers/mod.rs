pub mod music;
pub mod upload;

pub use music::*;
pub use upload::*;
