pub mod status;
pub mod webhook;

pub use status::*;
pub use webhook::*;
