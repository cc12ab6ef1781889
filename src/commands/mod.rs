pub mod serve;
pub mod sign;

pub use serve::handle_serve;
pub use sign::handle_sign;
