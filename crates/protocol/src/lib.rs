pub mod cast;
pub mod config;
pub mod frame;
pub mod signaling;

pub use cast::*;
pub use config::*;
pub use frame::*;
pub use signaling::*;
