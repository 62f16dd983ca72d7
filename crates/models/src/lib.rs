pub mod config;
pub mod error;
pub mod function;
pub mod proxy;

pub use config::*;
pub use error::*;
pub use function::*;
pub use proxy::*;
