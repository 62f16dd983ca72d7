pub mod fake;
pub mod fixtures;

pub use fake::{Behavior, FakeRuntime, Reply};
pub use fixtures::*;
