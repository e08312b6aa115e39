//! Spawning and driving programs under test.

pub mod child;
pub mod command;
pub mod expect;

pub use child::{Child, Input, Step};
pub use command::CommandSpec;
pub use expect::Expected;
