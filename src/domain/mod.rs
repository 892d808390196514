pub mod command;
pub mod report;
pub mod status;
pub mod strategy;

pub use command::*;
pub use report::*;
pub use status::*;
pub use strategy::*;
