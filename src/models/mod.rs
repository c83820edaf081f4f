pub mod catalog;
pub mod enums;
pub mod lab;

pub use catalog::*;
pub use enums::*;
pub use lab::*;
