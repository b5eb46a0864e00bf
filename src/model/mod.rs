pub mod common;
pub mod context;
pub mod lead;
pub mod operation;
pub mod staging;
pub mod submission;
pub mod tree;
pub mod variable;

pub use common::*;
pub use context::*;
pub use lead::*;
pub use operation::*;
pub use staging::*;
pub use submission::*;
pub use tree::*;
pub use variable::*;
