mod core;
mod recovery;
#[allow(clippy::module_inception)]
mod transaction;

pub use core::LifecycleState;
pub use recovery::*;
pub use transaction::*;
