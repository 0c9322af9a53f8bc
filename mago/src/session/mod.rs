mod backup;
#[allow(clippy::module_inception)]
mod session;
mod state;

pub use backup::Snapshot;
pub use session::*;
pub use state::EntityState;
