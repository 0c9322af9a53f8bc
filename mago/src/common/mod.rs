//! Common types shared by the store, session and transaction layers.

mod constants;
mod time;
mod value;

pub use constants::*;
pub use time::*;
pub use value::*;
