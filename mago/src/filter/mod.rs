mod basic_filters;
mod filter;
mod fluent;

pub(crate) use basic_filters::*;
pub use filter::*;
pub use fluent::*;
