use crate::collection::Document;
use crate::errors::MagoResult;
use std::any::Any;
use std::fmt::Display;
use std::ops::Deref;
use std::sync::Arc;

use super::AllFilter;

/// A predicate over stored documents.
///
/// The recovery scanner selects transaction records by a field value; tests
/// use the same filters to inspect collections.
pub trait FilterProvider: Any + Send + Sync + Display {
    /// Returns `true` if `entry` satisfies this filter.
    fn apply(&self, entry: &Document) -> MagoResult<bool>;
}

/// A cloneable, type-erased filter.
///
/// # Examples
///
/// ```rust,ignore
/// use mago::filter::{all, field};
///
/// let pending = field("state").eq("pending");
/// let unfinished = field("state").ne("finished");
/// ```
#[derive(Clone)]
pub struct Filter {
    inner: Arc<dyn FilterProvider>,
}

impl Filter {
    pub fn new<T: FilterProvider + 'static>(inner: T) -> Self {
        Filter { inner: Arc::new(inner) }
    }
}

impl Display for Filter {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl Deref for Filter {
    type Target = Arc<dyn FilterProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Matches every document.
pub fn all() -> Filter {
    Filter::new(AllFilter {})
}
