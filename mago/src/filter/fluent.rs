use super::{EqualsFilter, Filter, NotEqualsFilter};
use crate::common::Value;

/// Starts a filter on the named field.
///
/// # Examples
///
/// ```rust,ignore
/// let filter = field("state").eq("pending");
/// ```
pub fn field(field_name: &str) -> FluentFilter {
    FluentFilter {
        field_name: field_name.to_string(),
    }
}

/// A fluent builder for filters on a single field.
pub struct FluentFilter {
    field_name: String,
}

impl FluentFilter {
    /// Matches documents where the field equals `value`.
    pub fn eq<T: Into<Value>>(self, value: T) -> Filter {
        Filter::new(EqualsFilter::new(self.field_name, value.into()))
    }

    /// Matches documents where the field is absent or differs from `value`.
    pub fn ne<T: Into<Value>>(self, value: T) -> Filter {
        Filter::new(NotEqualsFilter::new(self.field_name, value.into()))
    }
}
