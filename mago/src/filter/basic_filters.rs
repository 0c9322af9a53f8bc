use crate::collection::Document;
use crate::common::Value;
use crate::errors::MagoResult;
use crate::filter::FilterProvider;
use std::fmt::Display;

pub(crate) struct AllFilter;

impl Display for AllFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AllFilter")
    }
}

impl FilterProvider for AllFilter {
    fn apply(&self, _entry: &Document) -> MagoResult<bool> {
        Ok(true)
    }
}

/// Matches documents whose field equals a value. An absent field never matches.
pub(crate) struct EqualsFilter {
    field_name: String,
    field_value: Value,
}

impl EqualsFilter {
    #[inline]
    pub(crate) fn new(field_name: String, field_value: Value) -> Self {
        EqualsFilter {
            field_name,
            field_value,
        }
    }
}

impl Display for EqualsFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} == {})", self.field_name, self.field_value)
    }
}

impl FilterProvider for EqualsFilter {
    fn apply(&self, entry: &Document) -> MagoResult<bool> {
        Ok(entry.get(&self.field_name) == Some(&self.field_value))
    }
}

/// Matches documents whose field differs from a value, including documents without the field.
pub(crate) struct NotEqualsFilter {
    field_name: String,
    field_value: Value,
}

impl NotEqualsFilter {
    #[inline]
    pub(crate) fn new(field_name: String, field_value: Value) -> Self {
        NotEqualsFilter {
            field_name,
            field_value,
        }
    }
}

impl Display for NotEqualsFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} != {})", self.field_name, self.field_value)
    }
}

impl FilterProvider for NotEqualsFilter {
    fn apply(&self, entry: &Document) -> MagoResult<bool> {
        Ok(entry.get(&self.field_name) != Some(&self.field_value))
    }
}
