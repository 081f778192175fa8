//! Filtering, ordering, and pagination primitives for the [`Repository`](super::Repository) trait.

use std::fmt;

/// Sort direction for a `find_all`/`find_with_deleted` ordering clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Ascending,
    Descending,
}

impl OrderDirection {
    /// SQL `ORDER BY` clause fragment.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// Comparison operator for a [`FilterCondition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    In,
}

impl FilterOperator {
    /// SQL comparison operator fragment. `In` and `Like` need caller-side
    /// value formatting (`IN (...)`, `LIKE '%...%'`) since they aren't a
    /// plain binary operator.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Like => "LIKE",
            Self::In => "IN",
        }
    }
}

/// A typed filter value. Kept small and concrete rather than a generic `T`
/// so repository implementations can match on it without a type parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Int(i64),
    Bool(bool),
    Uuid(uuid::Uuid),
    TextList(Vec<String>),
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Uuid(u) => write!(f, "{u}"),
            Self::TextList(items) => write!(f, "{}", items.join(",")),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<uuid::Uuid> for FilterValue {
    fn from(value: uuid::Uuid) -> Self {
        Self::Uuid(value)
    }
}

/// A single `WHERE`-clause predicate: `field <op> value`.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCondition {
    pub field: String,
    pub operator: FilterOperator,
    pub value: FilterValue,
}

impl FilterCondition {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: impl Into<FilterValue>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::Ne, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::Gt, value)
    }

    pub fn gte(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::Gte, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::Lt, value)
    }

    pub fn lte(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::Lte, value)
    }

    pub fn like(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::Like, value)
    }
}

/// Offset-based pagination for a repository query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u64,
}

impl Pagination {
    #[must_use]
    pub fn new(limit: u32, offset: u64) -> Self {
        Self { limit, offset }
    }

    /// First page of `per_page` items (offset 0).
    #[must_use]
    pub fn first_page(per_page: u32) -> Self {
        Self::new(per_page, 0)
    }

    /// 1-indexed page of `per_page` items.
    #[must_use]
    pub fn page(page_number: u32, per_page: u32) -> Self {
        let page_number = page_number.max(1);
        Self::new(per_page, u64::from(page_number - 1) * u64::from(per_page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_direction_sql() {
        assert_eq!(OrderDirection::Ascending.as_sql(), "ASC");
        assert_eq!(OrderDirection::Descending.as_sql(), "DESC");
    }

    #[test]
    fn test_filter_condition_builders() {
        let f = FilterCondition::eq("status", "active");
        assert_eq!(f.field, "status");
        assert_eq!(f.operator, FilterOperator::Eq);
        assert_eq!(f.value, FilterValue::Text("active".to_string()));

        let f = FilterCondition::gte("age", 18_i64);
        assert_eq!(f.operator, FilterOperator::Gte);
        assert_eq!(f.value, FilterValue::Int(18));
    }

    #[test]
    fn test_pagination_first_page() {
        let p = Pagination::first_page(20);
        assert_eq!(p.limit, 20);
        assert_eq!(p.offset, 0);
    }

    #[test]
    fn test_pagination_page_number() {
        let p = Pagination::page(3, 20);
        assert_eq!(p.offset, 40);

        let p = Pagination::page(0, 20);
        assert_eq!(p.offset, 0);
    }
}
