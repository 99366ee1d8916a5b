//! Index descriptors.

use std::fmt;

/// Sort direction for index columns and result ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    /// SQL keyword for this direction.
    pub fn sql(self) -> &'static str {
        match self {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        }
    }

    /// Numeric form used by document stores (`1` / `-1`).
    pub fn as_i32(self) -> i32 {
        match self {
            SortDirection::Ascending => 1,
            SortDirection::Descending => -1,
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql())
    }
}

/// A declared index on one model.
///
/// Consumed only by the synchronizer. Indexes are matched against the live
/// schema by name within their table, so the name is resolved when the
/// descriptor is attached to a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    /// Logical column names with their direction, in index order.
    pub columns: Vec<(String, SortDirection)>,
    /// Index name; defaults to `<table>_<col>_<col>`.
    pub name: Option<String>,
    pub unique: bool,
    /// When false, document stores build the index as sparse.
    pub required: bool,
}

impl IndexDescriptor {
    /// Creates an index over the given columns.
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = (S, SortDirection)>) -> Self {
        Self {
            columns: columns
                .into_iter()
                .map(|(column, direction)| (column.into(), direction))
                .collect(),
            name: None,
            unique: false,
            required: false,
        }
    }

    /// Creates an ascending single-column index.
    pub fn on(column: impl Into<String>) -> Self {
        Self::new([(column.into(), SortDirection::Ascending)])
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns the index name, falling back to the default for `table`.
    pub fn resolved_name(&self, table: &str) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => {
                let columns: Vec<String> = self
                    .columns
                    .iter()
                    .map(|(column, _)| column.replace('.', "_"))
                    .collect();
                format!("{}_{}", table, columns.join("_"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_index_name() {
        let index = IndexDescriptor::new([
            ("name", SortDirection::Ascending),
            ("address.city", SortDirection::Descending),
        ]);
        assert_eq!(index.resolved_name("users"), "users_name_address_city");
        assert_eq!(index.named("by_name").resolved_name("users"), "by_name");
    }

    #[test]
    fn test_direction_forms() {
        assert_eq!(SortDirection::Descending.sql(), "DESC");
        assert_eq!(SortDirection::Descending.as_i32(), -1);
        assert_eq!(SortDirection::default(), SortDirection::Ascending);
    }
}
