//! Query options.

use crate::schema::SortDirection;

use super::{Condition, GroupSpec};

/// One ordering key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub direction: SortDirection,
}

impl OrderBy {
    /// Parses `"name -age"` into ascending `name`, descending `age`.
    pub fn parse_list(order: &str) -> Vec<OrderBy> {
        order
            .split_whitespace()
            .map(|token| match token.strip_prefix('-') {
                Some(column) => OrderBy {
                    column: column.to_string(),
                    direction: SortDirection::Descending,
                },
                None => OrderBy {
                    column: token.to_string(),
                    direction: SortDirection::Ascending,
                },
            })
            .collect()
    }
}

/// A find: condition plus projection, ordering, paging and grouping.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub condition: Condition,
    /// Columns to return; `None` returns every column. `id` is always returned.
    pub select: Option<Vec<String>>,
    pub order: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    /// When set, the query returns one record per group.
    pub group: Option<GroupSpec>,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            condition: Condition::all(),
            select: None,
            order: Vec::new(),
            limit: None,
            skip: None,
            group: None,
        }
    }
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// A query matching `condition`.
    pub fn filter(condition: Condition) -> Self {
        Self {
            condition,
            ..Self::default()
        }
    }

    /// Adds a condition, conjoined with any existing one.
    pub fn and(mut self, condition: Condition) -> Self {
        self.condition = if self.condition.is_empty() {
            condition
        } else {
            Condition::And(vec![self.condition, condition])
        };
        self
    }

    /// Restricts returned columns; accepts `"name age"`.
    pub fn select(mut self, columns: &str) -> Self {
        self.select = Some(columns.split_whitespace().map(str::to_string).collect());
        self
    }

    /// Appends ordering keys; accepts `"name -age"`.
    pub fn order(mut self, order: &str) -> Self {
        self.order.extend(OrderBy::parse_list(order));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn group(mut self, group: GroupSpec) -> Self {
        self.group = Some(group);
        self
    }
}
