//! Filtering and sorting of the task and freelancer catalogs.
//!
//! Both catalogs are pure functions of `(records, filters)`: predicates are
//! combined with AND across dimensions and OR within a multi-select
//! dimension, sorting runs after filtering and is stable, and the input
//! slice is never modified. A record missing the field a filter looks at
//! simply does not match that filter.

pub mod freelancers;
pub mod tasks;

use std::collections::HashSet;

use thiserror::Error;

pub use freelancers::{filter_freelancers, FreelancerFilters, FreelancerListQuery};
pub use tasks::{filter_tasks, TaskFilters, TaskListQuery};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("unknown {dimension} '{value}'")]
    UnknownValue {
        dimension: &'static str,
        value: String,
    },
    #[error("invalid {dimension} '{value}'")]
    InvalidNumber {
        dimension: &'static str,
        value: String,
    },
}

/// Half-open numeric interval `[min, max)`; either side may be unbounded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Interval {
    pub const UNBOUNDED: Interval = Interval {
        min: None,
        max: None,
    };

    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value < max)
    }
}

/// Lower-cased, trimmed search term. Blank terms are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchTerm(Option<String>);

impl SearchTerm {
    pub fn new(raw: Option<&str>) -> Self {
        Self(
            raw.map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty()),
        )
    }

    pub fn is_active(&self) -> bool {
        self.0.is_some()
    }

    pub fn matches_any<'a>(&self, fields: impl IntoIterator<Item = &'a str>) -> bool {
        match &self.0 {
            None => true,
            Some(needle) => fields
                .into_iter()
                .any(|field| field.to_lowercase().contains(needle.as_str())),
        }
    }
}

/// Case-insensitive multi-select. Empty selection means "all".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection(HashSet<String>);

impl Selection {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            values
                .into_iter()
                .map(|v| v.as_ref().trim().to_lowercase())
                .filter(|v| !v.is_empty())
                .collect(),
        )
    }

    pub fn is_active(&self) -> bool {
        !self.0.is_empty()
    }

    pub fn intersects<'a>(&self, values: impl IntoIterator<Item = &'a str>) -> bool {
        !self.is_active()
            || values
                .into_iter()
                .any(|v| self.0.contains(&v.trim().to_lowercase()))
    }
}

/// Splits a comma separated query value, dropping empty items.
pub(crate) fn split_list(raw: Option<&str>) -> Vec<&str> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

/// Parses every item of a comma separated list, failing on the first unknown one.
pub(crate) fn parse_set<T>(
    raw: Option<&str>,
    dimension: &'static str,
) -> Result<HashSet<T>, FilterError>
where
    T: std::str::FromStr + std::hash::Hash + Eq,
{
    split_list(raw)
        .into_iter()
        .map(|v| {
            v.parse().map_err(|_| FilterError::UnknownValue {
                dimension,
                value: v.to_string(),
            })
        })
        .collect()
}

/// `"all"` and blank values both mean "no filter".
pub(crate) fn is_all(raw: Option<&str>) -> bool {
    raw.map(str::trim)
        .map_or(true, |v| v.is_empty() || v.eq_ignore_ascii_case("all"))
}
