//! Row filters built from unique-key values.

use crate::value::Value;
use std::fmt;

/// A conjunction of `column = value` conditions.
pub type Clause = Vec<(String, Value)>;

/// A disjunction of clauses: a row matches when every condition of at least
/// one clause holds.
///
/// Conditions are expressed on storage columns, never on field names.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    /// An empty filter (matches nothing).
    pub fn new() -> Self {
        Self::default()
    }

    /// A filter with a single clause.
    pub fn from_clause(clause: Clause) -> Self {
        Self {
            clauses: vec![clause],
        }
    }

    /// A single `column = value` condition.
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::from_clause(vec![(column.into(), value.into())])
    }

    /// Add an alternative clause.
    pub fn push(&mut self, clause: Clause) {
        if !clause.is_empty() {
            self.clauses.push(clause);
        }
    }

    /// The clauses of this filter.
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Check if the filter has no clauses.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Number of clauses.
    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    /// Evaluate the filter against a row accessor.
    pub fn matches<'a>(&self, lookup: impl Fn(&str) -> Option<&'a Value>) -> bool {
        self.clauses.iter().any(|clause| {
            clause
                .iter()
                .all(|(column, expected)| lookup(column).is_some_and(|v| v.same_as(expected)))
        })
    }
}

impl FromIterator<Clause> for Filter {
    fn from_iter<I: IntoIterator<Item = Clause>>(iter: I) -> Self {
        let mut filter = Filter::new();
        for clause in iter {
            filter.push(clause);
        }
        filter
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                write!(f, " OR ")?;
            }
            if self.clauses.len() > 1 {
                write!(f, "(")?;
            }
            for (j, (column, value)) in clause.iter().enumerate() {
                if j > 0 {
                    write!(f, " AND ")?;
                }
                write!(f, "{} = {}", column, value)?;
            }
            if self.clauses.len() > 1 {
                write!(f, ")")?;
            }
        }
        Ok(())
    }
}
