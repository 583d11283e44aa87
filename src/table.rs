use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const NAME_COL: &str = "NAME";
pub const IP_COL: &str = "IP";
pub const WHERE_COL: &str = "Where";
pub const PRE: &str = "Pre";
pub const POST: &str = "Post";

/// Which columns identify the router a row came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityMode { Name, Ip, Both }

impl IdentityMode {
    pub fn columns(self) -> Vec<String> {
        match self {
            IdentityMode::Name => vec![NAME_COL.to_string()],
            IdentityMode::Ip => vec![IP_COL.to_string()],
            IdentityMode::Both => vec![NAME_COL.to_string(), IP_COL.to_string()],
        }
    }

    pub fn values(self, name: &str, ip: &str) -> Vec<String> {
        match self {
            IdentityMode::Name => vec![name.to_string()],
            IdentityMode::Ip => vec![ip.to_string()],
            IdentityMode::Both => vec![name.to_string(), ip.to_string()],
        }
    }
}

impl std::fmt::Display for IdentityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self { IdentityMode::Name => "name", IdentityMode::Ip => "ip", IdentityMode::Both => "both" })
    }
}

/// Ordered column names plus rows of string cells. Every row has exactly
/// `columns.len()` cells.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self { Self { columns, rows: Vec::new() } }

    pub fn len(&self) -> usize { self.rows.len() }

    pub fn is_empty(&self) -> bool { self.rows.is_empty() }

    pub fn column_index(&self, name: &str) -> Option<usize> { self.columns.iter().position(|c| c == name) }

    /// Appends a row, padding short rows with empty cells and dropping extras.
    pub fn push(&mut self, mut row: Vec<String>) {
        row.resize(self.columns.len(), String::new());
        self.rows.push(row);
    }

    /// Projects onto `columns`; columns this table lacks come out empty.
    pub fn select(&self, columns: &[String]) -> Table {
        let idx: Vec<Option<usize>> = columns.iter().map(|c| self.column_index(c)).collect();
        let rows = self.rows.iter()
            .map(|r| idx.iter().map(|i| i.map(|i| r[i].clone()).unwrap_or_default()).collect())
            .collect();
        Table { columns: columns.to_vec(), rows }
    }

    /// Stable ascending sort by the given columns, compared lexicographically.
    /// Unknown column names are ignored.
    pub fn sorted_by(mut self, keys: &[String]) -> Table {
        let idx: Vec<usize> = keys.iter().filter_map(|k| self.column_index(k)).collect();
        self.rows.sort_by(|a, b| compare_on(a, b, &idx));
        self
    }
}

fn compare_on(a: &[String], b: &[String], idx: &[usize]) -> Ordering {
    for &i in idx {
        match a[i].cmp(&b[i]) { Ordering::Equal => continue, o => return o }
    }
    Ordering::Equal
}

/// Columns of `a` followed by the columns of `b` that `a` lacks.
pub fn union_columns(a: &[String], b: &[String]) -> Vec<String> {
    let mut out = a.to_vec();
    for c in b { if !out.contains(c) { out.push(c.clone()); } }
    out
}
