use anyhow::{Result, bail};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::table::{NAME_COL, POST, PRE, Table, WHERE_COL, union_columns};

/// Which diff the run produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffMode {
    /// Every changed row with all its columns.
    All,
    /// Changed rows collapsed to the columns that changed per router.
    Diff,
}

impl std::fmt::Display for DiffMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self { DiffMode::All => "all", DiffMode::Diff => "diff" })
    }
}

/// Distinct rows present on only one side, tagged with a trailing `Where`
/// column. Columns are the pre columns followed by post-only columns.
fn tagged_exclusive(pre: &Table, post: &Table) -> Table {
    let columns = union_columns(&pre.columns, &post.columns);
    let pre = pre.select(&columns);
    let post = post.select(&columns);
    let in_pre: HashSet<&Vec<String>> = pre.rows.iter().collect();
    let in_post: HashSet<&Vec<String>> = post.rows.iter().collect();

    let mut out_cols = columns.clone();
    out_cols.push(WHERE_COL.to_string());
    let mut out = Table::new(out_cols);
    let mut seen: HashSet<&Vec<String>> = HashSet::new();
    for (rows, other, tag) in [(&pre.rows, &in_post, PRE), (&post.rows, &in_pre, POST)] {
        for row in rows {
            if other.contains(row) || !seen.insert(row) { continue; }
            let mut r = row.clone();
            r.push(tag.to_string());
            out.push(r);
        }
    }
    out
}

/// Rows that differ between the sides, sorted by every data column.
pub fn full_diff(pre: &Table, post: &Table) -> Table {
    let tagged = tagged_exclusive(pre, post);
    let keys = tagged.columns.clone();
    tagged.sorted_by(&keys)
}

/// Changed rows reduced to the columns that actually vary within each
/// router's rows. `NAME`, `Where` and `display` columns are always kept.
pub fn only_diff(pre: &Table, post: &Table, display: &[String]) -> Result<Table> {
    let tagged = tagged_exclusive(pre, post);
    let Some(name_idx) = tagged.column_index(NAME_COL) else {
        bail!("the changed-columns diff needs router identity by {}", NAME_COL);
    };
    let ncols = tagged.columns.len();

    let mut routers: Vec<&str> = Vec::new();
    for row in &tagged.rows {
        if !routers.contains(&row[name_idx].as_str()) { routers.push(&row[name_idx]); }
    }

    let always: Vec<usize> = std::iter::once(NAME_COL)
        .chain(display.iter().map(String::as_str))
        .chain(std::iter::once(WHERE_COL))
        .filter_map(|c| tagged.column_index(c))
        .collect();

    // (row, kept mask) per tagged row, grouped by router.
    let mut kept_rows: Vec<(&Vec<String>, Vec<bool>)> = Vec::new();
    let mut any_kept = vec![false; ncols];
    for router in &routers {
        let rows: Vec<&Vec<String>> = tagged.rows.iter().filter(|r| r[name_idx] == *router).collect();
        let mask: Vec<bool> = (0..ncols)
            .map(|c| rows.len() == 1 || always.contains(&c) || rows.iter().any(|r| r[c] != rows[0][c]))
            .collect();
        for (c, k) in mask.iter().enumerate() { any_kept[c] |= *k; }
        kept_rows.extend(rows.into_iter().map(|r| (r, mask.clone())));
    }

    let mut final_idx: Vec<usize> = Vec::new();
    for c in std::iter::once(NAME_COL).chain(display.iter().map(String::as_str)) {
        if let Some(i) = tagged.column_index(c) && !final_idx.contains(&i) { final_idx.push(i); }
    }
    let where_idx = ncols - 1;
    for (i, kept) in any_kept.iter().enumerate() {
        if *kept && i != where_idx && !final_idx.contains(&i) { final_idx.push(i); }
    }
    final_idx.push(where_idx);

    let columns: Vec<String> = final_idx.iter().map(|&i| tagged.columns[i].clone()).collect();
    let mut out = Table::new(columns.clone());
    for (row, mask) in kept_rows {
        out.push(final_idx.iter().map(|&i| if mask[i] { row[i].clone() } else { String::new() }).collect());
    }
    Ok(out.sorted_by(&columns))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(v: &[&str]) -> Vec<String> { v.iter().map(|s| s.to_string()).collect() }

    fn table(columns: &[&str], rows: &[&[&str]]) -> Table {
        let mut t = Table::new(cols(columns));
        for r in rows { t.push(cols(r)); }
        t
    }

    #[test]
    fn full_diff_keeps_exclusive_rows_only() {
        let pre = table(&["NAME", "X"], &[&["R1", "A"], &["R1", "B"], &["R1", "A"]]);
        let post = table(&["NAME", "X"], &[&["R1", "C"], &["R1", "B"]]);
        let d = full_diff(&pre, &post);
        assert_eq!(d.columns, cols(&["NAME", "X", "Where"]));
        assert_eq!(d.rows, vec![cols(&["R1", "A", "Pre"]), cols(&["R1", "C", "Post"])]);
    }

    #[test]
    fn identical_sides_and_empty_sides() {
        let t = table(&["NAME", "X"], &[&["R1", "A"]]);
        assert!(full_diff(&t, &t).is_empty());
        let empty = Table::new(cols(&["NAME", "X"]));
        let d = full_diff(&empty, &t);
        assert_eq!(d.rows, vec![cols(&["R1", "A", "Post"])]);
    }

    #[test]
    fn mismatched_columns_are_unioned() {
        let pre = table(&["NAME", "X"], &[&["R1", "A"]]);
        let post = table(&["NAME", "Y"], &[&["R1", "B"]]);
        let d = full_diff(&pre, &post);
        assert_eq!(d.columns, cols(&["NAME", "X", "Y", "Where"]));
        assert_eq!(d.rows, vec![cols(&["R1", "", "B", "Post"]), cols(&["R1", "A", "", "Pre"])]);
    }

    #[test]
    fn only_diff_collapses_unchanged_columns() {
        let columns = ["NAME", "PORT", "OPER", "DESC"];
        let pre = table(&columns, &[&["R1", "1/1/1", "Up", "uplink"], &["R2", "2/1/1", "Up", "core"]]);
        let post = table(&columns, &[&["R1", "1/1/1", "Down", "uplink"], &["R2", "2/1/1", "Up", "core"], &["R3", "3/1/1", "Up", "new"]]);
        let d = only_diff(&pre, &post, &cols(&["PORT"])).unwrap();
        assert_eq!(d.columns, cols(&["NAME", "PORT", "OPER", "DESC", "Where"]));
        assert_eq!(d.rows, vec![
            cols(&["R1", "1/1/1", "Down", "", "Post"]),
            cols(&["R1", "1/1/1", "Up", "", "Pre"]),
            cols(&["R3", "3/1/1", "Up", "new", "Post"]),
        ]);
    }

    #[test]
    fn only_diff_drops_columns_nobody_changed() {
        let columns = ["NAME", "PORT", "OPER"];
        let pre = table(&columns, &[&["R1", "1/1/1", "Up"]]);
        let post = table(&columns, &[&["R1", "1/1/1", "Down"]]);
        let d = only_diff(&pre, &post, &[]).unwrap();
        assert_eq!(d.columns, cols(&["NAME", "OPER", "Where"]));
        assert_eq!(d.rows, vec![cols(&["R1", "Down", "Post"]), cols(&["R1", "Up", "Pre"])]);
    }

    #[test]
    fn only_diff_requires_name_identity() {
        let t = table(&["IP", "X"], &[&["10.0.0.1", "A"]]);
        assert!(only_diff(&t, &Table::new(cols(&["IP", "X"])), &[]).is_err());
    }

    #[test]
    fn diffs_are_deterministic() {
        let pre = table(&["NAME", "X", "Y"], &[&["R2", "b", "1"], &["R1", "a", "1"], &["R1", "c", "2"]]);
        let post = table(&["NAME", "X", "Y"], &[&["R1", "a", "3"], &["R2", "b", "2"]]);
        assert_eq!(full_diff(&pre, &post), full_diff(&pre, &post));
        assert_eq!(only_diff(&pre, &post, &[]).unwrap(), only_diff(&pre, &post, &[]).unwrap());
    }
}
