use crate::diff::DiffMode;
use crate::table::{POST, Table, WHERE_COL};

/// Post-side diff rows in which any keyword occurs, ignoring case, in any
/// cell. With `DiffMode::All` the result is re-sorted by `sort_columns`.
pub fn find_major(diff: &Table, keywords: &[String], mode: DiffMode, sort_columns: &[String]) -> Table {
    let mut out = Table::new(diff.columns.clone());
    let Some(where_idx) = diff.column_index(WHERE_COL) else { return out };
    let needles: Vec<String> = keywords.iter().map(|k| k.trim().to_lowercase()).filter(|k| !k.is_empty()).collect();
    for row in diff.rows.iter().filter(|r| r[where_idx] == POST) {
        let lowered: Vec<String> = row.iter().map(|c| c.to_lowercase()).collect();
        if !needles.iter().any(|n| lowered.iter().any(|c| c.contains(n.as_str()))) { continue; }
        if out.rows.contains(row) { continue; }
        out.push(row.clone());
    }
    if !out.is_empty() { log::debug!("{} major rows", out.len()); }
    match mode {
        DiffMode::All => out.sorted_by(sort_columns),
        DiffMode::Diff => out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(v: &[&str]) -> Vec<String> { v.iter().map(|s| s.to_string()).collect() }

    fn diff() -> Table {
        let mut t = Table::new(cols(&["NAME", "PORT", "OPER", "Where"]));
        t.push(cols(&["R2", "2/1/1", "Down", "Post"]));
        t.push(cols(&["R1", "1/1/1", "Down", "Pre"]));
        t.push(cols(&["R1", "1/1/2", "DWN", "Post"]));
        t.push(cols(&["R1", "1/1/3", "Up", "Post"]));
        t
    }

    #[test]
    fn only_post_rows_with_keywords() {
        let m = find_major(&diff(), &cols(&["down", "dwn"]), DiffMode::Diff, &[]);
        assert_eq!(m.rows, vec![cols(&["R2", "2/1/1", "Down", "Post"]), cols(&["R1", "1/1/2", "DWN", "Post"])]);
    }

    #[test]
    fn rows_appear_once_and_sort_in_all_mode() {
        let m = find_major(&diff(), &cols(&["down", "dwn", "1/1"]), DiffMode::All, &cols(&["NAME", "PORT", "OPER"]));
        assert_eq!(m.rows, vec![
            cols(&["R1", "1/1/2", "DWN", "Post"]),
            cols(&["R1", "1/1/3", "Up", "Post"]),
            cols(&["R2", "2/1/1", "Down", "Post"]),
        ]);
    }

    #[test]
    fn no_match_is_empty() {
        let m = find_major(&diff(), &cols(&["flap"]), DiffMode::Diff, &[]);
        assert!(m.is_empty());
        assert_eq!(m.columns, diff().columns);
        assert!(find_major(&Table::new(cols(&["NAME"])), &cols(&["down"]), DiffMode::All, &[]).is_empty());
    }
}
