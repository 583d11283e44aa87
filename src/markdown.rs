use crate::report::RunReport;
use crate::table::Table;
use chrono::Local;

/// Narrative report: run summary, then one section per template with its
/// banners and the changed and major-error rows.
pub fn render_markdown(rep: &RunReport) -> String {
    let mut s = String::new();
    s.push_str("# logcheck Report\n\n");
    s.push_str(&format!("Generated: {}\n\n", rep.generated.with_timezone(&Local).format("%Y-%m-%d %H:%M")));
    match rep.post_folder.as_ref() {
        Some(post) => s.push_str(&format!("Pre: `{}` → Post: `{}`\n\n", rep.pre_folder, post)),
        None => s.push_str(&format!("Logs: `{}` (single snapshot)\n\n", rep.pre_folder)),
    }
    s.push_str(&format!("Templates: `{}` · engine {} · router id {} · results {}\n\n", rep.template_folder, rep.engine, rep.identity, rep.diff_mode));

    s.push_str("## Summary\n");
    s.push_str(&format!("- Templates: {}\n", rep.templates.len()));
    for c in &rep.counts { s.push_str(&format!("- {}: {}\n", c.status, c.count)); }
    s.push('\n');

    s.push_str("## Index\n");
    for t in &rep.templates { s.push_str(&format!("- {} ({}) `{}`\n", t.display_name, t.status, t.command)); }
    s.push('\n');

    for t in &rep.templates {
        s.push_str(&format!("## {}\n\n", t.display_name));
        s.push_str(&format!("Template `{}` for command `{}`: **{}**\n\n", t.name, t.command, t.status));
        let Some(post) = t.post_table.as_ref() else {
            s.push_str(&format!("{} rows parsed ({}).\n\n", t.pre_table.len(), t.pre_status));
            continue;
        };
        s.push_str(&format!("Pre: {} rows ({}) · Post: {} rows ({})\n\n", t.pre_table.len(), t.pre_status, post.len(), t.post_status.map(|p| p.to_string()).unwrap_or_default()));
        let (changes, major) = t.banners();
        s.push_str(&format!("**{}**\n\n", changes));
        if !t.diff_table.is_empty() { push_table(&mut s, &t.diff_table); }
        s.push_str(&format!("**{}**\n\n", major));
        if !t.major_table.is_empty() { push_table(&mut s, &t.major_table); }
    }
    s
}

fn push_table(s: &mut String, t: &Table) {
    s.push_str(&format!("| {} |\n", t.columns.iter().map(|c| md_cell(c)).collect::<Vec<_>>().join(" | ")));
    s.push_str(&format!("|{}\n", "---|".repeat(t.columns.len())));
    for row in &t.rows {
        s.push_str(&format!("| {} |\n", row.iter().map(|c| md_cell(c)).collect::<Vec<_>>().join(" | ")));
    }
    s.push('\n');
}

fn md_cell(c: &str) -> String { c.replace('|', "\\|").replace('\n', " ") }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{DiffMode, full_diff};
    use crate::extract::Engine;
    use crate::report::{StatusCount, TemplateReport};
    use crate::status::{ParseStatus, ReportStatus};
    use crate::table::IdentityMode;

    fn tpl(name: &str, status: ReportStatus, pre: Table, post: Option<Table>) -> TemplateReport {
        let diff = post.as_ref().map(|p| full_diff(&pre, p)).unwrap_or_default();
        TemplateReport {
            name: format!("{}.template", name),
            display_name: name.to_string(),
            command: format!("show {}", name),
            status,
            pre_status: ParseStatus::Ok,
            post_status: post.as_ref().map(|_| ParseStatus::Ok),
            pre_table: pre,
            post_table: post,
            diff_table: diff,
            major_table: Table::default(),
        }
    }

    fn report(templates: Vec<TemplateReport>, post: bool) -> RunReport {
        RunReport {
            generated: chrono::Utc::now(),
            pre_folder: "pre/".to_string(),
            post_folder: if post { Some("post/".to_string()) } else { None },
            template_folder: "Templates/".to_string(),
            engine: Engine::Ttp,
            identity: IdentityMode::Name,
            diff_mode: DiffMode::All,
            counts: vec![StatusCount { status: ReportStatus::Ok, count: templates.len() }],
            templates,
        }
    }

    fn table(rows: &[[&str; 2]]) -> Table {
        let mut t = Table::new(vec!["NAME".to_string(), "VALUE".to_string()]);
        for r in rows { t.push(r.iter().map(|c| c.to_string()).collect()); }
        t
    }

    #[test]
    fn banners_follow_status() {
        let same = table(&[["R1", "a"]]);
        let rep = report(vec![
            tpl("version", ReportStatus::ChangesDetected, table(&[["R1", "1.0"]]), Some(table(&[["R1", "2|0"]]))),
            tpl("uptime", ReportStatus::Ok, same.clone(), Some(same)),
        ], true);
        let md = render_markdown(&rep);
        assert!(md.contains("## version\n"));
        assert!(md.contains("**CHANGES DETECTED**"));
        assert!(md.contains("**NO POST-TASK CHANGES DETECTED**"));
        assert_eq!(md.matches("**NO MAJOR ERRORS FOUND**").count(), 2);
        assert!(md.contains("| R1 | 2\\|0 | Post |"));
    }

    #[test]
    fn single_snapshot_has_no_banners() {
        let rep = report(vec![tpl("version", ReportStatus::Ok, table(&[["R1", "1.0"]]), None)], false);
        let md = render_markdown(&rep);
        assert!(md.contains("single snapshot"));
        assert!(!md.contains("NO MAJOR ERRORS FOUND"));
    }
}
