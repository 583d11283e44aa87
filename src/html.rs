use crate::report::{RunReport, TemplateReport};
use crate::status::ReportStatus;
use crate::table::Table;

const DARK: &str = ":root{--bg:#0a0e13;--fg:#ffffff;--muted:#c0c4cc;--card:#0d131a;--border:#243041;--accent:#3b82f6;--ok:#22c55e;--warn:#f59e0b;--err:#ef4444;--info:#60a5fa;--head:#0c1118;--zebra:#0b0f14}";
const LIGHT: &str = ":root{--bg:#f7fafc;--fg:#111827;--muted:#6b7280;--card:#ffffff;--border:#e5e7eb;--accent:#2563eb;--ok:#16a34a;--warn:#d97706;--err:#dc2626;--info:#2563eb;--head:#f3f4f6;--zebra:#fbfdff}";
const BASE: &str = "body{margin:0;background:var(--bg);color:var(--fg);font-family:Segoe UI,system-ui,-apple-system,Arial,sans-serif} .container{max-width:1400px;margin:0 auto;padding:24px} .header{display:flex;align-items:center;justify-content:space-between;gap:12px;margin-bottom:16px} .title{font-size:20px;font-weight:600} .sub{color:var(--muted);font-size:13px} .grid{display:grid;grid-template-columns:repeat(4,minmax(0,1fr));gap:12px} .card{background:var(--card);border:1px solid var(--border);border-radius:10px;padding:14px} .metric{display:flex;align-items:center;justify-content:space-between} .metric .label{color:var(--muted);font-size:12px} .metric .value{font-size:22px;font-weight:700} .section{margin-top:22px} .section h3{margin:0 0 10px 0;font-size:16px;font-weight:600} .table{width:100%;border-collapse:separate;border-spacing:0;background:var(--card);border:1px solid var(--border);border-radius:10px;overflow:hidden;margin-bottom:10px} .table th{background:var(--head);text-align:left;font-weight:600;padding:8px;border-bottom:1px solid var(--border)} .table td{padding:8px;border-bottom:1px solid var(--border);vertical-align:top;font-family:Consolas,Monaco,monospace;font-size:12px} .table tr:nth-child(odd) td{background:var(--zebra)} .chip{display:inline-block;border-radius:999px;padding:3px 10px;font-size:12px;border:1px solid var(--border)} .ok{color:var(--ok)} .warn{color:var(--warn)} .err{color:var(--err)} .info{color:var(--info)} .banner{font-weight:700;letter-spacing:.5px;padding:8px 12px;border-radius:8px;border:1px solid var(--border);margin:10px 0} .split{display:grid;grid-template-columns:repeat(2,minmax(0,1fr));gap:12px} a{color:var(--accent)} .footer{margin-top:22px;color:var(--muted);font-size:12px} @media (max-width:900px){.grid{grid-template-columns:repeat(2,minmax(0,1fr))}.split{grid-template-columns:1fr}}";

fn status_class(s: ReportStatus) -> &'static str {
    match s {
        ReportStatus::Ok => "ok",
        ReportStatus::ChangesDetected => "warn",
        ReportStatus::MajorErrors => "err",
        _ => "info",
    }
}

/// Self-contained report: an index of every template and one section each.
pub fn render_html(rep: &RunReport, theme: crate::Theme) -> String {
    let mut s = String::new();
    s.push_str("<html lang=\"en\"><head><meta charset=\"utf-8\"><meta name=\"viewport\" content=\"width=device-width, initial-scale=1\"><title>logcheck Report</title><style>");
    s.push_str(match theme { crate::Theme::Dark => DARK, crate::Theme::Light => LIGHT });
    s.push_str(BASE);
    s.push_str("</style></head><body><div class=\"container\">");
    s.push_str("<div class=\"header\"><div class=\"title\">logcheck Report</div>");
    let generated = rep.generated.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M");
    let folders = match rep.post_folder.as_ref() {
        Some(p) => format!("{} → {}", html_escape(&rep.pre_folder), html_escape(p)),
        None => html_escape(&rep.pre_folder),
    };
    s.push_str(&format!("<div class=\"sub\">{} | {} | engine {} | router id {} | results {}</div></div>", generated, folders, rep.engine, rep.identity, rep.diff_mode));

    s.push_str("<div class=\"grid\">");
    s.push_str(&format!("<div class=\"card metric\"><div class=\"label\">Templates</div><div class=\"value\">{}</div></div>", rep.templates.len()));
    for c in &rep.counts {
        s.push_str(&format!("<div class=\"card metric\"><div class=\"label\">{}</div><div class=\"value {}\">{}</div></div>", c.status, status_class(c.status), c.count));
    }
    s.push_str("</div>");

    s.push_str("<div class=\"section\" id=\"index\"><h3>Index</h3><table class=\"table\"><thead><tr><th>Template</th><th>Command</th><th>Status</th><th>Pre rows</th><th>Post rows</th><th>Changed</th><th>Major</th></tr></thead><tbody>");
    for (i, t) in rep.templates.iter().enumerate() {
        let post_rows = t.post_table.as_ref().map(|p| p.len().to_string()).unwrap_or_else(|| "-".to_string());
        s.push_str(&format!("<tr><td><a href=\"#t{}\">{}</a></td><td>{}</td><td><span class=\"chip {}\">{}</span></td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            i, html_escape(&t.display_name), html_escape(&t.command), status_class(t.status), t.status, t.pre_table.len(), post_rows, t.diff_table.len(), t.major_table.len()));
    }
    s.push_str("</tbody></table></div>");

    for (i, t) in rep.templates.iter().enumerate() { render_template(&mut s, i, t); }

    s.push_str("<div class=\"footer\">Generated by logcheck</div></div></body></html>");
    s
}

fn render_template(s: &mut String, i: usize, t: &TemplateReport) {
    s.push_str(&format!("<div class=\"section\" id=\"t{}\"><h3>{} <span class=\"chip {}\">{}</span></h3>", i, html_escape(&t.display_name), status_class(t.status), t.status));
    s.push_str(&format!("<div class=\"sub\">{} · <code>{}</code> · <a href=\"#index\">Index</a></div>", html_escape(&t.name), html_escape(&t.command)));
    match t.post_table.as_ref() {
        Some(post) => {
            s.push_str("<div class=\"split\"><div><h4>Pre-Check</h4>");
            render_table(s, &t.pre_table);
            s.push_str("</div><div><h4>Post-Check</h4>");
            render_table(s, post);
            s.push_str("</div></div>");
            let (changes, major) = t.banners();
            let cls = status_class(t.status);
            s.push_str(&format!("<div class=\"banner {}\">{}</div>", cls, changes));
            if !t.diff_table.is_empty() { render_table(s, &t.diff_table); }
            s.push_str(&format!("<div class=\"banner {}\">{}</div>", cls, major));
            if !t.major_table.is_empty() { render_table(s, &t.major_table); }
        }
        None => render_table(s, &t.pre_table),
    }
    s.push_str("</div>");
}

fn render_table(s: &mut String, t: &Table) {
    if t.columns.is_empty() { return; }
    s.push_str("<table class=\"table\"><thead><tr>");
    for c in &t.columns { s.push_str(&format!("<th>{}</th>", html_escape(c))); }
    s.push_str("</tr></thead><tbody>");
    for row in &t.rows {
        s.push_str("<tr>");
        for cell in row { s.push_str(&format!("<td>{}</td>", html_escape(cell))); }
        s.push_str("</tr>");
    }
    s.push_str("</tbody></table>");
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
