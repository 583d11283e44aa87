use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

use crate::builder::{Snapshot, build_snapshot};
use crate::capture::load_captures;
use crate::diff::{DiffMode, full_diff, only_diff};
use crate::extract::{Engine, backend};
use crate::major::find_major;
use crate::status::{ParseStatus, ReportStatus, classify, report_status};
use crate::table::{IdentityMode, Table};
use crate::template::{DEFAULT_MAJOR, Registry, Template, check_same_templates, load_templates, read_template_list};

/// Everything a run needs, already merged from CLI and config file.
#[derive(Clone, Debug)]
pub struct RunSettings {
    pub pre: PathBuf,
    pub post: Option<PathBuf>,
    pub template_list: Option<PathBuf>,
    pub template_folder: PathBuf,
    pub template_folder_post: Option<PathBuf>,
    pub engine: Engine,
    pub identity: IdentityMode,
    pub diff_mode: DiffMode,
    pub no_entries: Vec<String>,
    pub progress: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct TemplateReport {
    pub name: String,
    pub display_name: String,
    pub command: String,
    pub status: ReportStatus,
    pub pre_status: ParseStatus,
    pub post_status: Option<ParseStatus>,
    pub pre_table: Table,
    pub post_table: Option<Table>,
    pub diff_table: Table,
    pub major_table: Table,
}

pub const BANNER_NO_CHANGES: &str = "NO POST-TASK CHANGES DETECTED";
pub const BANNER_CHANGES: &str = "CHANGES DETECTED";
pub const BANNER_NO_MAJOR: &str = "NO MAJOR ERRORS FOUND";
pub const BANNER_MAJOR: &str = "MAJOR ERRORS DETECTED POST-TASK";
pub const BANNER_NO_PARSING: &str = "NO Parsing Detected";

impl TemplateReport {
    /// Banner lines shown above the diff table and the major-error table.
    pub fn banners(&self) -> (&'static str, &'static str) {
        match self.status {
            ReportStatus::Ok => (BANNER_NO_CHANGES, BANNER_NO_MAJOR),
            ReportStatus::ChangesDetected => (BANNER_CHANGES, BANNER_NO_MAJOR),
            ReportStatus::MajorErrors => (BANNER_CHANGES, BANNER_MAJOR),
            _ => (BANNER_NO_PARSING, BANNER_NO_PARSING),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct StatusCount {
    pub status: ReportStatus,
    pub count: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub generated: DateTime<Utc>,
    pub pre_folder: String,
    pub post_folder: Option<String>,
    pub template_folder: String,
    pub engine: Engine,
    pub identity: IdentityMode,
    pub diff_mode: DiffMode,
    pub counts: Vec<StatusCount>,
    pub templates: Vec<TemplateReport>,
}

impl RunReport {
    fn new(s: &RunSettings, templates: Vec<TemplateReport>) -> Self {
        let counts = ReportStatus::ALL.iter()
            .map(|st| StatusCount { status: *st, count: templates.iter().filter(|t| t.status == *st).count() })
            .filter(|c| c.count > 0)
            .collect();
        Self {
            generated: Utc::now(),
            pre_folder: s.pre.to_string_lossy().to_string(),
            post_folder: s.post.as_ref().map(|p| p.to_string_lossy().to_string()),
            template_folder: s.template_folder.to_string_lossy().to_string(),
            engine: s.engine,
            identity: s.identity,
            diff_mode: s.diff_mode,
            counts,
            templates,
        }
    }

    pub fn count(&self, status: ReportStatus) -> usize {
        self.counts.iter().find(|c| c.status == status).map(|c| c.count).unwrap_or(0)
    }

    pub fn is_comparison(&self) -> bool { self.post_folder.is_some() }
}

/// Sheet-style short name: vendor prefix and template suffixes removed, dots
/// replaced, at most 31 characters.
pub fn display_name(name: &str) -> String {
    let mut s = name.replace("nokia_sros_", "");
    for suffix in [".template", "_template", ".ttp"] { s = s.replace(suffix, ""); }
    s.replace('.', "_").chars().take(31).collect()
}

fn pick_names(pre: &Snapshot, post: Option<&Snapshot>, missing: &[&String]) -> Vec<String> {
    let mut names: Vec<String> = pre.tables.iter().map(|t| t.name.clone()).collect();
    let extra = post.into_iter().flat_map(|p| p.tables.iter().map(|t| &t.name)).chain(missing.iter().copied());
    for n in extra { if !names.contains(n) { names.push(n.clone()); } }
    names
}

/// One record per template known to either side or listed but missing.
pub fn assemble(pre_reg: &Registry, post_reg: Option<&Registry>, pre: &Snapshot, post: Option<&Snapshot>, s: &RunSettings) -> Result<Vec<TemplateReport>> {
    let missing: Vec<&String> = pre_reg.missing.iter().chain(post_reg.into_iter().flat_map(|r| r.missing.iter())).collect();
    let mut out = Vec::new();
    for name in pick_names(pre, post, &missing) {
        let template: Option<&Template> = pre_reg.get(&name).or_else(|| post_reg.and_then(|r| r.get(&name)));
        let pre_entry = pre.get(&name);
        let post_entry = post.and_then(|p| p.get(&name));
        let command = pre_entry.or(post_entry).map(|e| e.command.clone())
            .or_else(|| template.map(|t| t.command.clone()))
            .unwrap_or_default();
        let pre_status = classify(pre_entry, &s.no_entries);
        let pre_table = pre_entry.map(|e| e.table.clone()).unwrap_or_default();

        let Some(post) = post else {
            out.push(TemplateReport {
                display_name: display_name(&name), name, command,
                status: report_status(pre_status, 0, 0), pre_status, post_status: None,
                pre_table, post_table: None, diff_table: Table::default(), major_table: Table::default(),
            });
            continue;
        };

        let post_entry = post.get(&name);
        let post_status = classify(post_entry, &s.no_entries);
        let post_table = post_entry.map(|e| e.table.clone()).unwrap_or_default();
        let (diff_table, major_table) = if pre_entry.is_none() && post_entry.is_none() {
            (Table::default(), Table::default())
        } else {
            let pre_side = if pre_entry.is_some() { pre_table.clone() } else { Table::new(post_table.columns.clone()) };
            let post_side = if post_entry.is_some() { post_table.clone() } else { Table::new(pre_table.columns.clone()) };
            let display: &[String] = template.map(|t| t.show_diff_columns.as_slice()).unwrap_or(&[]);
            let diff = match s.diff_mode {
                DiffMode::All => full_diff(&pre_side, &post_side),
                DiffMode::Diff => only_diff(&pre_side, &post_side, display)?,
            };
            let keywords: Vec<String> = match template {
                Some(t) => t.major_down.clone(),
                None => DEFAULT_MAJOR.iter().map(|k| k.to_string()).collect(),
            };
            let mut sort_columns = s.identity.columns();
            if let Some(t) = template { sort_columns.extend(t.filter_columns.iter().cloned()); }
            let major = find_major(&diff, &keywords, s.diff_mode, &sort_columns);
            (diff, major)
        };
        let status = report_status(post_status, diff_table.len(), major_table.len());
        log::debug!("{}: pre {} post {} diff {} major {} -> {}", name, pre_status, post_status, diff_table.len(), major_table.len(), status);
        out.push(TemplateReport {
            display_name: display_name(&name), name, command,
            status, pre_status, post_status: Some(post_status),
            pre_table, post_table: Some(post_table), diff_table, major_table,
        });
    }
    Ok(out)
}

/// Loads templates and captures, builds both snapshots and assembles the
/// report. Every configuration error surfaces before extraction starts.
pub fn run(s: &RunSettings) -> Result<RunReport> {
    if s.diff_mode == DiffMode::Diff && s.identity != IdentityMode::Name {
        bail!("showing only the changed columns requires router identity by name, not {:?}", s.identity);
    }
    let extractor = backend(s.engine);
    let list = s.template_list.as_deref().map(read_template_list).transpose()?;
    let pre_reg = load_templates(list.as_deref(), &s.template_folder, extractor.as_ref())?;
    let post_reg = match s.template_folder_post.as_ref() {
        Some(folder) if s.post.is_some() && *folder != s.template_folder => {
            let reg = load_templates(list.as_deref(), folder, extractor.as_ref())?;
            if list.is_none() { check_same_templates(&pre_reg, &reg)?; }
            Some(reg)
        }
        _ => None,
    };

    let pre_caps = load_captures(&s.pre)?;
    let post_caps = s.post.as_deref().map(load_captures).transpose()?;

    let pre = build_snapshot(&pre_reg, &pre_caps, extractor.as_ref(), s.identity, &[], s.progress);
    let post = match post_caps {
        Some(caps) => Some(build_snapshot(post_reg.as_ref().unwrap_or(&pre_reg), &caps, extractor.as_ref(), s.identity, &pre.unmatched, s.progress)),
        None => None,
    };
    let templates = assemble(&pre_reg, post_reg.as_ref(), &pre, post.as_ref(), s)?;
    let report = RunReport::new(s, templates);
    log::info!("{} templates reported, {} with changes, {} with major errors",
        report.templates.len(), report.count(ReportStatus::ChangesDetected), report.count(ReportStatus::MajorErrors));
    Ok(report)
}
