use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::extract::Extractor;

pub const FALLBACK_NAME: &str = "general";
pub const FALLBACK_COLUMN: &str = "OUTPUT";
pub const MAJOR_FILE: &str = "majorFile.yml";
pub const DEFAULT_MAJOR: [&str; 2] = ["down", "dwn"];

const DECL_COMMAND: &str = "#Command:";
const DECL_MAJOR: &str = "#majorDown:";
const DECL_FILTER_COLS: &str = "#filterColumns:";
const DECL_FILTER_ACTION: &str = "#filterAction:";
const DECL_SHOW_DIFF: &str = "#showDiffColumns:";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterAction { IncludeOnly, Exclude }

impl FilterAction {
    fn parse(s: &str) -> Option<Self> {
        match s.trim() { "include-only" => Some(Self::IncludeOnly), "exclude" => Some(Self::Exclude), _ => None }
    }
}

#[derive(Clone, Debug)]
pub struct Template {
    pub name: String,
    pub command: String,
    pub command_pattern: Regex,
    pub columns: Vec<String>,
    pub filter_columns: Vec<String>,
    pub filter_action: Option<FilterAction>,
    pub major_down: Vec<String>,
    pub show_diff_columns: Vec<String>,
    pub definition: String,
    fallback: bool,
}

impl Template {
    /// The catch-all template for commands no declared template matches.
    pub fn fallback() -> Result<Self> {
        Ok(Self {
            name: FALLBACK_NAME.to_string(),
            command: ".*".to_string(),
            command_pattern: Regex::new(".*")?,
            columns: vec![FALLBACK_COLUMN.to_string()],
            filter_columns: vec![FALLBACK_COLUMN.to_string()],
            filter_action: None,
            major_down: DEFAULT_MAJOR.iter().map(|s| s.to_string()).collect(),
            show_diff_columns: Vec::new(),
            definition: String::new(),
            fallback: true,
        })
    }

    pub fn is_fallback(&self) -> bool { self.fallback }

    pub fn matches(&self, command: &str) -> bool { self.command_pattern.is_match(command) }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Declarations {
    command: Option<String>,
    major: Vec<String>,
    filter_columns: Vec<String>,
    filter_action: Option<String>,
    show_diff: Vec<String>,
}

fn csv_items(s: &str) -> Vec<String> {
    s.split(',').map(|x| x.trim().to_string()).filter(|x| !x.is_empty()).collect()
}

fn parse_declarations(definition: &str) -> Result<Declarations> {
    let mut d = Declarations::default();
    for line in definition.lines() {
        let line = line.trim();
        if let Some(v) = line.strip_prefix(DECL_COMMAND) {
            if d.command.is_some() { bail!("more than one {} declaration", DECL_COMMAND); }
            d.command = Some(v.trim().to_string());
        } else if let Some(v) = line.strip_prefix(DECL_MAJOR) {
            d.major.extend(csv_items(v));
        } else if let Some(v) = line.strip_prefix(DECL_FILTER_COLS) {
            d.filter_columns.extend(csv_items(v));
        } else if let Some(v) = line.strip_prefix(DECL_FILTER_ACTION) {
            d.filter_action = Some(v.trim().to_string());
        } else if let Some(v) = line.strip_prefix(DECL_SHOW_DIFF) {
            d.show_diff.extend(csv_items(v));
        }
    }
    Ok(d)
}

/// Applies the include-only/exclude policy to the declared filter columns.
fn resolve_filter(name: &str, columns: &[String], declared: &[String], action: Option<&str>) -> Result<(Vec<String>, Option<FilterAction>)> {
    if declared.is_empty() { return Ok((columns.to_vec(), action.and_then(FilterAction::parse))); }
    let unknown: Vec<&String> = declared.iter().filter(|c| !columns.contains(c)).collect();
    if !unknown.is_empty() {
        bail!("template {}: filter columns {:?} are not variables of the template (variables: {:?})", name, unknown, columns);
    }
    let Some(action) = action.and_then(FilterAction::parse) else {
        bail!("template {}: filter columns {:?} declared but #filterAction is {:?}; use \"include-only\" or \"exclude\"", name, declared, action.unwrap_or(""));
    };
    let resolved = match action {
        FilterAction::IncludeOnly => {
            let mut out: Vec<String> = Vec::new();
            for c in declared { if !out.contains(c) { out.push(c.clone()); } }
            out
        }
        FilterAction::Exclude => {
            if columns.iter().all(|c| declared.contains(c)) {
                bail!("template {}: excluding {:?} removes every column and would yield an empty table", name, declared);
            }
            columns.iter().filter(|c| !declared.contains(c)).cloned().collect()
        }
    };
    Ok((resolved, Some(action)))
}

pub fn build_template(name: &str, definition: &str, extractor: &dyn Extractor, extra_major: &[String]) -> Result<Template> {
    let decl = parse_declarations(definition).with_context(|| format!("template {}", name))?;
    let Some(command) = decl.command else { bail!("template {} has no {} declaration", name, DECL_COMMAND) };
    let command_pattern = Regex::new(&command).with_context(|| format!("template {}: invalid command pattern {:?}", name, command))?;
    let columns = extractor.declared_columns(definition).with_context(|| format!("template {} could not be compiled", name))?;
    let (filter_columns, filter_action) = resolve_filter(name, &columns, &decl.filter_columns, decl.filter_action.as_deref())?;
    if !decl.filter_columns.is_empty() {
        log::info!("template {}: {:?} columns {:?}", name, filter_action, decl.filter_columns);
    }
    let unknown: Vec<&String> = decl.show_diff.iter().filter(|c| !columns.contains(c)).collect();
    if !unknown.is_empty() {
        bail!("template {}: diff columns {:?} are not variables of the template (variables: {:?})", name, unknown, columns);
    }
    let filtered_out: Vec<&String> = decl.show_diff.iter().filter(|c| !filter_columns.contains(c)).collect();
    if !filtered_out.is_empty() {
        bail!("template {}: diff columns {:?} are removed by the column filter {:?}", name, filtered_out, filter_columns);
    }
    let mut major_down: Vec<String> = Vec::new();
    for k in DEFAULT_MAJOR.iter().map(|s| s.to_string()).chain(decl.major).chain(extra_major.iter().cloned()) {
        if !k.is_empty() && !major_down.contains(&k) { major_down.push(k); }
    }
    Ok(Template {
        name: name.to_string(),
        command,
        command_pattern,
        columns,
        filter_columns,
        filter_action,
        major_down,
        show_diff_columns: decl.show_diff,
        definition: definition.to_string(),
        fallback: false,
    })
}

/// Declared templates in iteration order, names that could not be found
/// (list mode only), and the fallback template.
#[derive(Clone, Debug)]
pub struct Registry {
    pub folder: PathBuf,
    pub templates: Vec<Template>,
    pub missing: Vec<String>,
    pub fallback: Template,
}

impl Registry {
    /// Declared template by name; fallback identifiers resolve to the fallback.
    pub fn get(&self, name: &str) -> Option<&Template> {
        if is_fallback_name(name) { return Some(&self.fallback); }
        self.templates.iter().find(|t| t.name == name)
    }

    pub fn names(&self) -> Vec<String> { self.templates.iter().map(|t| t.name.clone()).collect() }
}

pub fn is_fallback_name(name: &str) -> bool {
    name == FALLBACK_NAME || name.strip_prefix(FALLBACK_NAME).and_then(|r| r.strip_prefix('_')).is_some_and(|n| n.parse::<usize>().is_ok())
}

/// Reads a template list: one template name per line, `#` comments allowed.
pub fn read_template_list(path: &Path) -> Result<Vec<String>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("cannot open template list {}", path.display()))?;
    let mut out = Vec::new();
    for rec in rdr.records() {
        let rec = rec.with_context(|| format!("cannot read template list {}", path.display()))?;
        if let Some(name) = rec.get(0) && !name.is_empty() { out.push(name.to_string()); }
    }
    Ok(out)
}

fn load_major_file(folder: &Path) -> Result<BTreeMap<String, Vec<String>>> {
    let p = folder.join(MAJOR_FILE);
    if !p.is_file() { return Ok(BTreeMap::new()); }
    let data = std::fs::read_to_string(&p).with_context(|| format!("cannot read {}", p.display()))?;
    if data.trim().is_empty() { return Ok(BTreeMap::new()); }
    let map: BTreeMap<String, Vec<String>> = serde_yaml::from_str(&data).with_context(|| format!("cannot parse {}", p.display()))?;
    log::info!("loaded extra major keywords for {} templates from {}", map.len(), p.display());
    Ok(map)
}

fn folder_template_names(folder: &Path) -> Result<Vec<String>> {
    if !folder.is_dir() {
        bail!("the template folder {} does not exist; check the folder name", folder.display());
    }
    let mut names: Vec<String> = Vec::new();
    for de in WalkDir::new(folder).min_depth(1).max_depth(1).into_iter() {
        let de = de.with_context(|| format!("cannot list {}", folder.display()))?;
        if !de.file_type().is_file() { continue; }
        let name = de.file_name().to_string_lossy().to_string();
        if name == MAJOR_FILE || name.starts_with('.') { continue; }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

/// Loads the templates named by `list`, or every template in `folder` when
/// no list is given.
pub fn load_templates(list: Option<&[String]>, folder: &Path, extractor: &dyn Extractor) -> Result<Registry> {
    let names = match list {
        Some(l) => l.to_vec(),
        None => folder_template_names(folder)?,
    };
    if names.is_empty() { log::warn!("no templates gathered from folder {}; only the fallback template is active", folder.display()); }
    let majors = load_major_file(folder)?;
    let mut templates: Vec<Template> = Vec::new();
    let mut missing: Vec<String> = Vec::new();
    for name in names {
        if is_fallback_name(&name) { bail!("template name {} is reserved for the fallback template", name); }
        if templates.iter().any(|t| t.name == name) || missing.contains(&name) { continue; }
        let path = folder.join(&name);
        if !path.is_file() {
            log::warn!("template file {} does not exist inside {}; reported as no_template", name, folder.display());
            missing.push(name);
            continue;
        }
        let definition = std::fs::read_to_string(&path).with_context(|| format!("cannot read template {}", path.display()))?;
        let extra = majors.get(&name).cloned().unwrap_or_default();
        templates.push(build_template(&name, &definition, extractor, &extra)?);
        log::debug!("loaded template {}", name);
    }
    log::info!("loaded {} templates from {}", templates.len(), folder.display());
    Ok(Registry { folder: folder.to_path_buf(), templates, missing, fallback: Template::fallback()? })
}

/// Pre and post registries loaded from different folders must declare the
/// same templates.
pub fn check_same_templates(pre: &Registry, post: &Registry) -> Result<()> {
    let mut a = pre.names();
    let mut b = post.names();
    a.sort();
    b.sort();
    if a == b { return Ok(()); }
    if a.len() != b.len() {
        bail!("the PRE template folder {} has {} templates but the POST template folder {} has {}; use the same templates or a template list",
            pre.folder.display(), a.len(), post.folder.display(), b.len());
    }
    let only_pre: Vec<&String> = a.iter().filter(|n| !b.contains(n)).collect();
    let only_post: Vec<&String> = b.iter().filter(|n| !a.contains(n)).collect();
    bail!("the template folders {} and {} hold the same number of templates but differ: {:?} vs {:?}",
        pre.folder.display(), post.folder.display(), only_pre, only_post)
}
