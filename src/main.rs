use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum, ColorChoice, ArgAction, CommandFactory};
use clap_complete::Shell;
use comfy_table::{Table as TermTable, ContentArrangement};
use serde::{Deserialize, Serialize};
use is_terminal::IsTerminal;
mod builder;
mod capture;
mod diff;
mod extract;
mod html;
mod major;
mod markdown;
mod report;
mod status;
mod table;
mod template;
mod textfsm;
mod ttp;

use crate::diff::DiffMode;
use crate::extract::Engine;
use crate::report::{RunReport, RunSettings};
use crate::status::{DEFAULT_NO_ENTRIES, ReportStatus};
use crate::table::{IdentityMode, Table};

static ENABLE_COLOR: OnceLock<bool> = OnceLock::new();

const DEFAULT_CONFIG: &str = "logcheck.toml";
const DEFAULT_TEMPLATE_FOLDER: &str = "Templates/";

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum OutputFmt { Text, Json }

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Theme { Dark, Light }

#[derive(Clone, Copy, Debug, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LogLevel { Error, Warn, Info, Debug, Trace }

#[derive(Clone, Copy, Debug, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LogFormat { Text, Json }

#[derive(Parser, Debug)]
#[command(
    name = "logcheck",
    about = "Pre/post maintenance log comparison for network devices",
    long_about = "Parses command-output captures taken before and after a maintenance task with TextFSM or TTP templates, reports what changed per template and flags major errors such as links going down.",
    after_long_help = "Examples:\n  logcheck --pre logs/pre/ --post logs/post/\n  logcheck --pre logs/pre/ --post logs/post/ --show-results diff --html report.html\n  logcheck --pre logs/pre/ --template-list templates.csv --engine ttp --output json\n  logcheck --pre logs/pre/ --post logs/post/ --export-dir out/ --fail-on-major",
    color = ColorChoice::Auto
)]
struct Args {
    /// Folder with the PRE capture files (*rx.json)
    #[arg(long)]
    pre: Option<PathBuf>,
    /// Folder with the POST capture files; omit for a single-snapshot run
    #[arg(long)]
    post: Option<PathBuf>,
    /// File listing the templates to use, one per line (default: every file in the template folder)
    #[arg(long, short = 't')]
    template_list: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_TEMPLATE_FOLDER)]
    template_folder: PathBuf,
    /// Template folder for the POST captures (default: --template-folder)
    #[arg(long)]
    template_folder_post: Option<PathBuf>,
    #[arg(long, short = 'e', value_enum, default_value = "textfsm")]
    engine: Engine,
    #[arg(long, short = 'r', value_enum, default_value = "name")]
    router_id: IdentityMode,
    #[arg(long, short = 's', value_enum, default_value = "all")]
    show_results: DiffMode,
    /// Output fragments meaning "nothing to report" (default: "No Matching Entries")
    #[arg(long, num_args = 0.., value_delimiter = ',')]
    no_entries: Vec<String>,
    #[arg(long, short = 'o', value_enum, default_value = "text")]
    output: OutputFmt,
    #[arg(long, value_enum, default_value = "dark")]
    theme: Theme,
    #[arg(long)]
    html: Option<String>,
    #[arg(long, short = 'j')]
    json_path: Option<String>,
    /// Write the Markdown narrative next to the capture folder
    #[arg(long, default_value_t = false)]
    narrative: bool,
    #[arg(long)]
    md_path: Option<String>,
    #[arg(long, help = "Export every table as CSV to this directory")]
    export_dir: Option<String>,
    /// Print the changed and major-error rows under the summary
    #[arg(long, short = 'd', default_value_t = false)]
    details: bool,
    #[arg(long, default_value_t = false, help = "Exit with status 2 when any template reports major errors")]
    fail_on_major: bool,
    #[arg(long, default_value_t = false)]
    open: bool,
    #[arg(long, short = 'C', default_value_t = false)]
    no_color: bool,
    #[arg(long, default_value_t = false)]
    force_color: bool,
    #[arg(long)]
    log_level: Option<LogLevel>,
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
    #[arg(long)]
    log_path: Option<String>,
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,
    #[arg(short = 'q', long, default_value_t = false)]
    quiet: bool,
    #[arg(long, default_value_t = false)]
    progress: bool,
    #[arg(long, value_enum)]
    completions: Option<Shell>,
    #[arg(long)]
    completions_out: Option<String>,
    #[arg(long)]
    config: Option<String>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            pre: None,
            post: None,
            template_list: None,
            template_folder: PathBuf::from(DEFAULT_TEMPLATE_FOLDER),
            template_folder_post: None,
            engine: Engine::TextFsm,
            router_id: IdentityMode::Name,
            show_results: DiffMode::All,
            no_entries: vec![],
            output: OutputFmt::Text,
            theme: Theme::Dark,
            html: None,
            json_path: None,
            narrative: false,
            md_path: None,
            export_dir: None,
            details: false,
            fail_on_major: false,
            open: false,
            no_color: false,
            force_color: false,
            log_level: None,
            log_format: None,
            log_path: None,
            verbose: 0,
            quiet: false,
            progress: false,
            completions: None,
            completions_out: None,
            config: None,
        }
    }
}

#[derive(Deserialize)]
struct AppConfig {
    pre: Option<PathBuf>,
    post: Option<PathBuf>,
    template_list: Option<PathBuf>,
    template_folder: Option<PathBuf>,
    template_folder_post: Option<PathBuf>,
    engine: Option<Engine>,
    router_id: Option<IdentityMode>,
    show_results: Option<DiffMode>,
    no_entries: Option<Vec<String>>,
    output: Option<OutputFmt>,
    theme: Option<Theme>,
    html: Option<String>,
    json_path: Option<String>,
    narrative: Option<bool>,
    md_path: Option<String>,
    export_dir: Option<String>,
    details: Option<bool>,
    fail_on_major: Option<bool>,
    progress: Option<bool>,
    force_color: Option<bool>,
    log_level: Option<LogLevel>,
    log_format: Option<LogFormat>,
    log_path: Option<String>,
}

fn main() {
    let mut args = Args::parse();
    if let Some(sh) = args.completions {
        let mut cmd = Args::command();
        if let Some(path) = args.completions_out.as_ref() {
            if let Ok(mut f) = std::fs::File::create(path) { clap_complete::generate(sh, &mut cmd, "logcheck", &mut f); } else { clap_complete::generate(sh, &mut cmd, "logcheck", &mut std::io::stdout()); }
        } else {
            clap_complete::generate(sh, &mut cmd, "logcheck", &mut std::io::stdout());
        }
        return;
    }
    match load_config(args.config.as_deref()) {
        Ok(Some(cfg)) => apply_config(&mut args, cfg),
        Ok(None) => {}
        Err(e) => { eprintln!("error: {:#}", e); std::process::exit(1); }
    }
    {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if args.quiet {
            builder.filter_level(log::LevelFilter::Error);
        } else if let Some(lvl) = args.log_level {
            let f = match lvl { LogLevel::Error => log::LevelFilter::Error, LogLevel::Warn => log::LevelFilter::Warn, LogLevel::Info => log::LevelFilter::Info, LogLevel::Debug => log::LevelFilter::Debug, LogLevel::Trace => log::LevelFilter::Trace };
            builder.filter_level(f);
        } else if args.verbose > 0 {
            let f = if args.verbose >= 3 { log::LevelFilter::Trace } else if args.verbose == 2 { log::LevelFilter::Debug } else { log::LevelFilter::Info };
            builder.filter_level(f);
        }
        if let Some(fmt) = args.log_format {
            match fmt {
                LogFormat::Json => {
                    builder.format(|buf, record| {
                        use std::io::Write;
                        let obj = serde_json::json!({
                            "ts": chrono::Local::now().to_rfc3339(),
                            "level": record.level().to_string(),
                            "target": record.target(),
                            "msg": record.args().to_string(),
                        });
                        writeln!(buf, "{}", obj)
                    });
                }
                LogFormat::Text => {
                    builder.format(|buf, record| {
                        use std::io::Write;
                        let ts = chrono::Local::now().format("%H:%M:%S");
                        writeln!(buf, "[{:<5} {}] {}", record.level(), ts, record.args())
                    });
                }
            }
        }
        if let Some(path) = args.log_path.as_ref() {
            match std::fs::File::create(path) {
                Ok(f) => { builder.target(env_logger::Target::Pipe(Box::new(f))); }
                Err(e) => { eprintln!("Failed to open log file {}: {}", path, e); }
            }
        }
        builder.init();
    }
    let term = std::env::var("TERM").unwrap_or_default();
    let no_color_env = std::env::var_os("NO_COLOR").is_some();
    let color_default = std::io::stdout().is_terminal() && !no_color_env && term != "dumb";
    let enable_color = if args.force_color { true } else { color_default && !args.no_color };
    let _ = ENABLE_COLOR.set(enable_color);
    match execute(&args) {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            log::error!("{:#}", e);
            eprintln!("{}", paint(&format!("error: {:#}", e), "1;31"));
            std::process::exit(1);
        }
    }
}

/// An explicit `--config` must exist; the default file is optional.
fn load_config(path: Option<&str>) -> Result<Option<AppConfig>> {
    let (path, required) = match path { Some(p) => (p, true), None => (DEFAULT_CONFIG, false) };
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(_) if !required => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("cannot read config file {}", path)),
    };
    let cfg = toml::from_str::<AppConfig>(&text).with_context(|| format!("cannot parse config file {}", path))?;
    Ok(Some(cfg))
}

fn apply_config(args: &mut Args, cfg: AppConfig) {
    if args.pre.is_none() && let Some(v) = cfg.pre { args.pre = Some(v); }
    if args.post.is_none() && let Some(v) = cfg.post { args.post = Some(v); }
    if args.template_list.is_none() && let Some(v) = cfg.template_list { args.template_list = Some(v); }
    if args.template_folder == Path::new(DEFAULT_TEMPLATE_FOLDER) && let Some(v) = cfg.template_folder { args.template_folder = v; }
    if args.template_folder_post.is_none() && let Some(v) = cfg.template_folder_post { args.template_folder_post = Some(v); }
    if args.engine == Engine::TextFsm && let Some(v) = cfg.engine { args.engine = v; }
    if args.router_id == IdentityMode::Name && let Some(v) = cfg.router_id { args.router_id = v; }
    if args.show_results == DiffMode::All && let Some(v) = cfg.show_results { args.show_results = v; }
    if args.no_entries.is_empty() && let Some(v) = cfg.no_entries { args.no_entries = v; }
    if args.output == OutputFmt::Text && let Some(v) = cfg.output { args.output = v; }
    if args.theme == Theme::Dark && let Some(v) = cfg.theme { args.theme = v; }
    if args.html.is_none() && let Some(v) = cfg.html { args.html = Some(v); }
    if args.json_path.is_none() && let Some(v) = cfg.json_path { args.json_path = Some(v); }
    if args.md_path.is_none() && let Some(v) = cfg.md_path { args.md_path = Some(v); }
    if args.export_dir.is_none() && let Some(v) = cfg.export_dir { args.export_dir = Some(v); }
    if !args.narrative && let Some(v) = cfg.narrative { args.narrative = v; }
    if !args.details && let Some(v) = cfg.details { args.details = v; }
    if !args.fail_on_major && let Some(v) = cfg.fail_on_major { args.fail_on_major = v; }
    if !args.progress && let Some(v) = cfg.progress { args.progress = v; }
    if !args.force_color && let Some(v) = cfg.force_color { args.force_color = v; }
    if args.log_level.is_none() && let Some(v) = cfg.log_level { args.log_level = Some(v); }
    if args.log_format.is_none() && let Some(v) = cfg.log_format { args.log_format = Some(v); }
    if args.log_path.is_none() && let Some(v) = cfg.log_path { args.log_path = Some(v); }
}

fn run_settings(args: &Args) -> Result<RunSettings> {
    let Some(pre) = args.pre.clone() else { bail!("no PRE capture folder given; use --pre or set pre in {}", DEFAULT_CONFIG) };
    let no_entries = if args.no_entries.is_empty() { vec![DEFAULT_NO_ENTRIES.to_string()] } else { args.no_entries.clone() };
    Ok(RunSettings {
        pre,
        post: args.post.clone(),
        template_list: args.template_list.clone(),
        template_folder: args.template_folder.clone(),
        template_folder_post: args.template_folder_post.clone(),
        engine: args.engine,
        identity: args.router_id,
        diff_mode: args.show_results,
        no_entries,
        progress: args.progress,
    })
}

/// Runs the comparison and writes every requested output. Returns the exit
/// code for a successful run.
fn execute(args: &Args) -> Result<i32> {
    let settings = run_settings(args)?;
    let report = crate::report::run(&settings)?;
    match args.output {
        OutputFmt::Text => { if !args.quiet { print_summary(&report, args.details); } }
        OutputFmt::Json => {
            if args.json_path.is_none() { println!("{}", serde_json::to_string_pretty(&report)?); }
        }
    }
    if let Some(p) = args.json_path.as_ref() {
        write_json(Path::new(p), &report)?;
        announce(args, "JSON written", p);
    }
    let capture_folder = settings.post.as_ref().unwrap_or(&settings.pre);
    let any_file_output = args.html.is_some() || args.json_path.is_some() || args.md_path.is_some() || args.narrative || args.export_dir.is_some();
    let html_path = match args.html.as_ref() {
        Some(p) => Some(PathBuf::from(p)),
        None if !any_file_output && args.output == OutputFmt::Text => Some(sibling_path(capture_folder, "html")),
        None => None,
    };
    if let Some(path) = html_path {
        let html = crate::html::render_html(&report, args.theme);
        std::fs::write(&path, html).with_context(|| format!("HTML write failed for {}", path.display()))?;
        if args.open { open_file_default(path.clone()); }
        announce(args, "HTML generated", &path.to_string_lossy());
    }
    if args.narrative || args.md_path.is_some() {
        let path = args.md_path.as_ref().map(PathBuf::from).unwrap_or_else(|| sibling_path(capture_folder, "md"));
        std::fs::write(&path, crate::markdown::render_markdown(&report)).with_context(|| format!("Markdown write failed for {}", path.display()))?;
        announce(args, "Markdown written", &path.to_string_lossy());
    }
    if let Some(dir) = args.export_dir.as_ref() {
        let files = write_export(Path::new(dir), &report)?;
        announce(args, &format!("{} CSV files written to", files.len()), dir);
    }
    if args.fail_on_major && report.count(ReportStatus::MajorErrors) > 0 {
        log::warn!("{} templates report major errors", report.count(ReportStatus::MajorErrors));
        return Ok(2);
    }
    Ok(0)
}

fn announce(args: &Args, what: &str, path: &str) {
    if !args.quiet && args.output == OutputFmt::Text { println!("{}", paint(&format!("{}: {}", what, path), "1;36")); }
}

/// `logs/post/` becomes `logs/post.<ext>`.
fn sibling_path(folder: &Path, ext: &str) -> PathBuf {
    let s = folder.to_string_lossy();
    let trimmed = s.trim_end_matches(['/', '\\']);
    let base = if trimmed.is_empty() || trimmed == "." { "logcheck" } else { trimmed };
    PathBuf::from(format!("{}.{}", base, ext))
}

fn status_code(s: ReportStatus) -> &'static str {
    match s {
        ReportStatus::Ok => "32",
        ReportStatus::ChangesDetected => "33",
        ReportStatus::MajorErrors => "1;31",
        _ => "34",
    }
}

fn print_summary(rep: &RunReport, details: bool) {
    let generated = rep.generated.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M");
    match rep.post_folder.as_ref() {
        Some(post) => println!("{}", paint(&format!("Pre: {}  Post: {}  ({})", rep.pre_folder, post, generated), "1;36")),
        None => println!("{}", paint(&format!("Logs: {}  ({}, single snapshot)", rep.pre_folder, generated), "1;36")),
    }
    println!("{}", paint(&format!("Engine: {}  Router id: {}  Results: {}", rep.engine, rep.identity, rep.diff_mode), "1;36"));
    let mut table = TermTable::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(["Template", "Command", "Status", "Pre", "Post", "Changed", "Major"].iter().map(|h| paint(h, "1")).collect::<Vec<_>>());
    for t in &rep.templates {
        let post = t.post_table.as_ref().map(|p| p.len().to_string()).unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            t.display_name.clone(),
            truncate(&t.command, 48),
            paint(t.status.as_str(), status_code(t.status)),
            t.pre_table.len().to_string(),
            post,
            t.diff_table.len().to_string(),
            t.major_table.len().to_string(),
        ]);
    }
    println!("{}", table);
    let counts: Vec<String> = rep.counts.iter().map(|c| paint(&format!("{} {}", c.status, c.count), status_code(c.status))).collect();
    println!("{} {}", paint("Totals:", "1"), counts.join("  "));
    if !details { return; }
    for t in rep.templates.iter().filter(|t| !t.diff_table.is_empty()) {
        let (changes, major) = t.banners();
        println!();
        println!("{} {}", paint(&t.display_name, "1"), paint(changes, status_code(t.status)));
        println!("{}", term_table(&t.diff_table));
        if !t.major_table.is_empty() {
            println!("{}", paint(major, "1;31"));
            println!("{}", term_table(&t.major_table));
        }
    }
}

fn term_table(t: &Table) -> TermTable {
    let mut out = TermTable::new();
    out.set_content_arrangement(ContentArrangement::Dynamic);
    out.set_header(t.columns.clone());
    for row in &t.rows { out.add_row(row.clone()); }
    out
}

fn write_json(path: &Path, rep: &RunReport) -> Result<()> {
    std::fs::write(path, serde_json::to_vec_pretty(rep)?).with_context(|| format!("JSON write failed for {}", path.display()))
}

fn write_table_csv(path: &Path, t: &Table) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path).with_context(|| format!("CSV write failed for {}", path.display()))?;
    wtr.write_record(&t.columns)?;
    for row in &t.rows { wtr.write_record(row)?; }
    wtr.flush()?;
    Ok(())
}

/// One CSV per template and table kind plus `index.csv`. Returns the files
/// written.
fn write_export(dir: &Path, rep: &RunReport) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
    let mut written = Vec::new();
    let mut used: HashSet<String> = HashSet::new();
    let index_path = dir.join("index.csv");
    let mut index = csv::Writer::from_path(&index_path).with_context(|| format!("CSV write failed for {}", index_path.display()))?;
    index.write_record(["sheet", "template", "command", "status", "pre_status", "post_status", "pre_rows", "post_rows", "diff_rows", "major_rows"])?;
    for t in &rep.templates {
        let mut stem = t.display_name.clone();
        let mut n = 1;
        while !used.insert(stem.clone()) { n += 1; stem = format!("{}_{}", t.display_name, n); }
        let tables = [("pre", Some(&t.pre_table)), ("post", t.post_table.as_ref()), ("diff", Some(&t.diff_table)), ("major", Some(&t.major_table))];
        for (kind, table) in tables {
            let Some(table) = table else { continue };
            if table.columns.is_empty() { continue; }
            let path = dir.join(format!("{}_{}.csv", stem, kind));
            write_table_csv(&path, table)?;
            written.push(path);
        }
        index.write_record([
            stem.clone(),
            t.name.clone(),
            t.command.clone(),
            t.status.to_string(),
            t.pre_status.to_string(),
            t.post_status.map(|p| p.to_string()).unwrap_or_default(),
            t.pre_table.len().to_string(),
            t.post_table.as_ref().map(|p| p.len().to_string()).unwrap_or_default(),
            t.diff_table.len().to_string(),
            t.major_table.len().to_string(),
        ])?;
    }
    index.flush()?;
    written.push(index_path);
    Ok(written)
}

fn truncate(s: &str, n: usize) -> String {
    let mut out: String = s.chars().take(n).collect();
    if s.chars().count() > n { out.push_str("..."); }
    out
}

fn paint(s: &str, code: &str) -> String {
    if *ENABLE_COLOR.get().unwrap_or(&true) { format!("\x1b[{}m{}\x1b[0m", code, s) } else { s.to_string() }
}

#[cfg(target_os = "windows")]
fn open_file_default(p: PathBuf) {
    let s = p.to_string_lossy().into_owned();
    let _ = std::process::Command::new("cmd").args(["/C", "start", "", &s]).spawn()
        .map_err(|e| log::error!("Failed to open file {}: {}", s, e));
}

#[cfg(target_os = "macos")]
fn open_file_default(p: PathBuf) {
    let s = p.to_string_lossy().into_owned();
    let _ = std::process::Command::new("open").arg(&s).spawn().map_err(|e| log::error!("Failed to open file {}: {}", s, e));
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn open_file_default(p: PathBuf) {
    let s = p.to_string_lossy().into_owned();
    let _ = std::process::Command::new("xdg-open").arg(&s).spawn().map_err(|e| log::error!("Failed to open file {}: {}", s, e));
}
