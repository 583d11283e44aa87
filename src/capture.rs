use anyhow::{Context, Result, bail};
use globset::{GlobBuilder, GlobSetBuilder};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use walkdir::WalkDir;

pub const CAPTURE_GLOB: &str = "*rx.json";
pub const PLACEHOLDER: &str = "N/A";
pub const RESERVED_KEYS: [&str; 8] = ["name", "ip", "version", "hwType", "/environment no more", "/environment more", "exit all", "logout"];

/// One device's capture bundle. `commands` keeps the order of the file.
#[derive(Clone, Debug, Serialize)]
pub struct DeviceCapture {
    pub source: String,
    pub name: String,
    pub ip: String,
    pub version: String,
    pub hw_type: String,
    pub commands: Vec<(String, String)>,
}

pub fn is_reserved(key: &str) -> bool { RESERVED_KEYS.contains(&key) }

/// Path globbing is only supported on Linux, macOS and Windows.
pub fn check_platform() -> Result<()> {
    match std::env::consts::OS {
        "linux" | "macos" | "windows" => Ok(()),
        other => bail!("{}: not a supported platform", other),
    }
}

fn value_text(v: &Value) -> String {
    match v { Value::String(s) => s.clone(), Value::Null => String::new(), other => other.to_string() }
}

pub fn parse_capture(source: &str, text: &str) -> Result<DeviceCapture> {
    let v: Value = serde_json::from_str(text).with_context(|| format!("{} is not valid JSON", source))?;
    let Some(obj) = v.as_object() else { bail!("{}: capture must be a JSON object", source) };
    let required = |key: &str| -> Result<String> {
        match obj.get(key) {
            Some(v) if !value_text(v).is_empty() => Ok(value_text(v)),
            _ => bail!("{}: missing required key {:?}", source, key),
        }
    };
    let name = required("name")?;
    let ip = required("ip")?;
    let optional = |key: &str| -> String {
        match obj.get(key).map(value_text) {
            Some(s) if !s.is_empty() => s,
            _ => { log::debug!("{}: no {} recorded, using {}", source, key, PLACEHOLDER); PLACEHOLDER.to_string() }
        }
    };
    let version = optional("version");
    let hw_type = optional("hwType");
    let commands = obj.iter()
        .filter(|(k, _)| !is_reserved(k))
        .map(|(k, v)| (k.clone(), value_text(v)))
        .collect();
    Ok(DeviceCapture { source: source.to_string(), name, ip, version, hw_type, commands })
}

/// Loads every `*rx.json` capture directly inside `folder`, sorted by path.
pub fn load_captures(folder: &Path) -> Result<Vec<DeviceCapture>> {
    check_platform()?;
    if !folder.is_dir() { bail!("the capture folder {} does not exist", folder.display()); }
    let mut gs = GlobSetBuilder::new();
    gs.add(GlobBuilder::new(CAPTURE_GLOB).literal_separator(true).build()?);
    let set = gs.build()?;
    let mut paths = Vec::new();
    for de in WalkDir::new(folder).min_depth(1).max_depth(1).into_iter() {
        let de = de.with_context(|| format!("cannot list {}", folder.display()))?;
        if de.file_type().is_file() && set.is_match(de.file_name()) { paths.push(de.into_path()); }
    }
    paths.sort();
    let mut out = Vec::with_capacity(paths.len());
    for p in paths {
        let source = if cfg!(windows) { p.to_string_lossy().replace('\\', "/") } else { p.to_string_lossy().to_string() };
        let text = std::fs::read_to_string(&p).with_context(|| format!("cannot read {}", source))?;
        out.push(parse_capture(&source, &text)?);
    }
    if out.is_empty() { log::warn!("no {} captures found in {}", CAPTURE_GLOB, folder.display()); }
    log::info!("loaded {} device captures from {}", out.len(), folder.display());
    Ok(out)
}
