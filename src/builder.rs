use serde::Serialize;

use crate::capture::{DeviceCapture, is_reserved};
use crate::extract::{Extractor, fallback_rows};
use crate::table::{IdentityMode, Table};
use crate::template::{FALLBACK_NAME, Registry, Template};

/// One template's result table for one snapshot side.
#[derive(Clone, Debug, Serialize)]
pub struct TemplateTable {
    pub name: String,
    pub command: String,
    pub table: Table,
    /// Raw output of every matched command, newline-joined.
    pub raw: String,
    pub matched: bool,
}

impl TemplateTable {
    fn empty(name: String, command: String, template: &Template, identity: IdentityMode) -> Self {
        let mut columns = identity.columns();
        columns.extend(template.filter_columns.iter().cloned());
        Self { name, command, table: Table::new(columns), raw: String::new(), matched: false }
    }

    fn absorb(&mut self, template: &Template, rows: Vec<Vec<String>>, device: &DeviceCapture, output: &str, identity: IdentityMode) {
        let keep: Vec<Option<usize>> = template.filter_columns.iter().map(|c| template.columns.iter().position(|x| x == c)).collect();
        let id = identity.values(&device.name, &device.ip);
        log::trace!("{}: {} rows from {}", self.name, rows.len(), device.name);
        for row in rows {
            let mut out = id.clone();
            out.extend(keep.iter().map(|i| i.and_then(|i| row.get(i).cloned()).unwrap_or_default()));
            self.table.push(out);
        }
        if !self.raw.is_empty() { self.raw.push('\n'); }
        self.raw.push_str(output);
        self.matched = true;
    }
}

/// All template tables of one snapshot side, declared templates first, then
/// the fallback buckets `general_<i>`.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Snapshot {
    pub tables: Vec<TemplateTable>,
    /// Unmatched command names; position i is bucket `general_<i>`.
    pub unmatched: Vec<String>,
}

impl Snapshot {
    pub fn get(&self, name: &str) -> Option<&TemplateTable> { self.tables.iter().find(|t| t.name == name) }
}

pub fn fallback_id(i: usize) -> String { format!("{}_{}", FALLBACK_NAME, i) }

/// First declared template whose command pattern matches. The fallback never
/// takes part.
pub fn match_template<'a>(registry: &'a Registry, command: &str) -> Option<(usize, &'a Template)> {
    registry.templates.iter().enumerate().find(|(_, t)| !t.is_fallback() && t.matches(command))
}

struct Accumulator<'c> {
    tables: Vec<TemplateTable>,
    leftovers: Vec<(&'c DeviceCapture, Vec<&'c (String, String)>)>,
}

/// An extraction error is confined to its template: the output is kept as raw
/// text with no rows, so the template classifies as not parsed.
fn absorb_device<'c>(mut acc: Accumulator<'c>, device: &'c DeviceCapture, registry: &Registry, extractor: &dyn Extractor, identity: IdentityMode) -> Accumulator<'c> {
    let mut unmatched = Vec::new();
    for entry in device.commands.iter().filter(|(cmd, _)| !is_reserved(cmd)) {
        let (cmd, output) = entry;
        match match_template(registry, cmd) {
            Some((idx, template)) => {
                log::debug!("{}: {:?} -> {}", device.name, cmd, template.name);
                let block = format!("{}\n{}\n", cmd, output);
                let rows = match extractor.extract(template, &block) {
                    Ok(rows) => rows,
                    Err(e) => {
                        log::warn!("{}: {} failed on {:?}: {:#}", device.name, template.name, cmd, e);
                        Vec::new()
                    }
                };
                acc.tables[idx].absorb(template, rows, device, output, identity);
            }
            None => unmatched.push(entry),
        }
    }
    if !unmatched.is_empty() { log::debug!("{}: {} commands without template", device.name, unmatched.len()); }
    acc.leftovers.push((device, unmatched));
    acc
}

/// First-seen order of unmatched commands across all devices, after `seed`.
pub fn unmatched_order<'a>(seed: &[String], leftovers: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    let mut order = seed.to_vec();
    for cmd in leftovers { if !order.contains(cmd) { order.push(cmd.clone()); } }
    order
}

/// Builds every template's table for one snapshot side. `seed` fixes the
/// fallback identifiers of already-known unmatched commands so both sides of a
/// comparison agree on them.
pub fn build_snapshot(registry: &Registry, captures: &[DeviceCapture], extractor: &dyn Extractor, identity: IdentityMode, seed: &[String], progress: bool) -> Snapshot {
    let pb = if progress { Some(indicatif::ProgressBar::new_spinner()) } else { None };
    let start = Accumulator {
        tables: registry.templates.iter().map(|t| TemplateTable::empty(t.name.clone(), t.command.clone(), t, identity)).collect(),
        leftovers: Vec::new(),
    };
    let acc = captures.iter().fold(start, |acc, device| {
        if let Some(ref pb) = pb { pb.set_message(format!("Parsing {}", device.name)); pb.tick(); }
        absorb_device(acc, device, registry, extractor, identity)
    });
    if let Some(pb) = pb { pb.finish_and_clear(); }

    let Accumulator { mut tables, leftovers } = acc;
    let order = unmatched_order(seed, leftovers.iter().flat_map(|(_, cmds)| cmds.iter().map(|(c, _)| c)));
    let fallback = &registry.fallback;
    let mut buckets: Vec<TemplateTable> = order.iter().enumerate()
        .map(|(i, cmd)| TemplateTable::empty(fallback_id(i), cmd.clone(), fallback, identity))
        .collect();
    for (device, cmds) in leftovers {
        for (cmd, output) in cmds {
            let Some(i) = order.iter().position(|c| c == cmd) else { continue };
            buckets[i].absorb(fallback, fallback_rows(output), device, output, identity);
        }
    }
    tables.extend(buckets);
    Snapshot { tables, unmatched: order }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::parse_capture;
    use crate::extract::{Engine, backend};
    use crate::template::{Template, build_template};

    const VERSION_TPL: &str = "#Command: show version\nValue VERSION (\\S+)\n\nStart\n  ^${VERSION}\\s*$$ -> Record\n";
    const PORT_TPL: &str = "#Command: show port\n#filterColumns: DESC\n#filterAction: exclude\nValue PORT (\\S+)\nValue OPER (Up|Down)\nValue DESC (\\S+)\n\nStart\n  ^${PORT}\\s+${OPER}\\s+${DESC} -> Record\n";

    fn registry(defs: &[(&str, &str)]) -> Registry {
        let ex = backend(Engine::TextFsm);
        let templates = defs.iter().map(|(n, d)| build_template(n, d, ex.as_ref(), &[]).unwrap()).collect();
        Registry { folder: std::env::temp_dir(), templates, missing: vec![], fallback: Template::fallback().unwrap() }
    }

    fn device(json: &str) -> DeviceCapture { parse_capture("test", json).unwrap() }

    #[test]
    fn rows_carry_identity_and_filtered_columns() {
        let reg = registry(&[("port.template", PORT_TPL)]);
        let caps = vec![
            device(r#"{"name":"R1","ip":"10.0.0.1","show port":"1/1/1 Up uplink\n1/1/2 Down spare"}"#),
            device(r#"{"name":"R2","ip":"10.0.0.2","show port":"2/1/1 Up core"}"#),
        ];
        let snap = build_snapshot(&reg, &caps, backend(Engine::TextFsm).as_ref(), IdentityMode::Both, &[], false);
        let t = &snap.get("port.template").unwrap().table;
        assert_eq!(t.columns, vec!["NAME", "IP", "PORT", "OPER"]);
        assert_eq!(t.rows, vec![
            vec!["R1", "10.0.0.1", "1/1/1", "Up"],
            vec!["R1", "10.0.0.1", "1/1/2", "Down"],
            vec!["R2", "10.0.0.2", "2/1/1", "Up"],
        ]);
        assert!(snap.unmatched.is_empty());
    }

    #[test]
    fn first_matching_template_wins() {
        let broad = "#Command: show\nValue LINE (.+)\n\nStart\n  ^${LINE} -> Record\n";
        let reg = registry(&[("a_broad.template", broad), ("b_version.template", VERSION_TPL)]);
        let caps = vec![device(r#"{"name":"R1","ip":"10.0.0.1","show version":"1.0"}"#)];
        let snap = build_snapshot(&reg, &caps, backend(Engine::TextFsm).as_ref(), IdentityMode::Name, &[], false);
        assert!(snap.get("a_broad.template").unwrap().matched);
        assert!(!snap.get("b_version.template").unwrap().matched);
        assert!(snap.get("b_version.template").unwrap().table.is_empty());
    }

    #[test]
    fn fallback_ids_are_stable_across_devices() {
        let reg = registry(&[("version.template", VERSION_TPL)]);
        let caps = vec![
            device(r#"{"name":"A","ip":"1.1.1.1","show version":"1.0","x":"out x","y":"out y A"}"#),
            device(r#"{"name":"B","ip":"2.2.2.2","y":"out y B","z":"out z"}"#),
        ];
        let snap = build_snapshot(&reg, &caps, backend(Engine::TextFsm).as_ref(), IdentityMode::Name, &[], false);
        assert_eq!(snap.unmatched, vec!["x", "y", "z"]);
        let names: Vec<&str> = snap.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["version.template", "general_0", "general_1", "general_2"]);
        let y = snap.get("general_1").unwrap();
        assert_eq!(y.command, "y");
        assert_eq!(y.table.rows, vec![vec!["A", "out y A"], vec!["B", "out y B"]]);
        assert_eq!(snap.get("general_0").unwrap().table.rows, vec![vec!["A", "out x"]]);
        assert_eq!(snap.get("general_2").unwrap().table.rows, vec![vec!["B", "out z"]]);
    }

    #[test]
    fn seed_keeps_identifiers_of_known_commands() {
        let reg = registry(&[]);
        let caps = vec![device(r#"{"name":"A","ip":"1.1.1.1","z":"out z","w":"out w"}"#)];
        let seed = vec!["x".to_string(), "z".to_string()];
        let snap = build_snapshot(&reg, &caps, backend(Engine::TextFsm).as_ref(), IdentityMode::Name, &seed, false);
        assert_eq!(snap.unmatched, vec!["x", "z", "w"]);
        assert!(!snap.get("general_0").unwrap().matched);
        assert_eq!(snap.get("general_1").unwrap().raw, "out z");
        assert_eq!(snap.get("general_2").unwrap().command, "w");
    }

    #[test]
    fn error_action_keeps_output_without_rows() {
        let strict = "#Command: show port\nValue PORT (\\S+)\n\nStart\n  ^MINOR: -> Error\n  ^${PORT}\\s*$$ -> Record\n";
        let reg = registry(&[("port.template", strict), ("version.template", VERSION_TPL)]);
        let caps = vec![
            device(r#"{"name":"A","ip":"1.1.1.1","show port":"MINOR: CLI Invalid","show version":"2.0"}"#),
            device(r#"{"name":"B","ip":"2.2.2.2","show port":"1/1/1"}"#),
        ];
        let snap = build_snapshot(&reg, &caps, backend(Engine::TextFsm).as_ref(), IdentityMode::Name, &[], false);
        let port = snap.get("port.template").unwrap();
        assert!(port.matched);
        assert!(port.raw.contains("MINOR: CLI Invalid"));
        assert_eq!(port.table.rows, vec![vec!["B", "1/1/1"]]);
        assert_eq!(snap.get("version.template").unwrap().table.rows, vec![vec!["A", "2.0"]]);
    }

    #[test]
    fn spinner_does_not_change_the_snapshot() {
        let reg = registry(&[("version.template", VERSION_TPL)]);
        let caps = vec![device(r#"{"name":"A","ip":"1.1.1.1","show version":"1.0","x":"out x"}"#)];
        let ex = backend(Engine::TextFsm);
        let quiet = build_snapshot(&reg, &caps, ex.as_ref(), IdentityMode::Name, &[], false);
        let shown = build_snapshot(&reg, &caps, ex.as_ref(), IdentityMode::Name, &[], true);
        assert_eq!(quiet.unmatched, shown.unmatched);
        assert_eq!(quiet.get("version.template").unwrap().table, shown.get("version.template").unwrap().table);
    }

    #[test]
    fn raw_output_accumulates_across_devices() {
        let reg = registry(&[("version.template", VERSION_TPL)]);
        let caps = vec![
            device(r#"{"name":"A","ip":"1.1.1.1","show version":"No Matching Entries"}"#),
            device(r#"{"name":"B","ip":"2.2.2.2","show version":""}"#),
        ];
        let snap = build_snapshot(&reg, &caps, backend(Engine::TextFsm).as_ref(), IdentityMode::Name, &[], false);
        let v = snap.get("version.template").unwrap();
        assert!(v.raw.contains("No Matching Entries"));
        assert!(v.matched);
        assert!(v.table.is_empty());
    }
}
