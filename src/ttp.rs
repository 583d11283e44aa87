use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;

const COLUMNS_DECL: &str = "#Columns:";
const IGNORE: &str = "ignore";

#[derive(Clone, Debug)]
struct PatternLine {
    re: Regex,
    vars: Vec<String>,
    start: bool,
}

/// A token template: pattern lines with `{{ name | modifier }}` placeholders.
#[derive(Clone, Debug)]
pub struct TokenTemplate {
    columns: Vec<String>,
    lines: Vec<PatternLine>,
    start: usize,
}

impl TokenTemplate {
    pub fn parse(text: &str) -> Result<Self> {
        let mut declared: Option<Vec<String>> = None;
        let mut lines: Vec<PatternLine> = Vec::new();
        for (no, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if let Some(rest) = trimmed.strip_prefix(COLUMNS_DECL) {
                declared = Some(rest.split(',').map(|c| c.trim().to_string()).filter(|c| !c.is_empty()).collect());
                continue;
            }
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('<') { continue; }
            if !trimmed.contains("{{") {
                log::trace!("ttp: ignoring literal line {}: {:?}", no + 1, trimmed);
                continue;
            }
            lines.push(compile_line(trimmed).with_context(|| format!("line {}: bad pattern {:?}", no + 1, trimmed))?);
        }
        if lines.is_empty() { bail!("no pattern lines with placeholders"); }
        let columns = match declared {
            Some(cols) => cols,
            None => {
                let mut cols: Vec<String> = Vec::new();
                for l in &lines { for v in &l.vars { if !cols.contains(v) { cols.push(v.clone()); } } }
                cols
            }
        };
        if columns.is_empty() { bail!("template declares no columns"); }
        let start = lines.iter().position(|l| l.start).unwrap_or(0);
        Ok(Self { columns, lines, start })
    }

    pub fn columns(&self) -> Vec<String> { self.columns.clone() }

    pub fn run(&self, input: &str) -> Vec<Vec<String>> {
        let mut rows: Vec<Vec<String>> = Vec::new();
        let mut open: Option<Vec<String>> = None;
        for line in input.lines() {
            let Some((idx, caps)) = self.lines.iter().enumerate().find_map(|(i, l)| l.re.captures(line).map(|c| (i, c))) else { continue };
            if idx == self.start && let Some(row) = open.take() { rows.push(row); }
            let row = open.get_or_insert_with(|| vec![String::new(); self.columns.len()]);
            for v in &self.lines[idx].vars {
                if let (Some(m), Some(col)) = (caps.name(v), self.columns.iter().position(|c| c == v)) { row[col] = m.as_str().to_string(); }
            }
        }
        if let Some(row) = open { rows.push(row); }
        rows
    }
}

fn compile_line(line: &str) -> Result<PatternLine> {
    let mut re = String::from(r"^\s*");
    let mut vars: Vec<String> = Vec::new();
    let mut start = false;
    let mut rest = line;
    while let Some(open) = rest.find("{{") {
        push_literal(&mut re, &rest[..open]);
        let close = rest[open..].find("}}").ok_or_else(|| anyhow!("unterminated placeholder"))? + open;
        let inner = &rest[open + 2..close];
        let mut parts = split_modifiers(inner).into_iter();
        let name = parts.next().unwrap_or_default();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') { bail!("invalid placeholder name {:?}", name); }
        let mut pattern = r"\S+".to_string();
        for m in parts {
            match m {
                "WORD" => pattern = r"\S+".to_string(),
                "DIGIT" => pattern = r"\d+".to_string(),
                "PHRASE" => pattern = r"\S+(?: \S+)+".to_string(),
                "ORPHRASE" => pattern = r"\S+(?: \S+)*".to_string(),
                "_start_" => start = true,
                other if other.starts_with("re(") && other.ends_with(')') => {
                    pattern = other[3..other.len() - 1].trim_matches(|c| c == '"' || c == '\'').to_string();
                }
                other => log::warn!("ttp: unsupported modifier {:?} on {}, ignored", other, name),
            }
        }
        if name == IGNORE {
            re.push_str(&format!("(?:{})", pattern));
        } else {
            if vars.iter().any(|v| v == name) { bail!("placeholder {} used twice on one line", name); }
            re.push_str(&format!("(?P<{}>{})", name, pattern));
            vars.push(name.to_string());
        }
        rest = &rest[close + 2..];
    }
    push_literal(&mut re, rest);
    re.push_str(r"\s*$");
    Ok(PatternLine { re: Regex::new(&re)?, vars, start })
}

/// Splits `name | mod | re("a|b")` on the pipes that sit outside quotes.
fn split_modifiers(inner: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut from = 0;
    for (i, c) in inner.char_indices() {
        match (quote, c) {
            (Some(q), _) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '|') => { parts.push(inner[from..i].trim()); from = i + 1; }
            _ => {}
        }
    }
    parts.push(inner[from..].trim());
    parts
}

fn push_literal(re: &mut String, text: &str) {
    let mut first = true;
    for word in text.split(char::is_whitespace) {
        if !first { re.push_str(r"\s+"); }
        first = false;
        re.push_str(&regex::escape(word));
    }
    // collapse runs produced by consecutive whitespace
    while re.contains(r"\s+\s+") { *re = re.replace(r"\s+\s+", r"\s+"); }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_template_yields_row_per_match() {
        let t = "#Command: show router interface\n#Columns: IFACE,ADDR\n<group>\n{{ IFACE }}   {{ ADDR }}   Up\n</group>\n";
        let tt = TokenTemplate::parse(t).unwrap();
        assert_eq!(tt.columns(), vec!["IFACE", "ADDR"]);
        let rows = tt.run("show router interface\nsystem  10.0.0.1/32  Up\nto-r2 192.168.1.1/30 Up\nto-r3 192.168.1.5/30 Down\n");
        assert_eq!(rows, vec![vec!["system".to_string(), "10.0.0.1/32".to_string()], vec!["to-r2".to_string(), "192.168.1.1/30".to_string()]]);
    }

    #[test]
    fn start_line_groups_following_matches() {
        let t = "Peer {{ PEER | _start_ }}\n  State {{ STATE | ORPHRASE }}\n  Uptime {{ UPTIME | DIGIT }}s\n";
        let tt = TokenTemplate::parse(t).unwrap();
        assert_eq!(tt.columns(), vec!["PEER", "STATE", "UPTIME"]);
        let rows = tt.run("Peer 10.1.1.1\n  State Established\n  Uptime 300s\nPeer 10.1.1.2\n  State Active idle\n");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec!["10.1.1.1", "Established", "300"]);
        assert_eq!(rows[1], vec!["10.1.1.2", "Active idle", ""]);
    }

    #[test]
    fn custom_regex_and_ignore() {
        let t = "{{ ignore }} {{ VLAN | re(\"\\d{1,4}\") }}\n";
        let tt = TokenTemplate::parse(t).unwrap();
        assert_eq!(tt.columns(), vec!["VLAN"]);
        assert_eq!(tt.run("vlan 100\nvlan abc\n"), vec![vec!["100".to_string()]]);
    }

    #[test]
    fn regex_modifier_keeps_alternation() {
        let tt = TokenTemplate::parse("{{ PORT }} {{ STATE | re(\"up|down\") }}\n").unwrap();
        assert_eq!(tt.columns(), vec!["PORT", "STATE"]);
        assert_eq!(tt.run("1/1/1 up\n1/1/2 garbage\n1/1/3 down\n"), vec![vec!["1/1/1", "up"], vec!["1/1/3", "down"]]);
        assert_eq!(split_modifiers(" X | re('a|b') | _start_ "), vec!["X", "re('a|b')", "_start_"]);
    }

    #[test]
    fn rejects_templates_without_placeholders() {
        assert!(TokenTemplate::parse("#Command: show x\nplain text\n").is_err());
        assert!(TokenTemplate::parse("{{ A }} {{ A }}\n").is_err());
    }
}
