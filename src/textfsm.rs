use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use std::collections::HashMap;

const START: &str = "Start";
const EOF_STATE: &str = "EOF";
const END_STATE: &str = "End";

#[derive(Clone, Debug, Default)]
struct ValueDef {
    name: String,
    regex: String,
    filldown: bool,
    required: bool,
    list: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LineOp { Next, Continue }

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RecordOp { NoRecord, Record, Clear, ClearAll }

#[derive(Clone, Debug, PartialEq, Eq)]
enum Transition { Stay, Goto(String), End, Error(Option<String>) }

#[derive(Clone, Debug)]
struct Rule {
    re: Regex,
    line_op: LineOp,
    record_op: RecordOp,
    next: Transition,
}

/// A compiled TextFSM-style state machine.
#[derive(Clone, Debug)]
pub struct FsmTemplate {
    values: Vec<ValueDef>,
    states: HashMap<String, Vec<Rule>>,
    implicit_eof_record: bool,
}

impl FsmTemplate {
    pub fn parse(text: &str) -> Result<Self> {
        let mut values: Vec<ValueDef> = Vec::new();
        let mut state_lines: Vec<(usize, &str)> = Vec::new();
        let mut in_values = true;
        for (no, line) in text.lines().enumerate() {
            let no = no + 1;
            if line.trim_start().starts_with('#') { continue; }
            if in_values {
                if let Some(rest) = line.strip_prefix("Value ") {
                    let v = parse_value(rest).with_context(|| format!("line {}: bad Value declaration", no))?;
                    if values.iter().any(|x| x.name == v.name) { bail!("line {}: duplicate Value {}", no, v.name); }
                    values.push(v);
                    continue;
                }
                if line.trim().is_empty() { if !values.is_empty() { in_values = false; } continue; }
                if values.is_empty() { bail!("line {}: expected a Value declaration, found {:?}", no, line); }
                in_values = false;
            }
            state_lines.push((no, line));
        }
        if values.is_empty() { bail!("no Value declarations"); }

        let mut order: Vec<String> = Vec::new();
        let mut raw_rules: HashMap<String, Vec<(usize, String)>> = HashMap::new();
        let mut current: Option<String> = None;
        for (no, line) in state_lines {
            if line.trim().is_empty() { current = None; continue; }
            if !line.starts_with(char::is_whitespace) {
                let name = line.trim();
                if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') { bail!("line {}: invalid state name {:?}", no, name); }
                if raw_rules.contains_key(name) { bail!("line {}: duplicate state {}", no, name); }
                raw_rules.insert(name.to_string(), Vec::new());
                order.push(name.to_string());
                current = Some(name.to_string());
                continue;
            }
            let rule = line.trim();
            if !rule.starts_with('^') { bail!("line {}: rules must start with '^', found {:?}", no, rule); }
            let Some(state) = current.as_ref() else { bail!("line {}: rule outside of a state", no) };
            if let Some(list) = raw_rules.get_mut(state) { list.push((no, rule.to_string())); }
        }
        if !raw_rules.contains_key(START) { bail!("missing required 'Start' state"); }

        let mut states = HashMap::new();
        for name in &order {
            let mut rules = Vec::new();
            for (no, text) in &raw_rules[name] {
                let rule = parse_rule(text, &values).with_context(|| format!("line {}: bad rule in state {}", no, name))?;
                if let Transition::Goto(target) = &rule.next
                    && !raw_rules.contains_key(target) { bail!("line {}: unknown state {}", no, target); }
                rules.push(rule);
            }
            states.insert(name.clone(), rules);
        }
        let implicit_eof_record = !raw_rules.contains_key(EOF_STATE);
        Ok(Self { values, states, implicit_eof_record })
    }

    pub fn columns(&self) -> Vec<String> { self.values.iter().map(|v| v.name.clone()).collect() }

    /// Runs the machine over `input`, returning one row per recorded entry,
    /// cells in `columns()` order.
    pub fn run(&self, input: &str) -> Result<Vec<Vec<String>>> {
        let mut slots: Vec<Vec<String>> = vec![Vec::new(); self.values.len()];
        let mut rows: Vec<Vec<String>> = Vec::new();
        let mut state = START.to_string();
        'lines: for line in input.lines() {
            let Some(rules) = self.states.get(&state) else { break };
            for rule in rules {
                let Some(caps) = rule.re.captures(line) else { continue };
                for (i, v) in self.values.iter().enumerate() {
                    if let Some(m) = caps.name(&v.name) {
                        if v.list { slots[i].push(m.as_str().to_string()); } else { slots[i] = vec![m.as_str().to_string()]; }
                    }
                }
                match rule.record_op {
                    RecordOp::Record => self.record(&mut slots, &mut rows),
                    RecordOp::Clear => self.clear(&mut slots, false),
                    RecordOp::ClearAll => self.clear(&mut slots, true),
                    RecordOp::NoRecord => {}
                }
                match &rule.next {
                    Transition::Error(msg) => bail!("template raised Error on line {:?}{}", line, msg.as_ref().map(|m| format!(": {}", m)).unwrap_or_default()),
                    Transition::End => { state = END_STATE.to_string(); break 'lines; }
                    Transition::Goto(s) => state = s.clone(),
                    Transition::Stay => {}
                }
                if rule.line_op == LineOp::Next { continue 'lines; }
            }
        }
        if state != END_STATE && self.implicit_eof_record { self.record(&mut slots, &mut rows); }
        Ok(rows)
    }

    fn record(&self, slots: &mut [Vec<String>], rows: &mut Vec<Vec<String>>) {
        if slots.iter().all(|s| s.is_empty()) { return; }
        if self.values.iter().zip(slots.iter()).any(|(v, s)| v.required && s.is_empty()) {
            self.clear(slots, false);
            return;
        }
        rows.push(slots.iter().map(|s| s.join(",")).collect());
        self.clear(slots, false);
    }

    fn clear(&self, slots: &mut [Vec<String>], all: bool) {
        for (v, s) in self.values.iter().zip(slots.iter_mut()) {
            if all || !v.filldown { s.clear(); }
        }
    }
}

fn parse_value(rest: &str) -> Result<ValueDef> {
    let open = rest.find('(').ok_or_else(|| anyhow!("missing regex in {:?}", rest))?;
    let regex = rest[open..].trim().to_string();
    if !regex.ends_with(')') { bail!("regex must be enclosed in parentheses: {}", regex); }
    let head: Vec<&str> = rest[..open].split_whitespace().collect();
    let (options, name) = match head.as_slice() {
        [name] => ("", *name),
        [options, name] => (*options, *name),
        _ => bail!("expected '[Options] NAME (regex)', found {:?}", rest),
    };
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') { bail!("invalid value name {:?}", name); }
    Regex::new(&regex).with_context(|| format!("invalid regex for {}", name))?;
    let mut v = ValueDef { name: name.to_string(), regex, ..Default::default() };
    for opt in options.split(',').filter(|o| !o.is_empty()) {
        match opt {
            "Filldown" => v.filldown = true,
            "Required" => v.required = true,
            "List" => v.list = true,
            "Key" => {}
            other => bail!("unsupported option {} on {}", other, name),
        }
    }
    Ok(v)
}

fn parse_rule(text: &str, values: &[ValueDef]) -> Result<Rule> {
    let (pattern, action) = match split_action(text) { Some((p, a)) => (p, a), None => (text, "") };
    let re = Regex::new(&expand_vars(pattern.trim_end(), values)?)?;
    let mut rule = Rule { re, line_op: LineOp::Next, record_op: RecordOp::NoRecord, next: Transition::Stay };
    let mut tokens = action.split_whitespace().peekable();
    if let Some(first) = tokens.peek().copied() {
        let mut parts = first.splitn(2, '.');
        let head = parts.next().unwrap_or_default();
        let tail = parts.next();
        let line_op = match head { "Next" => Some(LineOp::Next), "Continue" => Some(LineOp::Continue), _ => None };
        if let Some(op) = line_op {
            rule.line_op = op;
            if let Some(t) = tail { rule.record_op = record_op(t).ok_or_else(|| anyhow!("unknown record action {}", t))?; }
            tokens.next();
        } else if let Some(op) = record_op(head) {
            if tail.is_some() { bail!("malformed action {}", first); }
            rule.record_op = op;
            tokens.next();
        }
    }
    let rest: Vec<&str> = tokens.collect();
    rule.next = match rest.first().copied() {
        None => Transition::Stay,
        Some("Error") => {
            let msg = rest[1..].join(" ");
            Transition::Error(if msg.is_empty() { None } else { Some(msg.trim_matches('"').to_string()) })
        }
        Some(END_STATE) => Transition::End,
        Some(state) => {
            if rest.len() > 1 { bail!("unexpected tokens after state {}", state); }
            Transition::Goto(state.to_string())
        }
    };
    if rule.line_op == LineOp::Continue && matches!(rule.next, Transition::Goto(_) | Transition::End) {
        bail!("Continue cannot change state");
    }
    Ok(rule)
}

fn record_op(s: &str) -> Option<RecordOp> {
    match s {
        "Record" => Some(RecordOp::Record),
        "NoRecord" => Some(RecordOp::NoRecord),
        "Clear" => Some(RecordOp::Clear),
        "Clearall" => Some(RecordOp::ClearAll),
        _ => None,
    }
}

/// Splits `^pattern -> Action` on the last whitespace-preceded arrow.
fn split_action(text: &str) -> Option<(&str, &str)> {
    let mut search = text.len();
    while let Some(idx) = text[..search].rfind("->") {
        if idx > 0 && text[..idx].ends_with(char::is_whitespace) { return Some((&text[..idx], text[idx + 2..].trim())); }
        search = idx;
    }
    None
}

fn expand_vars(pattern: &str, values: &[ValueDef]) -> Result<String> {
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut chars = pattern.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '$' { out.push(c); continue; }
        let rest = &pattern[i + 1..];
        if rest.starts_with('$') { out.push('$'); chars.next(); continue; }
        let name: String = if let Some(inner) = rest.strip_prefix('{') {
            let end = inner.find('}').ok_or_else(|| anyhow!("unterminated ${{ in {:?}", pattern))?;
            for _ in 0..inner[..end].chars().count() + 2 { chars.next(); }
            inner[..end].to_string()
        } else {
            let n: String = rest.chars().take_while(|c| c.is_ascii_alphanumeric() || *c == '_').collect();
            for _ in 0..n.len() { chars.next(); }
            n
        };
        if name.is_empty() {
            // a bare `$` is the end-of-line anchor
            out.push('$');
            continue;
        }
        let v = values.iter().find(|v| v.name == name).ok_or_else(|| anyhow!("unknown value ${}", name))?;
        out.push_str(&format!("(?P<{}>{})", v.name, v.regex));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERFACES: &str = "#Command: show port
Value Filldown SLOT (\\d+)
Value Required PORT (\\S+)
Value ADMIN (Up|Down)
Value OPER (Up|Down)

Start
  ^Slot ${SLOT}
  ^${PORT}\\s+${ADMIN}\\s+${OPER}\\s*$$ -> Record
";

    #[test]
    fn records_rows_with_filldown() {
        let fsm = FsmTemplate::parse(INTERFACES).unwrap();
        assert_eq!(fsm.columns(), vec!["SLOT", "PORT", "ADMIN", "OPER"]);
        let rows = fsm.run("show port\nSlot 1\n1/1/1 Up Up\n1/1/2 Up Down\nSlot 2\n2/1/1 Down Down\n").unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], vec!["1", "1/1/2", "Up", "Down"]);
        assert_eq!(rows[2][0], "2");
    }

    #[test]
    fn implicit_eof_record_and_required() {
        let t = "Value VER (\\S+)\n\nStart\n  ^Version ${VER}\n";
        let fsm = FsmTemplate::parse(t).unwrap();
        assert_eq!(fsm.run("Version 1.0\n").unwrap(), vec![vec!["1.0".to_string()]]);
        assert!(fsm.run("nothing here\n").unwrap().is_empty());
        let t = "Value VER (\\S+)\n\nStart\n  ^Version ${VER}\n\nEOF\n";
        assert!(FsmTemplate::parse(t).unwrap().run("Version 1.0\n").unwrap().is_empty());
    }

    #[test]
    fn state_transitions_and_list_values() {
        let t = "Value List PEER (\\S+)\n\nStart\n  ^Neighbors -> Peers\n\nPeers\n  ^peer ${PEER}\n  ^end -> End\n";
        let fsm = FsmTemplate::parse(t).unwrap();
        let rows = fsm.run("peer x\nNeighbors\npeer a\npeer b\nend\npeer c\n").unwrap();
        assert!(rows.is_empty(), "End state suppresses the implicit record");
        let t = "Value List PEER (\\S+)\n\nStart\n  ^Neighbors -> Peers\n\nPeers\n  ^peer ${PEER}\n";
        let rows = FsmTemplate::parse(t).unwrap().run("Neighbors\npeer a\npeer b\n").unwrap();
        assert_eq!(rows, vec![vec!["a,b".to_string()]]);
    }

    #[test]
    fn continue_keeps_matching() {
        let t = "Value A (\\d+)\nValue B (\\d+)\n\nStart\n  ^${A} -> Continue\n  ^\\d+ ${B} -> Record\n";
        let rows = FsmTemplate::parse(t).unwrap().run("1 2\n").unwrap();
        assert_eq!(rows, vec![vec!["1".to_string(), "2".to_string()]]);
    }

    #[test]
    fn rejects_bad_templates() {
        assert!(FsmTemplate::parse("Value X (\\d+)\n\nOther\n  ^x\n").is_err());
        assert!(FsmTemplate::parse("Value X (\\d+)\n\nStart\n  ^${Y}\n").is_err());
        assert!(FsmTemplate::parse("Value X (\\d+)\n\nStart\n  ^x -> Nowhere\n").is_err());
        assert!(FsmTemplate::parse("Value Bogus X (\\d+)\n\nStart\n  ^x\n").is_err());
        assert!(FsmTemplate::parse("Start\n  ^x\n").is_err());
        let err = FsmTemplate::parse("Value X (\\d+)\n\nStart\n  ^boom -> Error \"bad\"\n").unwrap().run("boom\n");
        assert!(err.is_err());
    }
}
