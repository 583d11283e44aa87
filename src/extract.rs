use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::template::Template;
use crate::textfsm::FsmTemplate;
use crate::ttp::TokenTemplate;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    #[value(name = "textfsm")]
    TextFsm,
    Ttp,
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self { Engine::TextFsm => "textfsm", Engine::Ttp => "ttp" })
    }
}

/// Turns a template plus a raw text block into rows of named fields.
///
/// Rows are aligned with `Template::columns`. Implementations own the
/// field-declaration syntax of a definition; everything else in the
/// definition (the `#Command:` family of comments) is shared.
pub trait Extractor {
    /// Compiles `definition` and returns the declared columns in order.
    fn declared_columns(&self, definition: &str) -> Result<Vec<String>>;

    fn extract(&self, template: &Template, block: &str) -> Result<Vec<Vec<String>>>;
}

pub struct TextFsmExtractor;

impl Extractor for TextFsmExtractor {
    fn declared_columns(&self, definition: &str) -> Result<Vec<String>> {
        Ok(FsmTemplate::parse(definition)?.columns())
    }

    fn extract(&self, template: &Template, block: &str) -> Result<Vec<Vec<String>>> {
        let fsm = FsmTemplate::parse(&template.definition).with_context(|| format!("template {}", template.name))?;
        fsm.run(block).with_context(|| format!("template {}", template.name))
    }
}

pub struct TtpExtractor;

impl Extractor for TtpExtractor {
    fn declared_columns(&self, definition: &str) -> Result<Vec<String>> {
        Ok(TokenTemplate::parse(definition)?.columns())
    }

    fn extract(&self, template: &Template, block: &str) -> Result<Vec<Vec<String>>> {
        let tt = TokenTemplate::parse(&template.definition).with_context(|| format!("template {}", template.name))?;
        Ok(tt.run(block))
    }
}

pub fn backend(engine: Engine) -> Box<dyn Extractor> {
    match engine {
        Engine::TextFsm => Box::new(TextFsmExtractor),
        Engine::Ttp => Box::new(TtpExtractor),
    }
}

/// Extraction used for commands no template matched: one row per non-blank
/// output line.
pub fn fallback_rows(output: &str) -> Vec<Vec<String>> {
    output.lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .map(|l| vec![l.to_string()])
        .collect()
}
