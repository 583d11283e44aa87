use serde::{Deserialize, Serialize};
use std::fmt;

use crate::builder::TemplateTable;

pub const DEFAULT_NO_ENTRIES: &str = "No Matching Entries";

/// Outcome of extracting one template on one snapshot side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStatus { NoTemplate, NoParsing, NoMatchingEntries, NoData, Ok }

/// Final per-template classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus { NoTemplate, NoParsing, NoMatchingEntries, NoData, Ok, ChangesDetected, MajorErrors }

impl ReportStatus {
    pub const ALL: [ReportStatus; 7] = [
        ReportStatus::Ok, ReportStatus::ChangesDetected, ReportStatus::MajorErrors, ReportStatus::NoParsing,
        ReportStatus::NoMatchingEntries, ReportStatus::NoData, ReportStatus::NoTemplate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReportStatus::NoTemplate => "no_template",
            ReportStatus::NoParsing => "no_parsing",
            ReportStatus::NoMatchingEntries => "no_matching_entries",
            ReportStatus::NoData => "no_data",
            ReportStatus::Ok => "ok",
            ReportStatus::ChangesDetected => "changes_detected",
            ReportStatus::MajorErrors => "major_errors",
        }
    }
}

impl From<ParseStatus> for ReportStatus {
    fn from(p: ParseStatus) -> Self {
        match p {
            ParseStatus::NoTemplate => ReportStatus::NoTemplate,
            ParseStatus::NoParsing => ReportStatus::NoParsing,
            ParseStatus::NoMatchingEntries => ReportStatus::NoMatchingEntries,
            ParseStatus::NoData => ReportStatus::NoData,
            ParseStatus::Ok => ReportStatus::Ok,
        }
    }
}

impl fmt::Display for ParseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(ReportStatus::from(*self).as_str()) }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Classifies a template's table on one side. `None` means the builder never
/// produced a table for the template.
pub fn classify(entry: Option<&TemplateTable>, sentinels: &[String]) -> ParseStatus {
    let Some(entry) = entry else { return ParseStatus::NoTemplate };
    if !entry.table.is_empty() { return ParseStatus::Ok; }
    if entry.raw.is_empty() { return ParseStatus::NoData; }
    if sentinels.iter().any(|s| !s.is_empty() && entry.raw.contains(s.as_str())) { return ParseStatus::NoMatchingEntries; }
    ParseStatus::NoParsing
}

/// Parse failures on the post side dominate; then major errors, then changes.
pub fn report_status(post: ParseStatus, diff_rows: usize, major_rows: usize) -> ReportStatus {
    if post != ParseStatus::Ok { return post.into(); }
    if major_rows > 0 { return ReportStatus::MajorErrors; }
    if diff_rows > 0 { return ReportStatus::ChangesDetected; }
    ReportStatus::Ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Table;

    fn entry(rows: usize, raw: &str) -> TemplateTable {
        let mut table = Table::new(vec!["NAME".to_string(), "X".to_string()]);
        for i in 0..rows { table.push(vec!["R1".to_string(), i.to_string()]); }
        TemplateTable { name: "t".to_string(), command: "show x".to_string(), table, raw: raw.to_string(), matched: !raw.is_empty() || rows > 0 }
    }

    fn sentinels() -> Vec<String> { vec![DEFAULT_NO_ENTRIES.to_string()] }

    #[test]
    fn classification_is_total() {
        assert_eq!(classify(None, &sentinels()), ParseStatus::NoTemplate);
        assert_eq!(classify(Some(&entry(0, "")), &sentinels()), ParseStatus::NoData);
        assert_eq!(classify(Some(&entry(0, "No Matching Entries found")), &sentinels()), ParseStatus::NoMatchingEntries);
        assert_eq!(classify(Some(&entry(0, "no matching entries")), &sentinels()), ParseStatus::NoParsing);
        assert_eq!(classify(Some(&entry(0, "garbage")), &sentinels()), ParseStatus::NoParsing);
        assert_eq!(classify(Some(&entry(2, "")), &sentinels()), ParseStatus::Ok);
    }

    #[test]
    fn parse_failure_dominates() {
        assert_eq!(report_status(ParseStatus::NoParsing, 4, 2), ReportStatus::NoParsing);
        assert_eq!(report_status(ParseStatus::NoTemplate, 1, 0), ReportStatus::NoTemplate);
        assert_eq!(report_status(ParseStatus::Ok, 4, 2), ReportStatus::MajorErrors);
        assert_eq!(report_status(ParseStatus::Ok, 4, 0), ReportStatus::ChangesDetected);
        assert_eq!(report_status(ParseStatus::Ok, 0, 0), ReportStatus::Ok);
    }

    #[test]
    fn displays_snake_case() {
        assert_eq!(ParseStatus::NoMatchingEntries.to_string(), "no_matching_entries");
        assert_eq!(ReportStatus::ChangesDetected.to_string(), "changes_detected");
        assert_eq!(serde_json::to_string(&ReportStatus::MajorErrors).unwrap(), "\"major_errors\"");
    }
}
