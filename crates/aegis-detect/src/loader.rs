//! Rule-file and classification-file loading (§6).

use std::collections::HashMap;
use std::path::Path;

use tracing::warn;

use crate::error::ParseError;
use crate::parser::RuleParser;
use crate::sig::Signature;

#[derive(Debug, Default)]
pub struct LoadSummary {
    pub loaded: usize,
    pub failed: usize,
    pub errors: Vec<(usize, ParseError)>,
}

/// Load every rule in `content`, joining `\`-continued lines and skipping
/// `#` comments. A malformed rule is recorded in the summary and skipped
/// unless `failure_fatal` promotes the first failure into an abort.
pub fn load_rules(content: &str, failure_fatal: bool) -> Result<(Vec<Signature>, LoadSummary), ParseError> {
    let mut parser = RuleParser::new();
    let mut signatures = Vec::new();
    let mut summary = LoadSummary::default();

    let mut buffer = String::new();
    let mut start_line = 0usize;

    for (line_no, raw_line) in content.lines().enumerate() {
        let trimmed = raw_line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if buffer.is_empty() {
            start_line = line_no + 1;
        }
        if let Some(cont) = trimmed.strip_suffix('\\') {
            buffer.push_str(cont);
            continue;
        }
        buffer.push_str(trimmed);
        let rule_line = std::mem::take(&mut buffer);

        match parser.parse_rule(&rule_line) {
            Ok(sig) => {
                signatures.push(sig);
                summary.loaded += 1;
            }
            Err(e) => {
                if failure_fatal {
                    return Err(e);
                }
                warn!(line = start_line, error = %e, "rejecting malformed rule");
                summary.failed += 1;
                summary.errors.push((start_line, e));
            }
        }
    }

    Ok((signatures, summary))
}

pub fn load_rule_file(path: &Path, failure_fatal: bool) -> std::io::Result<(Vec<Signature>, LoadSummary)> {
    let content = std::fs::read_to_string(path)?;
    load_rules(&content, failure_fatal)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
}

/// One `classtype,short_desc,priority` entry from a classification file.
#[derive(Clone, Debug)]
pub struct ClassEntry {
    pub short_desc: String,
    pub priority: u8,
}

pub fn load_classification_file(content: &str) -> HashMap<String, ClassEntry> {
    let mut table = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(rest) = line.strip_prefix("config classification:") else { continue };
        let parts: Vec<&str> = rest.splitn(3, ',').map(|p| p.trim()).collect();
        if parts.len() != 3 {
            continue;
        }
        if let Ok(priority) = parts[2].parse::<u8>() {
            table.insert(parts[0].to_string(), ClassEntry { short_desc: parts[1].to_string(), priority });
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_continuation_joins_across_backslash() {
        let rules = "alert tcp any any -> any 80 \\\n(msg:\"joined\"; content:\"GET\"; sid:1; rev:1;)\n";
        let (sigs, summary) = load_rules(rules, false).unwrap();
        assert_eq!(sigs.len(), 1);
        assert_eq!(summary.loaded, 1);
        assert_eq!(summary.failed, 0);
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let rules = "# a comment\n\nalert tcp any any -> any 80 (msg:\"m\"; content:\"GET\"; sid:1; rev:1;)\n";
        let (sigs, _) = load_rules(rules, false).unwrap();
        assert_eq!(sigs.len(), 1);
    }

    #[test]
    fn one_bad_rule_does_not_abort_the_rest_unless_failure_fatal() {
        let rules = "alert tcp any any -> any 80 (msg:\"bad\"\n\
                     alert tcp any any -> any 80 (msg:\"good\"; content:\"GET\"; sid:2; rev:1;)\n";
        let (sigs, summary) = load_rules(rules, false).unwrap();
        assert_eq!(sigs.len(), 1);
        assert_eq!(summary.failed, 1);

        let err = load_rules(rules, true).unwrap_err();
        assert!(matches!(err, ParseError::MissingOptions));
    }

    #[test]
    fn classification_file_parses_priority() {
        let content = "config classification: bad-unknown,Potentially Bad Traffic,2\n";
        let table = load_classification_file(content);
        let entry = table.get("bad-unknown").unwrap();
        assert_eq!(entry.priority, 2);
    }
}
