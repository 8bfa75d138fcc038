//! Definition document parsing
//!
//! Splits input into individual definition documents. YAML input is
//! `---`-separated multi-document (the canonical form); JSON input is a
//! top-level array or a concatenation of objects. Splitting never touches
//! the cluster.

use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{KdeclError, Result};

/// The format definition documents are authored in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionFormat {
    #[default]
    Yaml,
    Json,
}

impl DefinitionFormat {
    pub fn ext(&self) -> &'static str {
        match self {
            DefinitionFormat::Yaml => "yml",
            DefinitionFormat::Json => "json",
        }
    }
}

/// Read definition documents from a file.
pub fn from_file(path: &Path, format: DefinitionFormat) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| KdeclError::Io(std::io::Error::new(e.kind(), format!("{}: {e}", path.display()))))?;
    from_str(&content, format)
}

/// Read definition documents from stdin.
pub fn from_stdin(format: DefinitionFormat) -> Result<Vec<String>> {
    let mut content = String::new();
    std::io::stdin().read_to_string(&mut content)?;
    from_str(&content, format)
}

/// Split raw input into definition documents.
pub fn from_str(content: &str, format: DefinitionFormat) -> Result<Vec<String>> {
    match format {
        DefinitionFormat::Yaml => Ok(split_yaml_docs(content)),
        DefinitionFormat::Json => split_json_docs(content),
    }
}

fn split_yaml_docs(content: &str) -> Vec<String> {
    let mut docs = Vec::new();
    let mut current = String::new();
    for line in content.lines() {
        if line == "---" || line.starts_with("--- ") {
            push_doc(&mut docs, &mut current);
            // Content may follow the separator on the same line.
            if let Some(rest) = line.strip_prefix("--- ") {
                current.push_str(rest);
                current.push('\n');
            }
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    push_doc(&mut docs, &mut current);
    docs
}

fn push_doc(docs: &mut Vec<String>, current: &mut String) {
    if !current.trim().is_empty() {
        docs.push(std::mem::take(current));
    } else {
        current.clear();
    }
}

fn split_json_docs(content: &str) -> Result<Vec<String>> {
    let mut values: Vec<serde_json::Value> = Vec::new();
    let stream = serde_json::Deserializer::from_str(content).into_iter::<serde_json::Value>();
    for value in stream {
        values.push(value?);
    }

    // A single top-level array holds one definition per element.
    if values.len() == 1 {
        if let serde_json::Value::Array(items) = &values[0] {
            return items
                .iter()
                .map(|v| Ok(serde_json::to_string_pretty(v)?))
                .collect();
        }
    }
    values
        .iter()
        .map(|v| Ok(serde_json::to_string_pretty(v)?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_yaml_multi_doc() {
        let content = "---\napiVersion: v1\nkind: topic\n---\napiVersion: v1\nkind: acl\n";
        let docs = from_str(content, DefinitionFormat::Yaml).unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs[0].contains("kind: topic"));
        assert!(docs[1].contains("kind: acl"));
    }

    #[test]
    fn single_yaml_doc_without_separator() {
        let docs = from_str("apiVersion: v1\nkind: topic\n", DefinitionFormat::Yaml).unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn empty_yaml_docs_are_dropped() {
        let docs = from_str("---\n---\nkind: topic\n---\n", DefinitionFormat::Yaml).unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn splits_json_array() {
        let content = r#"[{"kind": "topic"}, {"kind": "acl"}]"#;
        let docs = from_str(content, DefinitionFormat::Json).unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs[0].contains("topic"));
    }

    #[test]
    fn splits_concatenated_json_objects() {
        let content = "{\"kind\": \"topic\"}\n{\"kind\": \"acl\"}";
        let docs = from_str(content, DefinitionFormat::Json).unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(from_str("{\"kind\": ", DefinitionFormat::Json).is_err());
    }
}
