use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

use crate::error::ConfigError;

/// Environment variable Houdini reads its path remapping table from.
pub const HOUDINI_PATHMAP_ENV_VAR: &str = "HOUDINI_PATHMAP";

/// One source to destination prefix rewrite. Extra fields carried by the
/// job's rule documents (path formats and the like) are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMappingRule {
    pub source_path: String,
    pub destination_path: String,
}

impl PathMappingRule {
    pub fn new(source_path: impl Into<String>, destination_path: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            destination_path: destination_path.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RulesDocument {
    Wrapped {
        path_mapping_rules: Vec<PathMappingRule>,
    },
    Bare(Vec<PathMappingRule>),
}

/// Parses rules given either as a JSON list or as an object with a
/// `path_mapping_rules` list.
pub fn parse_rules(json: &str) -> Result<Vec<PathMappingRule>, ConfigError> {
    let document: RulesDocument = serde_json::from_str(json).map_err(ConfigError::PathMapping)?;
    Ok(match document {
        RulesDocument::Wrapped { path_mapping_rules } => path_mapping_rules,
        RulesDocument::Bare(rules) => rules,
    })
}

/// Renders the rules as the dictionary literal Houdini expects in
/// `HOUDINI_PATHMAP`, e.g. `{'C:/projects': '/mnt/projects'}`.
///
/// Backslashes become forward slashes and a repeated source keeps its first
/// position but takes the last destination. Returns `None` without rules.
pub fn houdini_pathmap(rules: &[PathMappingRule]) -> Option<String> {
    let mut mapping: IndexMap<String, String> = IndexMap::new();
    for rule in rules {
        mapping.insert(
            rule.source_path.replace('\\', "/"),
            rule.destination_path.replace('\\', "/"),
        );
    }
    if mapping.is_empty() {
        return None;
    }

    let entries: Vec<String> = mapping
        .iter()
        .map(|(source, destination)| format!("{}: {}", quote(source), quote(destination)))
        .collect();
    Some(format!("{{{}}}", entries.join(", ")))
}

fn quote(value: &str) -> String {
    if value.contains('\'') && !value.contains('"') {
        format!("\"{value}\"")
    } else {
        format!("'{}'", value.replace('\'', "\\'"))
    }
}
