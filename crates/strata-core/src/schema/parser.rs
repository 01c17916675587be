//! TOML schema parser with helpful error messages

use std::path::Path;

use super::{Schema, SchemaDocument};
use crate::error::{Result, StrataError};
use crate::merge::strategy::StrategyRegistry;

/// Parse and validate a schema file.
pub fn parse_schema_toml(path: &Path, strategies: &StrategyRegistry) -> Result<Schema> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        StrataError::Schema(format!("{}: failed to read schema file: {e}", path.display()))
    })?;
    parse_schema_toml_str(&content, strategies).map_err(|e| match e {
        StrataError::Schema(msg) => {
            StrataError::Schema(format!("{}: {msg}", path.display()))
        }
        other => other,
    })
}

/// Parse and validate schema content from a string.
pub fn parse_schema_toml_str(content: &str, strategies: &StrategyRegistry) -> Result<Schema> {
    let document: SchemaDocument =
        toml::from_str(content).map_err(|e| enhance_toml_error(e, content))?;
    let schema = document.into_schema()?;
    schema.validate(strategies)?;
    Ok(schema)
}

/// Attach the offending lines to a TOML parse error.
pub(crate) fn enhance_toml_error(error: toml::de::Error, content: &str) -> StrataError {
    StrataError::Schema(describe_toml_error(&error, content))
}

/// Human-readable TOML error with the surrounding lines marked.
pub(crate) fn describe_toml_error(error: &toml::de::Error, content: &str) -> String {
    let message = error.message();
    match error.span() {
        Some(span) => {
            let line_num = content[..span.start.min(content.len())]
                .matches('\n')
                .count()
                + 1;
            format!(
                "TOML parsing error at line {}:\n{}\n\nError: {}",
                line_num,
                get_line_context(content, line_num),
                message
            )
        }
        None => format!("TOML parsing error: {message}"),
    }
}

/// Get context lines around an error
fn get_line_context(content: &str, line_num: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let line_num = line_num.clamp(1, lines.len().max(1));
    let start = line_num.saturating_sub(2);
    let end = (line_num + 2).min(lines.len());

    lines[start.min(end)..end]
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let num = start + i + 1;
            let marker = if num == line_num { ">>>" } else { "   " };
            format!("{} {:4} | {}", marker, num, line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;
    use crate::schema::{EntryPolicy, ItemKind, ItemMerge, StalePolicy, ValueMerge};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SCHEMA: &str = r#"
[types.Server]
identity = "host"

[types.Server.properties.host]
kind = "simple"
type = "string"

[types.Server.properties.port]
kind = "simple"
type = "u16"
merge = "max-int"

[types.App]
default_scopes = ["global"]

[types.App.properties.name]
kind = "simple"
type = "string"
stale = "use-parent"

[types.App.properties.servers]
kind = "set"
item = "complex"
type = "Server"
entry_removed = "add"
item_merge = "merge"

[types.App.properties.db]
kind = "complex"
type = "Db"
reference = { target = "Db", instance = "main" }

[types.Db]

[types.Db.properties.url]
kind = "simple"
type = "string"
"#;

    #[test]
    fn test_parse_valid_schema() {
        let schema = parse_schema_toml_str(SCHEMA, &StrategyRegistry::with_builtins()).unwrap();
        let app = schema.get("App").unwrap();
        assert_eq!(app.default_path().unwrap().to_string(), "class[name=App]/default/global");

        let name = app.get("name").unwrap();
        assert_eq!(name.policy.stale, StalePolicy::UseParent);

        let servers = app.get("servers").unwrap();
        assert_eq!(servers.kind, NodeKind::Set);
        assert_eq!(servers.item_kind, ItemKind::Complex);
        assert_eq!(servers.policy.entry_added, EntryPolicy::Add);
        assert_eq!(servers.policy.entry_removed, EntryPolicy::Add);
        assert_eq!(servers.policy.item, ItemMerge::Merge);

        let port = schema.get("Server").unwrap().get("port").unwrap();
        assert_eq!(port.policy.value, ValueMerge::Strategy("max-int".to_string()));

        let db = app.get("db").unwrap();
        assert_eq!(db.reference.as_ref().unwrap().instance.as_deref(), Some("main"));
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let toml = r#"
[types.App.properties.tags]
kind = "set"
type = "string"
entry_added = "sometimes"
"#;
        let err = parse_schema_toml_str(toml, &StrategyRegistry::new()).unwrap_err();
        assert!(matches!(err, StrataError::InvalidMergeConfiguration(_)));
    }

    #[test]
    fn test_merge_field_on_set_rejected() {
        let toml = r#"
[types.App.properties.tags]
kind = "set"
type = "string"
merge = "use-child"
"#;
        let err = parse_schema_toml_str(toml, &StrategyRegistry::new()).unwrap_err();
        assert!(err.to_string().contains("entry_added"));
    }

    #[test]
    fn test_syntax_error_has_line_context() {
        let toml = "[types.App]\nidentity = \n";
        let err = parse_schema_toml_str(toml, &StrategyRegistry::new()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("TOML parsing error at line"), "{msg}");
        assert!(msg.contains(">>>"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let toml = "[types.App]\ncolour = \"blue\"\n";
        assert!(parse_schema_toml_str(toml, &StrategyRegistry::new()).is_err());
    }

    #[test]
    fn test_missing_file_names_the_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("missing-schema.toml");
        let err = parse_schema_toml(&path, &StrategyRegistry::new()).unwrap_err();
        assert!(matches!(err, StrataError::Schema(_)));
        assert!(err.to_string().contains("missing-schema.toml"), "{err}");
    }

    #[test]
    fn test_parse_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SCHEMA.as_bytes()).unwrap();
        let schema = parse_schema_toml(file.path(), &StrategyRegistry::with_builtins()).unwrap();
        assert_eq!(schema.types().count(), 3);
    }
}
