use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use treebind_core::{Declaration, EnumDeclaration, Node, Registry, RegistrySnapshot};

/// Declarations file read through `TREEBIND_DECLARATIONS`:
///
/// ```json
/// {
///   "enums": {"Level": ["debug", "info"]},
///   "declarations": [
///     {"element": "widget", "metadata": "target=Widget,@name=optional,key=@name"},
///     {"element": "panel", "rules": ["target=Panel", "<widget>=collection:Widget"]}
///   ]
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct DeclarationFile {
    #[serde(default)]
    pub enums: IndexMap<String, Vec<String>>,
    pub declarations: Vec<DeclarationEntry>,
}

#[derive(Debug, Deserialize)]
pub struct DeclarationEntry {
    pub element: String,
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(default)]
    pub metadata: Option<String>,
}

impl DeclarationEntry {
    fn into_declaration(self) -> Declaration {
        let mut declaration = match &self.metadata {
            Some(metadata) => Declaration::from_metadata(self.element, metadata),
            None => Declaration::new(self.element, Vec::<String>::new()),
        };
        declaration.rules.extend(self.rules);
        declaration
    }
}

impl DeclarationFile {
    /// Compile strictly; every problem in the file is reported together.
    pub fn compile(self) -> anyhow::Result<Registry> {
        let mut builder = Registry::builder();
        let mut errors = Vec::new();

        for (name, variants) in self.enums {
            if let Err(err) = builder.declare_enum(EnumDeclaration { name, variants }) {
                errors.push(err.to_string());
            }
        }
        for entry in self.declarations {
            if let Err(err) = builder.declare(&entry.into_declaration()) {
                errors.push(err.to_string());
            }
        }
        if !errors.is_empty() {
            anyhow::bail!("{} declaration error(s):\n  - {}", errors.len(), errors.join("\n  - "));
        }

        Ok(builder.build()?)
    }
}

pub async fn read_declarations(path: &Path) -> anyhow::Result<DeclarationFile> {
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw)?)
}

pub async fn read_tree(path: &Path) -> anyhow::Result<Node> {
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw)?)
}

pub async fn write_snapshot(registry: &Registry, path: &Path) -> anyhow::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .await?;

    let snapshot = registry.snapshot().to_json()?;

    file.write_all(snapshot.as_bytes()).await?;
    file.flush().await?;

    Ok(())
}

/// Restore a registry written by [`write_snapshot`]; `None` when there is no file.
pub async fn read_snapshot(path: &Path) -> anyhow::Result<Option<Registry>> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let snapshot = RegistrySnapshot::from_json(&raw)?;
    Ok(Some(snapshot.restore()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DECLARATIONS: &str = r#"{
        "declarations": [
            {"element": "widget", "metadata": "target=Widget,@name=optional,@name=datatype:String,key=@name,keyed-as=Widget,<widget>=Widget"}
        ]
    }"#;

    #[tokio::test]
    async fn declarations_compile_and_snapshot_round_trips() {
        let file: DeclarationFile = serde_json::from_str(DECLARATIONS).unwrap();
        let registry = file.compile().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        write_snapshot(&registry, &path).await.unwrap();

        let restored = read_snapshot(&path).await.unwrap().unwrap();
        assert_eq!(restored.get("widget"), registry.get("widget"));
    }

    #[tokio::test]
    async fn missing_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_snapshot(&dir.path().join("absent.json")).await.unwrap().is_none());
    }

    #[test]
    fn rules_and_metadata_combine() {
        let entry = DeclarationEntry {
            element: "a".into(),
            rules: vec!["<*>=ignore".into()],
            metadata: Some("target=A, @x=optional".into()),
        };
        assert_eq!(
            entry.into_declaration().rules,
            ["target=A", "@x=optional", "<*>=ignore"]
        );
    }

    #[test]
    fn every_error_is_reported() {
        let file: DeclarationFile = serde_json::from_str(
            r#"{"declarations": [{"element": "a", "rules": []}, {"element": "b", "rules": ["nonsense"]}]}"#,
        )
        .unwrap();
        let err = file.compile().unwrap_err().to_string();
        assert!(err.starts_with("2 declaration error(s)"), "{err}");
    }
}
