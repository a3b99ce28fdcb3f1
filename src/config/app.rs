use std::path::PathBuf;

use tokio::sync::OnceCell;

static APP: OnceCell<AppConfig> = OnceCell::const_new();

const DEFAULT_SNAPSHOT: &str = "registry.json";

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// JSON declarations to compile instead of the built-in model.
    pub declarations: Option<PathBuf>,
    /// Where the compiled registry is written and read back from.
    pub snapshot: PathBuf,
    /// Tree to bind once the registry is ready.
    pub tree: Option<PathBuf>,
}

impl AppConfig {
    fn new() -> anyhow::Result<Self> {
        let declarations = optional_path("TREEBIND_DECLARATIONS")?;
        let tree = optional_path("TREEBIND_TREE")?;
        let snapshot = optional_path("TREEBIND_SNAPSHOT")?.unwrap_or_else(|| {
            tracing::debug!("`TREEBIND_SNAPSHOT` not set, defaulting to `{DEFAULT_SNAPSHOT}`");
            PathBuf::from(DEFAULT_SNAPSHOT)
        });

        Ok(AppConfig {
            declarations,
            snapshot,
            tree,
        })
    }

    pub async fn get() -> anyhow::Result<&'static AppConfig> {
        APP.get_or_try_init(async || AppConfig::new()).await
    }
}

fn optional_path(name: &str) -> anyhow::Result<Option<PathBuf>> {
    match std::env::var(name) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(PathBuf::from(value))),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(anyhow::anyhow!("cannot read `{name}`: {err:?}")),
    }
}
