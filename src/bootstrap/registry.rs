use anyhow::Context;
use treebind_core::{Configured, Registry};

use crate::app::model::Domain;
use crate::config::AppConfig;
use crate::snapshot;

/// Build or load the registry, publish it, then bind the configured tree.
pub async fn init_binding() -> anyhow::Result<()> {
    let config = AppConfig::get().await?;

    let registry = load_registry(config).await?;
    tracing::info!(descriptors = registry.len(), "registry ready");

    let registry = treebind_core::registry::install(registry)
        .map_err(|_| anyhow::anyhow!("a registry is already installed"))?;

    let Some(path) = &config.tree else {
        tracing::info!("`TREEBIND_TREE` not set, nothing to bind");
        return Ok(());
    };

    let tree = snapshot::read_tree(path)
        .await
        .with_context(|| format!("cannot read tree `{}`", path.display()))?;
    let bound = registry.bind(&tree)?;
    println!("{}", serde_json::to_string_pretty(&bound)?);

    // Only a registry holding the built-in model converts into `Domain`.
    let builtin = treebind_core::compile(&Domain::declaration()).ok();
    if bound.target() == Domain::TARGET && Domain::descriptor(registry) == builtin.as_ref() {
        let domain: Domain = registry.bind_as(&tree)?;
        domain.summarize();
    }

    Ok(())
}

async fn load_registry(config: &AppConfig) -> anyhow::Result<Registry> {
    if let Some(path) = &config.declarations {
        let registry = snapshot::read_declarations(path)
            .await
            .with_context(|| format!("cannot read declarations `{}`", path.display()))?
            .compile()?;
        snapshot::write_snapshot(&registry, &config.snapshot)
            .await
            .with_context(|| format!("cannot write snapshot `{}`", config.snapshot.display()))?;
        tracing::info!(snapshot = %config.snapshot.display(), "compiled declarations");
        return Ok(registry);
    }

    if let Some(registry) = snapshot::read_snapshot(&config.snapshot)
        .await
        .with_context(|| format!("cannot restore snapshot `{}`", config.snapshot.display()))?
    {
        tracing::info!(snapshot = %config.snapshot.display(), "restored registry");
        return Ok(registry);
    }

    tracing::info!("registering the built-in domain model");
    let mut builder = Registry::builder();
    builder.register_tree::<Domain>()?;
    Ok(builder.build()?)
}
