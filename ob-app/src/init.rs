//! `observer init`: scaffold `~/.observer/` without touching existing files.

use anyhow::Result;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct InitReport {
    pub root: PathBuf,
    pub created: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

const CONFIG_TEMPLATE: &str = include_str!("../../config-templates/config.toml");

/// Directories the server writes into, relative to the config root.
const DATA_DIRS: &[&str] = &["data", "data/knowledge"];

pub async fn initialize_default() -> Result<InitReport> {
    let config_path = crate::config::default_config_path();
    let root = config_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid default config path: {}", config_path.display()))?
        .to_path_buf();
    initialize_at_root(&root).await
}

pub async fn initialize_at_root(root: &Path) -> Result<InitReport> {
    tokio::fs::create_dir_all(root)
        .await
        .map_err(|e| anyhow::anyhow!("create config root {}: {e}", root.display()))?;

    let mut report = InitReport {
        root: root.to_path_buf(),
        created: Vec::new(),
        skipped: Vec::new(),
    };

    let config = root.join("config.toml");
    match tokio::fs::metadata(&config).await {
        Ok(_) => report.skipped.push(config),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::write(&config, CONFIG_TEMPLATE)
                .await
                .map_err(|e| anyhow::anyhow!("write config template {}: {e}", config.display()))?;
            report.created.push(config);
        }
        Err(err) => {
            return Err(anyhow::anyhow!(
                "inspect config path {}: {err}",
                config.display()
            ));
        }
    }

    for dir in DATA_DIRS {
        let target = root.join(dir);
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            continue;
        }
        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|e| anyhow::anyhow!("create data dir {}: {e}", target.display()))?;
        report.created.push(target);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::{DATA_DIRS, initialize_at_root};
    use std::path::PathBuf;
    use uuid::Uuid;

    fn temp_root(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("observer-init-{name}-{}", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn init_writes_config_and_data_dirs() {
        let root = temp_root("create");
        let report = initialize_at_root(&root).await.expect("init succeeds");

        assert_eq!(report.created.len(), 1 + DATA_DIRS.len());
        assert!(report.skipped.is_empty());
        let written = std::fs::read_to_string(root.join("config.toml")).expect("config");
        assert!(written.contains("[general]"));
        assert!(root.join("data/knowledge").is_dir());

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn init_is_idempotent_and_never_overwrites() {
        let root = temp_root("idempotent");
        initialize_at_root(&root)
            .await
            .expect("first init succeeds");
        std::fs::write(root.join("config.toml"), "# edited\n").expect("edit");

        let second = initialize_at_root(&root)
            .await
            .expect("second init succeeds");
        assert!(
            second.created.is_empty(),
            "second run should not create files"
        );
        assert_eq!(second.skipped.len(), 1);
        let kept = std::fs::read_to_string(root.join("config.toml")).expect("config");
        assert_eq!(kept, "# edited\n");

        let _ = std::fs::remove_dir_all(root);
    }
}
