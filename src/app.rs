use anyhow::Context as _;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub fn default_data_dir() -> anyhow::Result<PathBuf> {
    let proj = ProjectDirs::from("dev", "zengate", "ZenGate")
        .context("cannot locate the user data directory")?;
    Ok(proj.data_dir().to_path_buf())
}

pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("zengate.sqlite3")
}

pub fn models_path(data_dir: &Path) -> PathBuf {
    data_dir.join("models.json")
}
