use std::path::PathBuf;

use directories::ProjectDirs;

const PROJECT_ROOT: &str = env!("CARGO_MANIFEST_DIR");
const ASSET_DIR_ENV: &str = "CATALOG_ASSET_DIR";

fn ensure_dir(path: PathBuf) -> PathBuf {
    if !path.exists()
        && let Err(err) = std::fs::create_dir_all(&path)
    {
        tracing::warn!(path = %path.display(), error = %err, "Failed to create asset directory");
    }
    path
}

pub fn asset_dir() -> PathBuf {
    if let Ok(override_dir) = std::env::var(ASSET_DIR_ENV) {
        let override_dir = override_dir.trim();
        if !override_dir.is_empty() {
            return ensure_dir(PathBuf::from(override_dir));
        }
    }

    let path = if cfg!(debug_assertions) {
        PathBuf::from(PROJECT_ROOT).join("../../dev_assets")
    } else {
        match ProjectDirs::from("com", "catalog", "product-catalog") {
            Some(dirs) => dirs.data_dir().to_path_buf(),
            None => {
                tracing::warn!("No home directory available, using ./catalog-data");
                PathBuf::from("catalog-data")
            }
        }
    };

    ensure_dir(path)
}

pub fn config_path() -> PathBuf {
    asset_dir().join("config.json")
}

pub fn database_path() -> PathBuf {
    asset_dir().join("db.sqlite")
}
