use std::{
    path::Path,
    sync::{Mutex, MutexGuard, OnceLock},
};

use test_support::vendor::MockVendor;

const VENDOR_VARS: [&str; 8] = [
    "BAIDU_API_KEY",
    "BAIDU_SECRET_KEY",
    "BAIDU_API_BASE",
    "BAIDU_BOS_ENDPOINT",
    "BAIDU_BOS_BUCKET",
    "BAIDU_BOS_DOMAIN",
    "BAIDU_BOS_AK",
    "BAIDU_BOS_SK",
];

pub fn test_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

/// Points the process environment at a scratch asset dir and database, and
/// clears vendor settings so the host environment cannot leak into tests.
pub struct TestEnvGuard {
    _lock: MutexGuard<'static, ()>,
    previous: Vec<(&'static str, Option<String>)>,
}

impl TestEnvGuard {
    pub fn new(temp_root: &Path, db_url: String) -> Self {
        let lock = test_lock().lock().unwrap_or_else(|err| err.into_inner());
        let previous = ["DATABASE_URL", "CATALOG_ASSET_DIR"]
            .into_iter()
            .chain(VENDOR_VARS)
            .map(|name| (name, std::env::var(name).ok()))
            .collect();

        // SAFETY: tests using TestEnvGuard are serialized by test_lock.
        unsafe {
            std::env::set_var("CATALOG_ASSET_DIR", temp_root);
            std::env::set_var("DATABASE_URL", db_url);
            for name in VENDOR_VARS {
                std::env::remove_var(name);
            }
        }

        Self {
            _lock: lock,
            previous,
        }
    }

    /// Route the vision and storage clients to `vendor`.
    pub fn with_vendor(self, vendor: &MockVendor) -> Self {
        // SAFETY: tests using TestEnvGuard are serialized by test_lock.
        unsafe {
            for (name, value) in vendor.env() {
                std::env::set_var(name, value);
            }
        }
        self
    }
}

impl Drop for TestEnvGuard {
    fn drop(&mut self) {
        // SAFETY: tests using TestEnvGuard are serialized by test_lock.
        unsafe {
            for (name, value) in &self.previous {
                match value {
                    Some(value) => std::env::set_var(name, value),
                    None => std::env::remove_var(name),
                }
            }
        }
    }
}
