pub mod vendor;

/// Scratch directory for a test; removed when dropped.
pub fn temp_root() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("catalog-test-")
        .tempdir()
        .unwrap_or_else(|err| panic!("failed to create temp dir: {err}"))
}
