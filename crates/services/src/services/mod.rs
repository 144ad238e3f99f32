pub mod compression;
pub mod config;
pub mod export;
pub mod ingest;
pub mod placeholder;
pub mod storage;
pub mod url_mappings;
pub mod vision;
