//! Small string helpers shared by object keys, archive entries and short ids.

use std::sync::LazyLock;

use chrono::Utc;
use rand::Rng;
use regex::Regex;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

static OBJECT_NAME_UNSAFE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_.-]").expect("static regex"));
static ARCHIVE_NAME_UNSAFE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\/:*?"<>|\s]"#).expect("static regex"));

/// Replace anything outside `[A-Za-z0-9_.-]` with `_`.
pub fn sanitize_object_name(name: &str) -> String {
    OBJECT_NAME_UNSAFE.replace_all(name, "_").into_owned()
}

/// Replace characters that are invalid in archive/file-system names, plus whitespace, with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    ARCHIVE_NAME_UNSAFE.replace_all(name, "_").into_owned()
}

pub fn random_base36(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect()
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// First `max_chars` characters, counted as chars rather than bytes.
pub fn truncate_chars(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}
