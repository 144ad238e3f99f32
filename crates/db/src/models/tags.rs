//! Tags are stored as a JSON array in a text column.

pub(crate) fn decode(raw: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(tags) => tags,
        Err(err) => {
            tracing::warn!(error = %err, raw, "Ignoring malformed tag column");
            Vec::new()
        }
    }
}

pub(crate) fn encode(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

/// Trim, drop blanks, and de-duplicate while keeping first-seen order.
pub fn normalize<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if !tag.is_empty() && !out.iter().any(|existing| existing == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

pub(crate) fn with_tag(mut tags: Vec<String>, tag: &str) -> Vec<String> {
    tags.push(tag.to_string());
    normalize(tags)
}

pub(crate) fn without_tag(tags: Vec<String>, tag: &str) -> Vec<String> {
    let tag = tag.trim();
    tags.into_iter().filter(|existing| existing != tag).collect()
}
