//! SVG shown in place of a search hit whose image cannot be fetched.

use utils_core::text::truncate_chars;

pub const CONTENT_TYPE: &str = "image/svg+xml";
pub const CACHE_CONTROL: &str = "public, max-age=86400";

const SIGNATURE_PREVIEW_CHARS: usize = 20;

fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Similarity as a whole percentage. Non-finite scores render as 0%.
fn score_percent(score: f64) -> i64 {
    if score.is_finite() {
        (score * 100.0).round() as i64
    } else {
        0
    }
}

pub fn render_placeholder_svg(cont_sign: Option<&str>, score: f64) -> String {
    let signature = match cont_sign.map(str::trim).filter(|s| !s.is_empty()) {
        Some(sign) => format!("{}...", truncate_chars(sign, SIGNATURE_PREVIEW_CHARS)),
        None => "no signature".to_string(),
    };

    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="300" height="200" viewBox="0 0 300 200">
  <rect width="100%" height="100%" fill="#f0f0f0" />
  <text x="150" y="80" font-family="Arial" font-size="14" text-anchor="middle" fill="#888">Image unavailable</text>
  <text x="150" y="100" font-family="Arial" font-size="12" text-anchor="middle" fill="#888">Similarity: {}%</text>
  <text x="150" y="120" font-family="Arial" font-size="10" text-anchor="middle" fill="#888">{}</text>
</svg>
"##,
        score_percent(score),
        escape_xml(&signature)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_score_and_truncated_signature() {
        let svg = render_placeholder_svg(Some("1234567890,abcdefghijklmnop"), 0.876);
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("Similarity: 88%"));
        assert!(svg.contains(">1234567890,abcdefghi...<"));
    }

    #[test]
    fn missing_signature_and_bad_score() {
        let svg = render_placeholder_svg(None, f64::NAN);
        assert!(svg.contains("no signature"));
        assert!(svg.contains("Similarity: 0%"));
    }

    #[test]
    fn text_is_escaped() {
        let svg = render_placeholder_svg(Some("<script>&"), 1.0);
        assert!(svg.contains("&lt;script&gt;&amp;..."));
        assert!(!svg.contains("<script>"));
    }
}
