//! Title derivation and relevance filtering for sitemap-only entries.

/// Words that are always rendered upper-case.
const ACRONYMS: &[&str] = &["ai", "ml", "api", "aws", "iam", "ec2", "s3", "vpc", "euc", "vdi"];

/// Build a display title from the last path segment of `url`.
///
/// `getting-started-with-appstream-2-0` becomes
/// `Getting Started With AppStream 2.0`.
pub fn title_from_slug(url: &str) -> String {
    let slug = url.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    let words: Vec<&str> = slug.split('-').collect();

    let mut out: Vec<String> = Vec::with_capacity(words.len());
    let mut i = 0;
    while i < words.len() {
        let word = words[i];
        let lower = word.to_lowercase();

        if word.is_empty() {
            // skip
        } else if word.len() <= 4 && word.chars().any(char::is_alphabetic) && word == word.to_uppercase() {
            out.push(word.to_string());
        } else if ACRONYMS.contains(&lower.as_str()) {
            out.push(word.to_uppercase());
        } else if lower == "appstream" {
            out.push("AppStream".into());
        } else if lower == "workspaces" {
            out.push("WorkSpaces".into());
        } else if lower == "daas" {
            out.push("DaaS".into());
        } else if word.chars().all(|c| c.is_ascii_digit()) && words.get(i + 1) == Some(&"0") {
            out.push(format!("{word}.0"));
            i += 1;
        } else {
            out.push(capitalize(&lower));
        }
        i += 1;
    }

    out.join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Whether `url` or `title` mentions any of `keywords` (case-insensitive).
pub fn is_relevant(url: &str, title: &str, keywords: &[String]) -> bool {
    let text = format!("{url} {title}").to_lowercase();
    keywords
        .iter()
        .any(|keyword| text.contains(&keyword.to_lowercase()))
}
