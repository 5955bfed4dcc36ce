use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::types::Candidate;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Result markup did not match the expected structure: {0}")]
    UnexpectedMarkup(String),
}

static RE_PROFILE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"instagram\.com/([A-Za-z0-9_.]+)").expect("invalid regex: profile url")
});
static RE_USERNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_.]{1,30}$").expect("invalid regex: username"));
static RE_AT_MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@([A-Za-z0-9_.]{1,30})").expect("invalid regex: at mention")
});
static RE_TITLE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)\s*\(@[A-Za-z0-9_.]+\)").expect("invalid regex: title name")
});

/// Instagram paths that look like usernames but are site navigation.
const SYSTEM_PAGES: &[&str] = &[
    "explore", "about", "developer", "legal", "directory", "p", "reels", "stories", "tv", "reel",
    "story", "highlights", "direct", "accounts", "challenge", "emails", "press", "contact", "tags",
    "locations",
];

const SNIPPET_MAX_CHARS: usize = 250;

fn elem_text(element: ElementRef) -> String {
    element.text().collect::<String>()
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extracts Instagram profile candidates from a search results page.
///
/// Result anchors are matched by URL shape rather than by the provider's
/// markup classes, which change without notice. A page with no anchors at
/// all is treated as a markup mismatch; a page with anchors but no
/// Instagram links is simply zero candidates.
pub fn parse_serp(html: &str) -> Result<Vec<Candidate>, ParseError> {
    let document = Html::parse_document(html);
    let anchor_selector = Selector::parse("a[href]").unwrap();
    let heading_selector = Selector::parse("h3").unwrap();

    let mut seen: HashSet<String> = HashSet::new();
    let mut candidates = Vec::new();
    let mut anchor_count = 0usize;

    for element in document.select(&anchor_selector) {
        anchor_count += 1;

        let href = element.value().attr("href").unwrap_or("");
        let Some(target) = unwrap_redirect(href) else {
            continue;
        };
        if !target.contains("instagram.com/") {
            continue;
        }
        let Some(username) = extract_username(&target) else {
            continue;
        };
        if !seen.insert(username.clone()) {
            continue;
        }

        let title = element
            .select(&heading_selector)
            .next()
            .map(|h| normalize_whitespace(&elem_text(h)))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| normalize_whitespace(&elem_text(element)));

        candidates.push(Candidate {
            display_name: clean_display_name(&title, &username),
            url: profile_url(&username),
            snippet: snippet_for(element),
            username,
        });
    }

    // Some result layouts only surface the handle in a heading, e.g.
    // "Jane Doe (@janedoe) • Instagram photos and videos".
    for heading in document.select(&heading_selector) {
        let text = normalize_whitespace(&elem_text(heading));
        if !text.to_lowercase().contains("instagram") {
            continue;
        }
        for caps in RE_AT_MENTION.captures_iter(&text) {
            let username = caps[1].to_lowercase();
            if !valid_username(&username) || !seen.insert(username.clone()) {
                continue;
            }
            candidates.push(Candidate {
                display_name: clean_display_name(&text, &username),
                url: profile_url(&username),
                snippet: None,
                username,
            });
        }
    }

    if anchor_count == 0 {
        return Err(ParseError::UnexpectedMarkup(
            "no anchors found in result page".to_string(),
        ));
    }

    Ok(candidates)
}

/// Unwraps Google's `/url?q=<target>&...` redirect links and drops
/// navigation links back into the search engine itself.
fn unwrap_redirect(href: &str) -> Option<String> {
    if let Some(rest) = href.strip_prefix("/url?") {
        let target = rest
            .split('&')
            .find_map(|pair| pair.strip_prefix("q="))?;
        return Some(percent_decode(target));
    }
    if href.starts_with('#') || href.starts_with("/search") {
        return None;
    }
    if href.contains("google.com") {
        return None;
    }
    Some(href.to_string())
}

/// Percent-decodes any `%XX` escape, either hex case. Malformed escapes
/// pass through untouched.
fn percent_decode(target: &str) -> String {
    let bytes = target.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2]))
        {
            out.push(hi * 16 + lo);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    (byte as char).to_digit(16).map(|v| v as u8)
}

fn extract_username(url: &str) -> Option<String> {
    let base = url.split('?').next().unwrap_or(url).trim_end_matches('/');
    let username = RE_PROFILE_URL.captures(base)?[1].to_lowercase();
    valid_username(&username).then_some(username)
}

fn valid_username(username: &str) -> bool {
    RE_USERNAME.is_match(username) && !SYSTEM_PAGES.contains(&username)
}

fn profile_url(username: &str) -> String {
    format!("https://www.instagram.com/{username}/")
}

/// Recovers the profile's display name from a result title like
/// "Jane Doe (@janedoe) • Instagram photos and videos".
fn clean_display_name(title: &str, username: &str) -> String {
    if let Some(caps) = RE_TITLE_NAME.captures(title) {
        let name = caps[1].trim();
        if !name.is_empty() {
            return name.to_string();
        }
    }

    let mut name = title;
    for separator in [" • ", " - ", " | ", " on Instagram"] {
        if let Some((head, _)) = name.split_once(separator) {
            name = head;
        }
    }
    let name = name.trim();
    if name.is_empty() {
        username.to_string()
    } else {
        name.to_string()
    }
}

/// Walks up to the nearest block element and uses its text as the result
/// snippet, the way the surrounding description sits next to the link.
fn snippet_for(element: ElementRef) -> Option<String> {
    let title = normalize_whitespace(&elem_text(element));
    let mut node = element.parent()?;
    loop {
        if let Some(block) = ElementRef::wrap(node) {
            let tag = block.value().name();
            if tag == "div" || tag == "span" || tag == "p" {
                let text = normalize_whitespace(&elem_text(block));
                if !text.is_empty() && text != title {
                    return Some(text.chars().take(SNIPPET_MAX_CHARS).collect());
                }
            }
        }
        node = node.parent()?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_redirect_wrapped_profile_link() {
        let html = r#"
            <div id="search">
                <div class="g">
                    <a href="/url?q=https%3A%2F%2Fwww.instagram.com%2Fjanedoe%2F&sa=U&ved=xyz">
                        <h3>Jane Doe (@janedoe) • Instagram photos and videos</h3>
                    </a>
                    <span>Jane Doe. Photographer in Austin, TX. 1,240 followers.</span>
                </div>
            </div>
        "#;

        let candidates = parse_serp(html).expect("Failed to parse");

        assert_eq!(candidates.len(), 1);
        let candidate = &candidates[0];
        assert_eq!(candidate.username, "janedoe");
        assert_eq!(candidate.display_name, "Jane Doe");
        assert_eq!(candidate.url, "https://www.instagram.com/janedoe/");
        let snippet = candidate.snippet.as_deref().expect("Should have snippet");
        assert!(snippet.contains("Photographer in Austin"));
    }

    #[test]
    fn test_parse_direct_profile_link() {
        let html = r#"
            <div><a href="https://www.instagram.com/john.smith/?hl=en">
                <h3>John Smith (@john.smith) • Instagram</h3>
            </a></div>
        "#;

        let candidates = parse_serp(html).expect("Failed to parse");

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].username, "john.smith");
        assert_eq!(candidates[0].display_name, "John Smith");
    }

    #[test]
    fn test_system_pages_are_excluded() {
        let html = r#"
            <div>
                <a href="https://www.instagram.com/explore/tags/austin/">explore</a>
                <a href="https://www.instagram.com/p/Cxyz123/">a post</a>
                <a href="https://www.instagram.com/accounts/login/">login</a>
            </div>
        "#;

        let candidates = parse_serp(html).expect("Failed to parse");
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_duplicate_usernames_keep_first_occurrence() {
        let html = r#"
            <div>
                <a href="https://www.instagram.com/janedoe/"><h3>Jane Doe (@janedoe) • Instagram</h3></a>
                <a href="https://instagram.com/janedoe/reels/"><h3>Jane Doe reels</h3></a>
            </div>
        "#;

        let candidates = parse_serp(html).expect("Failed to parse");

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].display_name, "Jane Doe");
    }

    #[test]
    fn test_invalid_usernames_are_skipped() {
        let html = r#"
            <div>
                <a href="https://www.instagram.com/this_username_is_way_too_long_to_be_valid_here/">x</a>
                <a href="https://www.google.com/maps/instagram.com/janedoe">maps</a>
            </div>
        "#;

        let candidates = parse_serp(html).expect("Failed to parse");
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_heading_mention_fallback() {
        let html = r#"
            <div>
                <a href="https://example.com/article">article</a>
                <h3>Best photographers on Instagram: @jane_shoots and @doephoto</h3>
            </div>
        "#;

        let candidates = parse_serp(html).expect("Failed to parse");

        let usernames: Vec<&str> = candidates.iter().map(|c| c.username.as_str()).collect();
        assert_eq!(usernames, vec!["jane_shoots", "doephoto"]);
    }

    #[test]
    fn test_display_name_falls_back_to_username() {
        let html = r#"<div><a href="https://www.instagram.com/janedoe/"></a></div>"#;

        let candidates = parse_serp(html).expect("Failed to parse");

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].display_name, "janedoe");
    }

    #[test]
    fn test_page_without_anchors_is_a_parse_error() {
        let result = parse_serp("<html><body><p>Please try again later.</p></body></html>");
        assert!(result.is_err());
    }

    #[test]
    fn test_display_name_strips_provider_suffixes() {
        assert_eq!(
            clean_display_name("Jane Doe (@janedoe) • Instagram photos and videos", "janedoe"),
            "Jane Doe"
        );
        assert_eq!(
            clean_display_name("Jane Doe - Instagram", "janedoe"),
            "Jane Doe"
        );
        assert_eq!(clean_display_name("Jane Doe on Instagram", "janedoe"), "Jane Doe");
        assert_eq!(clean_display_name("", "janedoe"), "janedoe");
    }

    #[test]
    fn test_unwrap_redirect() {
        assert_eq!(
            unwrap_redirect("/url?q=https%3A%2F%2Finstagram.com%2Fjane&sa=U").as_deref(),
            Some("https://instagram.com/jane")
        );
        assert_eq!(
            unwrap_redirect("https://www.instagram.com/jane/").as_deref(),
            Some("https://www.instagram.com/jane/")
        );
        assert_eq!(unwrap_redirect("#fragment"), None);
        assert_eq!(unwrap_redirect("/search?q=next+page"), None);
        assert_eq!(unwrap_redirect("https://www.google.com/preferences"), None);
    }

    #[test]
    fn test_percent_decode_is_case_insensitive() {
        assert_eq!(
            percent_decode("https%3a%2f%2finstagram.com%2fjane"),
            "https://instagram.com/jane"
        );
        assert_eq!(percent_decode("a%2Bb%20c"), "a+b c");
        assert_eq!(percent_decode("50%25 off"), "50% off");
        assert_eq!(percent_decode("broken%2"), "broken%2");
        assert_eq!(percent_decode("broken%zz"), "broken%zz");
    }

    #[test]
    fn test_lowercase_hex_redirects_still_yield_candidates() {
        let html = r#"
            <div><a href="/url?q=https%3a%2f%2fwww.instagram.com%2fjanedoe%2f&sa=U">
                <h3>Jane Doe (@janedoe) • Instagram</h3>
            </a></div>
        "#;

        let candidates = parse_serp(html).expect("Failed to parse");

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].username, "janedoe");
        assert_eq!(candidates[0].url, "https://www.instagram.com/janedoe/");
    }
}
