// urls.rs - URL Extraction Helpers
// Pulls candidate links out of chat message text and derives the free-form
// question a user typed around them. This is deliberately not a full URL
// grammar: trailing punctuation and links embedded in markup come through as-is.

use once_cell::sync::Lazy;
use regex::Regex;

static URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https?://[^\s<>"]+|www\.[^\s<>"]+"#).expect("URL pattern is valid")
});

// Slack renders links as <url> or <url|label> and user mentions as <@U123> or <@U123|name>
static LINK_MARKUP_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(?:https?://|www\.)[^>]*>").expect("link markup pattern is valid")
});
static USER_MENTION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<@[A-Za-z0-9]+(?:\|[^>]*)?>").expect("mention pattern is valid")
});

/// Find every URL in `text`, in order of appearance.
///
/// Duplicates are kept; deduplication happens when a thread context is built.
pub fn extract_urls(text: &str) -> Vec<String> {
    URL_REGEX
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// The question part of a mention: the text left once bot mentions and links are removed.
pub fn mention_prompt(text: &str) -> String {
    let without_mentions = USER_MENTION_REGEX.replace_all(text, " ");
    let without_markup = LINK_MARKUP_REGEX.replace_all(&without_mentions, " ");
    let without_urls = URL_REGEX.replace_all(&without_markup, " ");

    without_urls.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_keeps_duplicates_in_order() {
        let urls = extract_urls("check this out http://example.com/a and http://example.com/a again");
        assert_eq!(urls, vec!["http://example.com/a", "http://example.com/a"]);
    }

    #[test]
    fn test_extract_all_prefixes() {
        let text = "first https://rust-lang.org/learn then www.example.org/x and http://a.b/c?d=1";
        let urls = extract_urls(text);
        assert_eq!(
            urls,
            vec!["https://rust-lang.org/learn", "www.example.org/x", "http://a.b/c?d=1"]
        );
    }

    #[test]
    fn test_extract_stops_at_angle_and_quote() {
        let urls = extract_urls(r#"<https://example.com/page> said "http://quoted.example/q" ok"#);
        assert_eq!(urls, vec!["https://example.com/page", "http://quoted.example/q"]);
    }

    #[test]
    fn test_extract_no_urls() {
        assert!(extract_urls("hello there, nothing to see").is_empty());
        assert!(extract_urls("").is_empty());
        // scheme alone is not enough
        assert!(extract_urls("ftp://example.com http:// ").is_empty());
    }

    #[test]
    fn test_extract_only_returns_recognised_prefixes() {
        let text = "a https://x.y b\twww.z.w\nc http://q.r/s <d> \"e\" ";
        for url in extract_urls(text) {
            assert!(
                url.starts_with("http://") || url.starts_with("https://") || url.starts_with("www."),
                "unexpected match {}",
                url
            );
            assert!(text.contains(&url));
        }
    }

    #[test]
    fn test_extract_is_idempotent() {
        let text = "see <https://a.example/1|a> and www.b.example, also https://a.example/1 \"x\"";
        let first = extract_urls(text);
        let second = extract_urls(&first.join(" "));
        assert_eq!(first, second);
    }

    #[test]
    fn test_mention_prompt_strips_mentions_and_links() {
        let prompt = mention_prompt("<@U0123ABC> what is the pricing? <https://example.com/p|example.com/p>");
        assert_eq!(prompt, "what is the pricing?");

        let prompt = mention_prompt("<@U1|bot>   summarize https://example.com/a  please");
        assert_eq!(prompt, "summarize please");
    }

    #[test]
    fn test_mention_prompt_empty_when_only_link() {
        assert_eq!(mention_prompt("<@U42> https://example.com"), "");
    }
}
