//! Client token discovery on embed pages.

use regex::Regex;
use scraper::Html;
use std::sync::OnceLock;

use super::parse::Selectors;

const NONCE_MARKER: &str = "empty nonce script";
const COMMENT_PREFIX: &str = "_is_th:";
const MIN_OBJECT_TOKEN_LEN: usize = 20;

struct TokenRegex {
    window_string: Regex,
    window_object: Regex,
    quoted: Regex,
}

impl TokenRegex {
    fn get() -> Option<&'static Self> {
        static INSTANCE: OnceLock<Option<TokenRegex>> = OnceLock::new();
        INSTANCE
            .get_or_init(|| {
                Some(Self {
                    window_string: Regex::new(r#"window\.(\w+)\s*=\s*["']([\w-]+)["']"#).ok()?,
                    window_object: Regex::new(r"window\.(\w+)\s*=\s*(\{[\s\S]*?\});").ok()?,
                    quoted: Regex::new(r#"["']([^"']+)["']"#).ok()?,
                })
            })
            .as_ref()
    }
}

/// Tries each known token location in order; the first hit wins.
pub(super) fn extract_client_token(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let s = Selectors::get()?;

    let attr_of = |selector: &scraper::Selector, attr: &str| {
        doc.select(selector)
            .next()
            .and_then(|el| el.value().attr(attr))
            .filter(|v| !v.is_empty())
            .map(ToString::to_string)
    };

    if let Some(token) = attr_of(&s.meta_gg_fb, "content") {
        return Some(token);
    }

    if let Some(token) = attr_of(&s.data_dpi, "data-dpi") {
        return Some(token);
    }

    let nonce = doc
        .select(&s.nonce_script)
        .find(|script| script.text().collect::<String>().contains(NONCE_MARKER))
        .and_then(|script| script.value().attr("nonce"))
        .filter(|n| !n.is_empty());
    if let Some(nonce) = nonce {
        return Some(nonce.to_string());
    }

    let re = TokenRegex::get()?;

    if let Some(caps) = re.window_string.captures(html) {
        return Some(caps[2].to_string());
    }

    for caps in re.window_object.captures_iter(html) {
        let token: String = re
            .quoted
            .captures_iter(&caps[2])
            .map(|c| c[1].to_string())
            .collect();
        if token.len() >= MIN_OBJECT_TOKEN_LEN {
            return Some(token);
        }
    }

    doc.tree
        .values()
        .filter_map(scraper::Node::as_comment)
        .find_map(|comment| {
            comment
                .trim()
                .strip_prefix(COMMENT_PREFIX)
                .map(ToString::to_string)
        })
}
