use tracing::debug;

use super::types::Article;
use crate::core::queue::ArticlePreview;

pub const SUMMARY_MAX_CHARS: usize = 320;
pub const UNTITLED_ARTICLE: &str = "(untitled)";
const ELLIPSIS: char = '…';
const RENDER_WIDTH: usize = 1_000;

/// Builds the cached preview of a remote article. `folder_id` must already be
/// resolved and `stored_at` is the cache write time in milliseconds.
pub fn article_to_preview(article: &Article, folder_id: i64, stored_at: i64) -> ArticlePreview {
    let title = article
        .title
        .as_deref()
        .map(collapse_whitespace)
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| UNTITLED_ARTICLE.to_string());
    let body_text = article
        .body
        .as_deref()
        .map(html_to_plain_text)
        .unwrap_or_default();
    let summary = if body_text.is_empty() {
        truncate_summary(&title, SUMMARY_MAX_CHARS)
    } else {
        truncate_summary(&body_text, SUMMARY_MAX_CHARS)
    };

    ArticlePreview {
        id: article.id,
        folder_id,
        feed_id: article.feed_id,
        title,
        summary,
        url: article.url.clone().unwrap_or_default(),
        thumbnail_url: thumbnail_url(article),
        pub_date: article.pub_date.unwrap_or_default(),
        unread: article.unread,
        starred: article.starred,
        has_full_text: !body_text.is_empty(),
        stored_at,
    }
}

pub fn html_to_plain_text(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }
    match html2text::config::plain().string_from_read(html.as_bytes(), RENDER_WIDTH) {
        Ok(text) => collapse_whitespace(&text),
        Err(error) => {
            debug!("html rendering failed, stripping tags instead: {error}");
            collapse_whitespace(&strip_tags(html))
        }
    }
}

/// Cuts `text` to at most `max_chars` characters, the last one being an ellipsis.
pub fn truncate_summary(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }
    let mut truncated: String = text.chars().take(max_chars - 1).collect();
    truncated.truncate(truncated.trim_end().len());
    truncated.push(ELLIPSIS);
    truncated
}

fn thumbnail_url(article: &Article) -> Option<String> {
    if let Some(thumbnail) = article
        .media_thumbnail
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return Some(thumbnail.to_string());
    }
    let is_image = article
        .enclosure_mime
        .as_deref()
        .is_some_and(|mime| mime.starts_with("image/"));
    if is_image {
        return article
            .enclosure_link
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string);
    }
    None
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_tags(html: &str) -> String {
    let mut output = String::with_capacity(html.len());
    let mut inside_tag = false;
    for character in html.chars() {
        match character {
            '<' => inside_tag = true,
            '>' if inside_tag => {
                inside_tag = false;
                output.push(' ');
            }
            _ if !inside_tag => output.push(character),
            _ => {}
        }
    }
    output
}
