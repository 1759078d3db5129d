//! ActivityPub `Note` → Normalized Post (spec.md §4.4).
//!
//! Takes an already-dereferenced `Note` object (the object of a `Create`
//! activity) as JSON — fetching and activity unwrapping are the outbound
//! collaborator's job (spec.md §4.7, out of this core's scope).

use chrono::DateTime;
use serde::Deserialize;

use crate::error::{BridgeError, Result};
use crate::store::Store;
use crate::types::{ForeignProtocol, ImageDescriptor, NormalizedPost};

use super::dedup_hashtags_preserving_case;

#[derive(Debug, Deserialize)]
struct NoteRecord {
    id: String,
    content: String,
    published: Option<String>,
    #[serde(rename = "inReplyTo")]
    in_reply_to: Option<String>,
    #[serde(default)]
    attachment: Vec<serde_json::Value>,
    #[serde(default)]
    tag: Vec<serde_json::Value>,
    #[serde(rename = "quoteUrl")]
    quote_url: Option<String>,
    #[serde(rename = "_misskey_quote")]
    misskey_quote: Option<String>,
}

/// Strip HTML to plain text, preserving line breaks (`<br>`, `<p>`) and
/// link text (the visible text of an `<a>`, not its `href`). A small
/// hand-rolled scanner rather than a full HTML parser — AP `content`
/// fields are server-sanitized to a narrow tag subset already.
fn strip_html_preserving_structure(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut pending_tag = String::new();
    let mut in_tag = false;

    for c in html.chars() {
        if c == '<' {
            in_tag = true;
            pending_tag.clear();
            continue;
        }
        if in_tag {
            if c == '>' {
                in_tag = false;
                let tag_lower = pending_tag.to_lowercase();
                if tag_lower.starts_with("br") || tag_lower.starts_with("/p") || tag_lower.starts_with("/div") {
                    out.push('\n');
                }
            } else {
                pending_tag.push(c);
            }
            continue;
        }
        out.push(c);
    }
    html_unescape(out.trim())
}

fn html_unescape(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

fn extract_images(attachments: &[serde_json::Value]) -> Vec<ImageDescriptor> {
    attachments
        .iter()
        .filter(|a| {
            a.get("type")
                .and_then(|t| t.as_str())
                .map(|t| t == "Image" || t == "Document")
                .unwrap_or(false)
        })
        .filter_map(|a| {
            let url = a.get("url").and_then(|u| u.as_str())?.to_string();
            Some(ImageDescriptor {
                url,
                alt: a.get("name").and_then(|n| n.as_str()).unwrap_or_default().to_string(),
                mime: a.get("mediaType").and_then(|m| m.as_str()).unwrap_or_default().to_string(),
                blurhash: a.get("blurhash").and_then(|b| b.as_str()).unwrap_or_default().to_string(),
                width: a.get("width").and_then(|w| w.as_u64()).unwrap_or(0) as u32,
                height: a.get("height").and_then(|h| h.as_u64()).unwrap_or(0) as u32,
            })
        })
        .collect()
}

fn extract_hashtags(tags: &[serde_json::Value]) -> Vec<String> {
    let raw = tags
        .iter()
        .filter(|t| t.get("type").and_then(|v| v.as_str()) == Some("Hashtag"))
        .filter_map(|t| t.get("name").and_then(|n| n.as_str()))
        .map(|name| name.trim_start_matches('#').to_string());
    dedup_hashtags_preserving_case(raw)
}

fn fallback_timestamp(published: &Option<String>) -> i64 {
    published
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|| chrono::Utc::now().timestamp())
}

/// Parse an ActivityPub `Note` object into a Normalized Post.
pub async fn parse(
    raw: &serde_json::Value,
    store: &dyn Store,
    show_source_link: bool,
) -> Result<NormalizedPost> {
    let note: NoteRecord = serde_json::from_value(raw.clone()).map_err(|e| BridgeError::Parse {
        foreign_id: raw.get("id").and_then(|v| v.as_str()).unwrap_or("<unknown>").to_string(),
        reason: e.to_string(),
    })?;

    let mut post = NormalizedPost {
        content: strip_html_preserving_structure(&note.content),
        created_at: fallback_timestamp(&note.published),
        images: extract_images(&note.attachment),
        hashtags: extract_hashtags(&note.tag),
        proxy_id: note.id.clone(),
        proxy_protocol: Some(ForeignProtocol::ActivityPub),
        source_url: note.id.clone(),
        show_source_link,
        ..Default::default()
    };

    if let Some(quote_url) = note.quote_url.or(note.misskey_quote) {
        if let Some(nostr_id) = store.get_nostr_for(&quote_url).await? {
            post.quote_event_id = nostr_id;
        }
    }

    if let Some(parent_url) = note.in_reply_to {
        if let Some(parent_id) = store.get_nostr_for(&parent_url).await? {
            post.reply_to_event_id = parent_id.clone();
            // AP doesn't carry a separate root reference; the Threading
            // Resolver fills root_event_id in when it walks the chain.
            post.root_event_id = parent_id;
        }
    }

    Ok(post)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use serde_json::json;

    #[tokio::test]
    async fn strips_html_preserving_breaks() {
        let store = SqliteStore::open_in_memory().unwrap();
        let record = json!({
            "id": "https://mastodon.example/notes/1",
            "content": "<p>hello<br>world</p>",
        });
        let post = parse(&record, &store, true).await.unwrap();
        assert_eq!(post.content, "hello\nworld");
    }

    #[tokio::test]
    async fn hashtags_extracted_and_deduped() {
        let store = SqliteStore::open_in_memory().unwrap();
        let record = json!({
            "id": "https://mastodon.example/notes/1",
            "content": "hi",
            "tag": [
                {"type": "Hashtag", "name": "#Rust"},
                {"type": "Hashtag", "name": "#rust"},
            ],
        });
        let post = parse(&record, &store, true).await.unwrap();
        assert_eq!(post.hashtags, vec!["Rust".to_string()]);
    }

    #[tokio::test]
    async fn unresolved_reply_parent_leaves_fields_empty() {
        let store = SqliteStore::open_in_memory().unwrap();
        let record = json!({
            "id": "https://mastodon.example/notes/2",
            "content": "reply",
            "inReplyTo": "https://mastodon.example/notes/1",
        });
        let post = parse(&record, &store, true).await.unwrap();
        assert!(post.reply_to_event_id.is_empty());
    }
}
