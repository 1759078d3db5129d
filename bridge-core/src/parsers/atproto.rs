//! AT Protocol post → Normalized Post (spec.md §4.4).
//!
//! Facet/embed shapes mirror `app.bsky.feed.post` records on the wire;
//! this module has no network dependency of its own — it takes the
//! already-fetched record JSON and the post's own AT URI.

use chrono::DateTime;
use serde::Deserialize;

use crate::error::{BridgeError, Result};
use crate::permalink;
use crate::store::Store;
use crate::types::{ForeignProtocol, ImageDescriptor, NormalizedPost};

use super::dedup_hashtags_preserving_case;

#[derive(Debug, Deserialize)]
struct PostRecord {
    text: String,
    #[serde(rename = "createdAt")]
    created_at: Option<String>,
    reply: Option<ReplyRef>,
    embed: Option<serde_json::Value>,
    #[serde(default)]
    facets: Vec<Facet>,
}

#[derive(Debug, Deserialize)]
struct ReplyRef {
    root: StrongRef,
    parent: StrongRef,
}

#[derive(Debug, Deserialize)]
struct StrongRef {
    uri: String,
}

#[derive(Debug, Deserialize)]
struct Facet {
    #[serde(default)]
    features: Vec<FacetFeature>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "$type")]
enum FacetFeature {
    #[serde(rename = "app.bsky.richtext.facet#tag")]
    Tag { tag: String },
    #[serde(other)]
    Other,
}

fn extract_hashtags(facets: &[Facet]) -> Vec<String> {
    let raw = facets.iter().flat_map(|f| &f.features).filter_map(|f| match f {
        FacetFeature::Tag { tag } => Some(tag.clone()),
        FacetFeature::Other => None,
    });
    dedup_hashtags_preserving_case(raw)
}

fn extract_images(embed: &Option<serde_json::Value>, author_did: &str) -> Vec<ImageDescriptor> {
    let Some(embed) = embed else {
        return Vec::new();
    };
    let is_image_embed = embed
        .get("$type")
        .and_then(|t| t.as_str())
        .map(|t| t == "app.bsky.embed.images")
        .unwrap_or(false);
    if !is_image_embed {
        return Vec::new();
    }
    embed
        .get("images")
        .and_then(|v| v.as_array())
        .map(|images| {
            images
                .iter()
                .filter_map(|img| {
                    let cid = img.get("image")?.get("ref")?.get("$link")?.as_str()?;
                    let mime = img
                        .get("image")
                        .and_then(|i| i.get("mimeType"))
                        .and_then(|m| m.as_str())
                        .unwrap_or_default()
                        .to_string();
                    let alt = img
                        .get("alt")
                        .and_then(|a| a.as_str())
                        .unwrap_or_default()
                        .to_string();
                    let (width, height) = img
                        .get("aspectRatio")
                        .map(|ar| {
                            (
                                ar.get("width").and_then(|w| w.as_u64()).unwrap_or(0) as u32,
                                ar.get("height").and_then(|h| h.as_u64()).unwrap_or(0) as u32,
                            )
                        })
                        .unwrap_or((0, 0));
                    Some(ImageDescriptor {
                        url: permalink::bsky_cdn_fullsize_url(author_did, cid),
                        alt,
                        mime,
                        blurhash: String::new(),
                        width,
                        height,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Quote reference, if the embed is a record embed — the caller resolves
/// it against Persistence and drops it silently if unmapped.
fn extract_quote_uri(embed: &Option<serde_json::Value>) -> Option<String> {
    let embed = embed.as_ref()?;
    let record = if embed.get("$type")?.as_str()? == "app.bsky.embed.record" {
        embed.get("record")?
    } else if embed.get("$type")?.as_str()? == "app.bsky.embed.recordWithMedia" {
        embed.get("record")?.get("record")?
    } else {
        return None;
    };
    record.get("uri")?.as_str().map(str::to_string)
}

fn fallback_timestamp(created_at: &Option<String>) -> i64 {
    created_at
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|| chrono::Utc::now().timestamp())
}

/// Parse a `app.bsky.feed.post` record (already-decoded JSON) into a
/// Normalized Post. `uri` is the record's own AT URI, `author_did` its
/// author, both supplied by the caller (the poll cycle that fetched it).
pub async fn parse(
    raw: &serde_json::Value,
    uri: &str,
    author_did: &str,
    store: &dyn Store,
    show_source_link: bool,
) -> Result<NormalizedPost> {
    let record: PostRecord = serde_json::from_value(raw.clone()).map_err(|e| BridgeError::Parse {
        foreign_id: uri.to_string(),
        reason: e.to_string(),
    })?;

    let mut post = NormalizedPost {
        content: record.text,
        created_at: fallback_timestamp(&record.created_at),
        images: extract_images(&record.embed, author_did),
        hashtags: extract_hashtags(&record.facets),
        proxy_id: uri.to_string(),
        proxy_protocol: Some(ForeignProtocol::AtProto),
        source_url: permalink::at_uri_to_permalink(uri).unwrap_or_default(),
        show_source_link,
        ..Default::default()
    };

    if let Some(quote_uri) = extract_quote_uri(&record.embed) {
        if let Some(nostr_id) = store.get_nostr_for(&quote_uri).await? {
            post.quote_event_id = nostr_id;
        }
    }

    if let Some(reply) = record.reply {
        let parent = store.get_nostr_for(&reply.parent.uri).await?;
        let root = store.get_nostr_for(&reply.root.uri).await?;
        if let (Some(parent_id), Some(root_id)) = (parent, root) {
            post.reply_to_event_id = parent_id;
            post.root_event_id = root_id;
        }
    }

    Ok(post)
}
