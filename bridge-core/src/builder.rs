//! Normalized Post → kind-1 event Builder (spec.md §4.3).
//!
//! Pure by construction: no suspension point may ever be introduced here
//! (spec.md §5) since the tag-order and content-construction contract
//! must stay trivially unit-testable without an executor.

use nostr::{Alphabet, EventBuilder, Kind, PublicKey, Tag, TagKind, Timestamp};

use crate::types::NormalizedPost;

fn r_tag_kind() -> TagKind<'static> {
    TagKind::single_letter(Alphabet::R, false)
}

const PROXY_TAG: &str = "proxy";

fn proxy_tag(post: &NormalizedPost) -> Option<Tag> {
    if post.proxy_id.is_empty() {
        return None;
    }
    let protocol = post.proxy_protocol.map(|p| p.as_str()).unwrap_or_default();
    Some(Tag::custom(
        TagKind::Custom(PROXY_TAG.into()),
        [post.proxy_id.clone(), protocol.to_string()],
    ))
}

fn thread_tags(post: &NormalizedPost) -> Vec<Tag> {
    if !post.is_reply() {
        return Vec::new();
    }
    if post.is_single_parent() {
        vec![event_ref_tag(&post.reply_to_event_id, post.relay_hint.as_deref())]
    } else {
        vec![
            event_ref_tag(&post.root_event_id, post.relay_hint.as_deref()),
            event_ref_tag(&post.reply_to_event_id, post.relay_hint.as_deref()),
        ]
    }
}

fn event_ref_tag(event_id_hex: &str, relay_hint: Option<&str>) -> Tag {
    let mut values = vec![event_id_hex.to_string()];
    if let Some(hint) = relay_hint {
        values.push(hint.to_string());
    }
    Tag::custom(TagKind::e(), values)
}

fn mention_tags(post: &NormalizedPost) -> Vec<Tag> {
    post.mention_pubkeys
        .iter()
        .filter_map(|hex| PublicKey::from_hex(hex).ok())
        .map(|pk| match post.relay_hint.as_deref() {
            Some(hint) => Tag::custom(TagKind::p(), [pk.to_hex(), hint.to_string()]),
            None => Tag::public_key(pk),
        })
        .collect()
}

fn quote_tag(post: &NormalizedPost) -> Option<Tag> {
    if post.quote_event_id.is_empty() {
        return None;
    }
    let mut values = vec![post.quote_event_id.clone()];
    if let Some(hint) = post.relay_hint.as_deref() {
        values.push(hint.to_string());
    }
    Some(Tag::custom(TagKind::q(), values))
}

fn hashtag_tags(post: &NormalizedPost) -> Vec<Tag> {
    post.hashtags
        .iter()
        .map(|tag| Tag::hashtag(tag.clone()))
        .collect()
}

fn content_warning_tag(post: &NormalizedPost) -> Option<Tag> {
    if post.content_warning.is_empty() {
        return None;
    }
    Some(Tag::custom(
        TagKind::Custom("content-warning".into()),
        [post.content_warning.clone()],
    ))
}

/// Build one `imeta` tag per image. Each present sub-value is its own
/// whitespace-prefixed token — order is `url`, `m`, `dim WxH`, `blurhash`,
/// `alt`, and a token is emitted only if its underlying value is non-empty.
fn imeta_tags(post: &NormalizedPost) -> Vec<Tag> {
    post.images
        .iter()
        .map(|img| {
            let mut tokens = vec![format!("url {}", img.url)];
            if !img.mime.is_empty() {
                tokens.push(format!("m {}", img.mime));
            }
            if img.width > 0 && img.height > 0 {
                tokens.push(format!("dim {}x{}", img.width, img.height));
            }
            if !img.blurhash.is_empty() {
                tokens.push(format!("blurhash {}", img.blurhash));
            }
            if !img.alt.is_empty() {
                tokens.push(format!("alt {}", img.alt));
            }
            Tag::custom(TagKind::Custom("imeta".into()), tokens)
        })
        .collect()
}

fn source_link_active(post: &NormalizedPost) -> bool {
    post.show_source_link && !post.source_url.is_empty() && !post.content.contains(&post.source_url)
}

fn source_link_tag(post: &NormalizedPost) -> Option<Tag> {
    if source_link_active(post) {
        Some(Tag::custom(r_tag_kind(), [post.source_url.clone()]))
    } else {
        None
    }
}

/// Content string: `content`, then `"\n\n" + url` for each image, then (if
/// the source-link gate passes) `"\n\n🔗 " + source_url`.
fn build_content(post: &NormalizedPost) -> String {
    let mut content = post.content.clone();
    for image in &post.images {
        content.push_str("\n\n");
        content.push_str(&image.url);
    }
    if source_link_active(post) {
        content.push_str("\n\n🔗 ");
        content.push_str(&post.source_url);
    }
    content
}

/// Translate a Normalized Post into an unsigned kind-1 `EventBuilder` with
/// tags in the fixed, observable order from spec.md §4.3. Signing is the
/// caller's responsibility via [`crate::identity::Signer`].
pub fn build_text_note(post: &NormalizedPost) -> EventBuilder {
    let mut tags: Vec<Tag> = Vec::new();
    tags.extend(proxy_tag(post));
    tags.extend(thread_tags(post));
    tags.extend(mention_tags(post));
    tags.extend(quote_tag(post));
    tags.extend(hashtag_tags(post));
    tags.extend(content_warning_tag(post));
    tags.extend(imeta_tags(post));
    tags.extend(source_link_tag(post));

    let mut builder = EventBuilder::new(Kind::TextNote, build_content(post)).tags(tags);
    if post.created_at > 0 {
        builder = builder.custom_created_at(Timestamp::from(post.created_at as u64));
    }
    builder
}

/// Kind-6 repost: one `e` tag with `(id, "", "mention")` positional
/// markers and a `proxy` tag (spec.md §6).
pub fn build_repost(foreign_id: &str, protocol: &str, target_event_id: &str) -> EventBuilder {
    let tags = vec![
        Tag::custom(TagKind::Custom(PROXY_TAG.into()), [foreign_id.to_string(), protocol.to_string()]),
        Tag::custom(
            TagKind::e(),
            [target_event_id.to_string(), String::new(), "mention".to_string()],
        ),
    ];
    EventBuilder::new(Kind::Repost, "").tags(tags)
}

/// Kind-7 like: `content = "+"`, one `e` tag for the target, a `proxy`
/// tag (spec.md §6).
pub fn build_like(foreign_id: &str, protocol: &str, target_event_id: &str) -> EventBuilder {
    let tags = vec![
        Tag::custom(TagKind::Custom(PROXY_TAG.into()), [foreign_id.to_string(), protocol.to_string()]),
        Tag::custom(TagKind::e(), [target_event_id.to_string()]),
    ];
    EventBuilder::new(Kind::Reaction, "+").tags(tags)
}
