//! Foreign permalink conversion (spec.md §6).
//!
//! AT Protocol posts only carry an AT URI (`at://<DID>/<collection>/<rkey>`)
//! on the wire; humans need the `bsky.app` HTTPS form. ActivityPub notes
//! are already their own permalink.

const BSKY_POST_COLLECTION: &str = "app.bsky.feed.post";

/// `at://<DID>/app.bsky.feed.post/<rkey>` → `https://bsky.app/profile/<DID>/post/<rkey>`.
/// Returns `None` if `uri` isn't a well-formed AT URI for a post record.
pub fn at_uri_to_permalink(uri: &str) -> Option<String> {
    let rest = uri.strip_prefix("at://")?;
    let mut parts = rest.splitn(3, '/');
    let did = parts.next()?;
    let collection = parts.next()?;
    let rkey = parts.next()?;
    if collection != BSKY_POST_COLLECTION || did.is_empty() || rkey.is_empty() {
        return None;
    }
    Some(format!("https://bsky.app/profile/{did}/post/{rkey}"))
}

/// `https://bsky.app/profile/<DID>/post/<rkey>` → `at://<DID>/app.bsky.feed.post/<rkey>`.
pub fn permalink_to_at_uri(permalink: &str) -> Option<String> {
    let rest = permalink.strip_prefix("https://bsky.app/profile/")?;
    let mut parts = rest.splitn(3, '/');
    let did = parts.next()?;
    let marker = parts.next()?;
    let rkey = parts.next()?;
    if marker != "post" || did.is_empty() || rkey.is_empty() {
        return None;
    }
    Some(format!("at://{did}/{BSKY_POST_COLLECTION}/{rkey}"))
}

/// Extract the host component of a URL. Empty string for anything that
/// doesn't parse as an absolute URL with a host — unprefixed input never
/// panics, it returns `""`.
pub fn host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

/// Synthesize a fullsize CDN URL for an AT Protocol image blob
/// (spec.md §4.4): no direct blob-bytes endpoint is given in a post
/// record, only `(author DID, blob CID)`.
pub fn bsky_cdn_fullsize_url(author_did: &str, blob_cid: &str) -> String {
    format!(
        "https://cdn.bsky.app/img/feed_fullsize/plain/{author_did}/{blob_cid}@jpeg"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_uri_round_trips_with_permalink() {
        let uri = "at://did:plc:abc/app.bsky.feed.post/k1";
        let permalink = at_uri_to_permalink(uri).unwrap();
        assert_eq!(permalink, "https://bsky.app/profile/did:plc:abc/post/k1");
        assert_eq!(permalink_to_at_uri(&permalink).unwrap(), uri);
    }

    #[test]
    fn at_uri_rejects_non_post_collections() {
        assert!(at_uri_to_permalink("at://did:plc:abc/app.bsky.actor.profile/self").is_none());
    }

    #[test]
    fn host_extraction() {
        assert_eq!(host("https://bsky.app/profile/x"), "bsky.app");
        assert_eq!(host("x"), "");
    }

    #[test]
    fn cdn_url_synthesis() {
        let url = bsky_cdn_fullsize_url("did:plc:abc", "bafkrei123");
        assert!(url.contains("did:plc:abc"));
        assert!(url.contains("bafkrei123"));
    }
}
