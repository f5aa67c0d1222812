//! Key-space layout on the remote store.
//!
//! Data entries live at `{prefix}:{key}`, tag indices at `tag:{tag}`. Ops
//! tooling relies on this layout, so it must not change.

/// Prefix used when a caller does not pick one.
pub const DEFAULT_PREFIX: &str = "cache";

/// Seconds a tag index outlives the longest-lived member written under it.
pub const TAG_TTL_BUFFER_SECS: u64 = 300;

const TAG_NAMESPACE: &str = "tag";

#[inline]
pub fn full_key(prefix: &str, key: &str) -> String {
    format!("{prefix}:{key}")
}

#[inline]
pub fn tag_key(tag: &str) -> String {
    format!("{TAG_NAMESPACE}:{tag}")
}

/// Expiry a tag index needs to outlive a member written with
/// `member_ttl_secs`. 0 means "no expiry". Stores never shorten an index
/// below its current expiry, so this is a floor, not the final value.
pub fn tag_index_ttl(member_ttl_secs: u64) -> u64 {
    if member_ttl_secs == 0 {
        return 0;
    }
    member_ttl_secs.saturating_add(TAG_TTL_BUFFER_SECS)
}
