//! Topic names, one per coarse event family.
//!
//! Partition counts are fixed when a topic is created; changing them
//! reshuffles ordering domains and is a breaking operation.

/// Post lifecycle: published, deleted.
pub const POSTS: &str = "posts";
/// Content check lifecycle: verdicts from the moderation workflow.
pub const CHECKS: &str = "checks";
/// Document-archive sync requests.
pub const SYNC: &str = "sync";
/// User lifecycle: registration, profile updates.
pub const USERS: &str = "users";
/// Explicit cache invalidation commands.
pub const CACHE: &str = "cache";
/// Explicit search index update commands.
pub const SEARCH: &str = "search";
/// Interaction events: likes, reads.
pub const INTERACTIONS: &str = "interactions";
/// Outbound notification requests: SMS, email.
pub const NOTIFICATIONS: &str = "notifications";

/// All topics a deployment needs, for bootstrap tooling.
pub const ALL: &[&str] = &[
    POSTS,
    CHECKS,
    SYNC,
    USERS,
    CACHE,
    SEARCH,
    INTERACTIONS,
    NOTIFICATIONS,
];

/// Qualify a topic with the deployment prefix, e.g. `parley.posts`.
pub fn qualified(prefix: &str, topic: &str) -> String {
    if prefix.is_empty() {
        topic.to_string()
    } else {
        format!("{}.{}", prefix, topic)
    }
}
