//! Data models
//!
//! Records owned by the persistence layer. All ids are ULIDs,
//! all timestamps chrono UTC.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

/// Fresh record id as a plain string.
pub fn new_id() -> String {
    EntityId::new().0
}

// =============================================================================
// Actor
// =============================================================================

/// A local user or the cached representation of a remote one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    /// Plain handle for local actors, `@name@host` for remote ones
    pub handle: String,
    pub display_name: String,
    pub description: String,
    pub avatar_url: String,
    pub header_url: Option<String>,
    /// RSA public key (PEM format)
    pub public_key_pem: String,
    pub kind: ActorKind,
    pub banned: bool,
    pub manually_accepts_follows: bool,
    pub created_at: DateTime<Utc>,
    /// Last time the record was written; drives remote staleness
    pub updated_at: DateTime<Utc>,
}

/// Exactly one of local or remote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ActorKind {
    Local {
        /// RSA private key (PEM format)
        private_key_pem: String,
    },
    Remote(RemoteOrigin),
}

/// Where a remote actor lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteOrigin {
    /// Actor document URL (unique)
    pub remote_id: String,
    /// Personal inbox, used when the host has no shared inbox
    pub inbox: Option<String>,
    pub host_id: String,
}

impl Actor {
    pub fn is_remote(&self) -> bool {
        matches!(self.kind, ActorKind::Remote(_))
    }

    pub fn remote(&self) -> Option<&RemoteOrigin> {
        match &self.kind {
            ActorKind::Remote(origin) => Some(origin),
            ActorKind::Local { .. } => None,
        }
    }

    pub fn remote_id(&self) -> Option<&str> {
        self.remote().map(|origin| origin.remote_id.as_str())
    }

    pub fn host_id(&self) -> Option<&str> {
        self.remote().map(|origin| origin.host_id.as_str())
    }

    pub fn private_key_pem(&self) -> Option<&str> {
        match &self.kind {
            ActorKind::Local { private_key_pem } => Some(private_key_pem),
            ActorKind::Remote(_) => None,
        }
    }

    /// Follows towards this actor are accepted without a handshake.
    ///
    /// Remote targets answer with their own `Accept`, so the local edge is
    /// considered accepted as soon as it is created.
    pub fn accepts_follows_automatically(&self) -> bool {
        self.is_remote() || !self.manually_accepts_follows
    }
}

// =============================================================================
// Federated Host
// =============================================================================

/// A remote server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederatedHost {
    pub id: String,
    /// Lowercased host name (unique)
    pub display_name: String,
    /// Absent means deliveries go to each actor's inbox
    pub public_inbox: Option<String>,
    pub blocked: bool,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Post
// =============================================================================

/// Who can see a post
///
/// The numeric codes are the ones stored by the persistence layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    FollowersOnly,
    Direct,
}

impl Visibility {
    pub fn code(self) -> u8 {
        match self {
            Visibility::Public => 0,
            Visibility::FollowersOnly => 1,
            Visibility::Direct => 10,
        }
    }

    /// Unknown codes fall back to public, matching how fan-out treats them.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Visibility::FollowersOnly,
            10 => Visibility::Direct,
            _ => Visibility::Public,
        }
    }

    /// Derive visibility from activity addressing.
    pub fn from_addressing(to: &[String], cc: &[String]) -> Self {
        if to
            .iter()
            .any(|target| target == crate::federation::PUBLIC_COLLECTION)
        {
            Visibility::Public
        } else if to.iter().chain(cc.iter()).any(|target| target.contains("followers")) {
            Visibility::FollowersOnly
        } else {
            Visibility::Direct
        }
    }
}

/// A content node in a thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    /// Owning actor id
    pub user_id: String,
    /// None for thread roots
    pub parent_id: Option<String>,
    /// Sanitized HTML; empty for boosts
    pub content: String,
    pub content_warning: String,
    pub visibility: Visibility,
    /// Object id of the federated original, unique when present
    pub remote_post_id: Option<String>,
    pub featured: bool,
    pub media_ids: Vec<String>,
    pub tags: Vec<String>,
    pub mentioned_user_ids: Vec<String>,
    pub emoji_ids: Vec<String>,
    pub poll: Option<Poll>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    /// A new local or remote post with empty relations.
    pub fn new(user_id: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            user_id: user_id.into(),
            parent_id: None,
            content: content.into(),
            content_warning: String::new(),
            visibility: Visibility::Public,
            remote_post_id: None,
            featured: false,
            media_ids: Vec::new(),
            tags: Vec::new(),
            mentioned_user_ids: Vec::new(),
            emoji_ids: Vec::new(),
            poll: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Boosts are content-less children of the boosted post.
    pub fn is_boost(&self) -> bool {
        self.parent_id.is_some() && self.content.is_empty() && self.media_ids.is_empty()
    }

    /// Clear everything that carries content while keeping the row in the thread.
    pub fn redact(&mut self) {
        self.content = REDACTED_CONTENT.to_string();
        self.content_warning.clear();
        self.media_ids.clear();
        self.tags.clear();
        self.emoji_ids.clear();
        self.mentioned_user_ids.clear();
        self.poll = None;
        self.updated_at = Utc::now();
    }
}

/// Body left behind when a post with replies is deleted.
pub const REDACTED_CONTENT: &str = "Post has been deleted";

/// Poll attached to a post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    pub multiple_choice: bool,
    pub end_time: Option<DateTime<Utc>>,
    pub closed: bool,
    pub options: Vec<PollOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollOption {
    pub title: String,
    pub votes: u64,
}

// =============================================================================
// Relationships
// =============================================================================

/// Directed follow edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Follow {
    pub id: String,
    pub follower_id: String,
    pub followed_id: String,
    /// False while the handshake waits for an Accept
    pub accepted: bool,
    /// Id of the remote Follow activity, if it arrived over federation
    pub remote_follow_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Like edge actor -> post
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Like {
    pub id: String,
    pub user_id: String,
    pub post_id: String,
    pub remote_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Custom emoji reaction edge actor -> post
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmojiReaction {
    pub id: String,
    pub user_id: String,
    pub post_id: String,
    pub emoji_id: Option<String>,
    /// Shortcode or unicode content of the reaction
    pub content: String,
    pub remote_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Actor-level block owned by a local actor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBlock {
    pub id: String,
    pub user_id: String,
    pub blocked_user_id: String,
}

/// Host-level block owned by a local actor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerBlock {
    pub id: String,
    pub user_id: String,
    pub blocked_host_id: String,
}

// =============================================================================
// Attachments
// =============================================================================

/// Custom emoji
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Emoji {
    pub id: String,
    /// Shortcode including colons, e.g. `:blobcat:`
    pub name: String,
    pub url: String,
    /// Remote id of the Emoji object; None for local emoji
    pub external: Option<String>,
}

/// Media attachment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    pub id: String,
    pub user_id: String,
    pub url: String,
    pub nsfw: bool,
    pub description: String,
    /// Remote media are referenced, not copied
    pub external: bool,
}
