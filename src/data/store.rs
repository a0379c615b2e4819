//! Persistence interface
//!
//! The engine only reads and writes records through this trait. Inserts on
//! unique keys (remote ids, host names, follow pairs) return the record that
//! ends up stored, so two racing creators converge on the same row.

use async_trait::async_trait;

use super::models::{
    Actor, Emoji, EmojiReaction, FederatedHost, Follow, Like, Media, Post, ServerBlock, UserBlock,
};
use crate::error::Result;

#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Actors
    // =========================================================================

    async fn get_actor(&self, id: &str) -> Result<Option<Actor>>;

    async fn get_actors(&self, ids: &[String]) -> Result<Vec<Actor>>;

    async fn find_actor_by_remote_id(&self, remote_id: &str) -> Result<Option<Actor>>;

    /// Case-insensitive lookup among local actors.
    async fn find_local_actor_by_handle(&self, handle: &str) -> Result<Option<Actor>>;

    /// Returns the stored actor; an existing actor with the same remote id wins.
    async fn insert_actor(&self, actor: Actor) -> Result<Actor>;

    async fn update_actor(&self, actor: &Actor) -> Result<()>;

    async fn delete_actor(&self, id: &str) -> Result<()>;

    async fn list_remote_actors(&self) -> Result<Vec<Actor>>;

    async fn list_remote_actors_on_host(&self, host_id: &str) -> Result<Vec<Actor>>;

    // =========================================================================
    // Federated hosts
    // =========================================================================

    async fn get_host(&self, id: &str) -> Result<Option<FederatedHost>>;

    /// `name` must already be lowercased.
    async fn find_host_by_name(&self, name: &str) -> Result<Option<FederatedHost>>;

    async fn insert_host(&self, host: FederatedHost) -> Result<FederatedHost>;

    async fn update_host(&self, host: &FederatedHost) -> Result<()>;

    async fn list_hosts(&self) -> Result<Vec<FederatedHost>>;

    // =========================================================================
    // Posts
    // =========================================================================

    async fn get_post(&self, id: &str) -> Result<Option<Post>>;

    async fn find_post_by_remote_id(&self, remote_id: &str) -> Result<Option<Post>>;

    /// Stores the post and extends the ancestor index from its parent.
    async fn insert_post(&self, post: Post) -> Result<Post>;

    /// Parent is immutable; only content fields are written.
    async fn update_post(&self, post: &Post) -> Result<()>;

    /// Fails with `Validation` when the post still has children.
    async fn delete_post(&self, id: &str) -> Result<()>;

    async fn count_children(&self, id: &str) -> Result<usize>;

    /// Ancestor ids, nearest parent first.
    async fn ancestors(&self, id: &str) -> Result<Vec<String>>;

    async fn list_posts_by_user(&self, user_id: &str) -> Result<Vec<Post>>;

    // =========================================================================
    // Follows
    // =========================================================================

    async fn find_follow(&self, follower_id: &str, followed_id: &str) -> Result<Option<Follow>>;

    async fn find_follow_by_remote_id(&self, remote_id: &str) -> Result<Option<Follow>>;

    /// Returns the existing edge when the pair is already present.
    async fn insert_follow(&self, follow: Follow) -> Result<Follow>;

    async fn update_follow(&self, follow: &Follow) -> Result<()>;

    async fn delete_follow(&self, id: &str) -> Result<()>;

    /// Edges pointing at `followed_id`.
    async fn list_followers(&self, followed_id: &str) -> Result<Vec<Follow>>;

    /// Edges starting at `follower_id`.
    async fn list_following(&self, follower_id: &str) -> Result<Vec<Follow>>;

    /// Removes edges in both directions and returns how many were removed.
    async fn delete_follows_involving(&self, actor_id: &str) -> Result<usize>;

    // =========================================================================
    // Likes and reactions
    // =========================================================================

    async fn find_like_by_remote_id(&self, remote_id: &str) -> Result<Option<Like>>;

    async fn find_like(&self, user_id: &str, post_id: &str) -> Result<Option<Like>>;

    async fn insert_like(&self, like: Like) -> Result<Like>;

    async fn delete_like(&self, id: &str) -> Result<()>;

    async fn delete_likes_by_user(&self, user_id: &str) -> Result<usize>;

    async fn find_reaction_by_remote_id(&self, remote_id: &str) -> Result<Option<EmojiReaction>>;

    async fn insert_reaction(&self, reaction: EmojiReaction) -> Result<EmojiReaction>;

    async fn delete_reactions_by_user(&self, user_id: &str) -> Result<usize>;

    // =========================================================================
    // Emoji and media
    // =========================================================================

    async fn find_emoji_by_remote_id(&self, remote_id: &str) -> Result<Option<Emoji>>;

    async fn insert_emoji(&self, emoji: Emoji) -> Result<Emoji>;

    async fn insert_media(&self, media: Media) -> Result<Media>;

    async fn get_media(&self, id: &str) -> Result<Option<Media>>;

    // =========================================================================
    // Blocks
    // =========================================================================

    async fn insert_user_block(&self, block: UserBlock) -> Result<()>;

    async fn insert_server_block(&self, block: ServerBlock) -> Result<()>;

    async fn is_actor_blocked_by(&self, local_id: &str, actor_id: &str) -> Result<bool>;

    async fn is_host_blocked_by(&self, local_id: &str, host_id: &str) -> Result<bool>;
}
