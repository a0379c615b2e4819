//! In-memory store
//!
//! Arena-style tables keyed by id with secondary indexes on the unique
//! attributes. Thread structure is kept as a materialized ancestor closure
//! (post id -> ancestor ids, nearest first) plus a children index, both
//! maintained on insert and delete.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use super::models::{
    Actor, ActorKind, Emoji, EmojiReaction, FederatedHost, Follow, Like, Media, Post, ServerBlock,
    UserBlock,
};
use super::store::Store;
use crate::error::{AppError, Result};

#[derive(Default)]
struct Tables {
    actors: HashMap<String, Actor>,
    actor_by_remote: HashMap<String, String>,
    hosts: HashMap<String, FederatedHost>,
    host_by_name: HashMap<String, String>,
    posts: HashMap<String, Post>,
    post_by_remote: HashMap<String, String>,
    ancestors: HashMap<String, Vec<String>>,
    children: HashMap<String, HashSet<String>>,
    follows: HashMap<String, Follow>,
    likes: HashMap<String, Like>,
    reactions: HashMap<String, EmojiReaction>,
    emojis: HashMap<String, Emoji>,
    media: HashMap<String, Media>,
    user_blocks: Vec<UserBlock>,
    server_blocks: Vec<ServerBlock>,
}

impl Tables {
    /// Ancestor chain for a new child of `parent_id`.
    ///
    /// Stops at the first repeated id; the forest invariant makes that
    /// unreachable unless the indexes were corrupted.
    fn closure_under(&self, post_id: &str, parent_id: &str) -> Vec<String> {
        let mut chain = vec![parent_id.to_string()];
        let mut seen: HashSet<&str> = HashSet::from([post_id, parent_id]);

        if let Some(upper) = self.ancestors.get(parent_id) {
            for ancestor in upper {
                if !seen.insert(ancestor.as_str()) {
                    tracing::warn!(post_id, ancestor = %ancestor, "Cycle in ancestor chain");
                    break;
                }
                chain.push(ancestor.clone());
            }
        }

        chain
    }
}

/// Process-local [`Store`] implementation.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    // =========================================================================
    // Actors
    // =========================================================================

    async fn get_actor(&self, id: &str) -> Result<Option<Actor>> {
        Ok(self.tables.read().await.actors.get(id).cloned())
    }

    async fn get_actors(&self, ids: &[String]) -> Result<Vec<Actor>> {
        let tables = self.tables.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.actors.get(id).cloned())
            .collect())
    }

    async fn find_actor_by_remote_id(&self, remote_id: &str) -> Result<Option<Actor>> {
        let tables = self.tables.read().await;
        Ok(tables
            .actor_by_remote
            .get(remote_id)
            .and_then(|id| tables.actors.get(id))
            .cloned())
    }

    async fn find_local_actor_by_handle(&self, handle: &str) -> Result<Option<Actor>> {
        let tables = self.tables.read().await;
        Ok(tables
            .actors
            .values()
            .find(|actor| {
                matches!(actor.kind, ActorKind::Local { .. })
                    && actor.handle.eq_ignore_ascii_case(handle)
            })
            .cloned())
    }

    async fn insert_actor(&self, actor: Actor) -> Result<Actor> {
        let mut tables = self.tables.write().await;

        if let Some(remote_id) = actor.remote_id() {
            if let Some(existing) = tables
                .actor_by_remote
                .get(remote_id)
                .and_then(|id| tables.actors.get(id))
            {
                return Ok(existing.clone());
            }
            tables
                .actor_by_remote
                .insert(remote_id.to_string(), actor.id.clone());
        }

        tables.actors.insert(actor.id.clone(), actor.clone());
        Ok(actor)
    }

    async fn update_actor(&self, actor: &Actor) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.actors.contains_key(&actor.id) {
            return Err(AppError::NotFound);
        }
        tables.actors.insert(actor.id.clone(), actor.clone());
        Ok(())
    }

    async fn delete_actor(&self, id: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(actor) = tables.actors.remove(id) {
            if let Some(remote_id) = actor.remote_id() {
                tables.actor_by_remote.remove(remote_id);
            }
        }
        tables
            .user_blocks
            .retain(|block| block.user_id != id && block.blocked_user_id != id);
        tables.server_blocks.retain(|block| block.user_id != id);
        Ok(())
    }

    async fn list_remote_actors(&self) -> Result<Vec<Actor>> {
        let tables = self.tables.read().await;
        Ok(tables
            .actors
            .values()
            .filter(|actor| actor.is_remote())
            .cloned()
            .collect())
    }

    async fn list_remote_actors_on_host(&self, host_id: &str) -> Result<Vec<Actor>> {
        let tables = self.tables.read().await;
        Ok(tables
            .actors
            .values()
            .filter(|actor| actor.host_id() == Some(host_id))
            .cloned()
            .collect())
    }

    // =========================================================================
    // Federated hosts
    // =========================================================================

    async fn get_host(&self, id: &str) -> Result<Option<FederatedHost>> {
        Ok(self.tables.read().await.hosts.get(id).cloned())
    }

    async fn find_host_by_name(&self, name: &str) -> Result<Option<FederatedHost>> {
        let tables = self.tables.read().await;
        Ok(tables
            .host_by_name
            .get(name)
            .and_then(|id| tables.hosts.get(id))
            .cloned())
    }

    async fn insert_host(&self, host: FederatedHost) -> Result<FederatedHost> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables
            .host_by_name
            .get(&host.display_name)
            .and_then(|id| tables.hosts.get(id))
        {
            return Ok(existing.clone());
        }
        tables
            .host_by_name
            .insert(host.display_name.clone(), host.id.clone());
        tables.hosts.insert(host.id.clone(), host.clone());
        Ok(host)
    }

    async fn update_host(&self, host: &FederatedHost) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.hosts.contains_key(&host.id) {
            return Err(AppError::NotFound);
        }
        tables.hosts.insert(host.id.clone(), host.clone());
        Ok(())
    }

    async fn list_hosts(&self) -> Result<Vec<FederatedHost>> {
        let tables = self.tables.read().await;
        let mut hosts: Vec<FederatedHost> = tables.hosts.values().cloned().collect();
        hosts.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(hosts)
    }

    // =========================================================================
    // Posts
    // =========================================================================

    async fn get_post(&self, id: &str) -> Result<Option<Post>> {
        Ok(self.tables.read().await.posts.get(id).cloned())
    }

    async fn find_post_by_remote_id(&self, remote_id: &str) -> Result<Option<Post>> {
        let tables = self.tables.read().await;
        Ok(tables
            .post_by_remote
            .get(remote_id)
            .and_then(|id| tables.posts.get(id))
            .cloned())
    }

    async fn insert_post(&self, post: Post) -> Result<Post> {
        let mut tables = self.tables.write().await;

        if let Some(existing) = post
            .remote_post_id
            .as_ref()
            .and_then(|remote_id| tables.post_by_remote.get(remote_id))
            .and_then(|id| tables.posts.get(id))
        {
            return Ok(existing.clone());
        }

        let closure = match &post.parent_id {
            Some(parent_id) => {
                if !tables.posts.contains_key(parent_id) {
                    return Err(AppError::Validation(format!(
                        "Parent post {} does not exist",
                        parent_id
                    )));
                }
                tables.closure_under(&post.id, parent_id)
            }
            None => Vec::new(),
        };

        if let Some(parent_id) = &post.parent_id {
            tables
                .children
                .entry(parent_id.clone())
                .or_default()
                .insert(post.id.clone());
        }
        if let Some(remote_id) = &post.remote_post_id {
            tables
                .post_by_remote
                .insert(remote_id.clone(), post.id.clone());
        }
        tables.ancestors.insert(post.id.clone(), closure);
        tables.posts.insert(post.id.clone(), post.clone());

        Ok(post)
    }

    async fn update_post(&self, post: &Post) -> Result<()> {
        let mut tables = self.tables.write().await;
        let parent_id = match tables.posts.get(&post.id) {
            Some(stored) => stored.parent_id.clone(),
            None => return Err(AppError::NotFound),
        };

        let mut updated = post.clone();
        updated.parent_id = parent_id;
        tables.posts.insert(updated.id.clone(), updated);
        Ok(())
    }

    async fn delete_post(&self, id: &str) -> Result<()> {
        let mut tables = self.tables.write().await;

        if tables.children.get(id).is_some_and(|set| !set.is_empty()) {
            return Err(AppError::Validation(format!(
                "Post {} still has replies",
                id
            )));
        }

        let Some(post) = tables.posts.remove(id) else {
            return Ok(());
        };

        if let Some(remote_id) = &post.remote_post_id {
            tables.post_by_remote.remove(remote_id);
        }
        if let Some(parent_id) = &post.parent_id {
            if let Some(siblings) = tables.children.get_mut(parent_id) {
                siblings.remove(id);
            }
        }
        tables.children.remove(id);
        tables.ancestors.remove(id);
        tables.likes.retain(|_, like| like.post_id != id);
        tables.reactions.retain(|_, reaction| reaction.post_id != id);

        Ok(())
    }

    async fn count_children(&self, id: &str) -> Result<usize> {
        let tables = self.tables.read().await;
        Ok(tables.children.get(id).map_or(0, HashSet::len))
    }

    async fn ancestors(&self, id: &str) -> Result<Vec<String>> {
        let tables = self.tables.read().await;
        Ok(tables.ancestors.get(id).cloned().unwrap_or_default())
    }

    async fn list_posts_by_user(&self, user_id: &str) -> Result<Vec<Post>> {
        let tables = self.tables.read().await;
        let mut posts: Vec<Post> = tables
            .posts
            .values()
            .filter(|post| post.user_id == user_id)
            .cloned()
            .collect();
        posts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(posts)
    }

    // =========================================================================
    // Follows
    // =========================================================================

    async fn find_follow(&self, follower_id: &str, followed_id: &str) -> Result<Option<Follow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .follows
            .values()
            .find(|follow| follow.follower_id == follower_id && follow.followed_id == followed_id)
            .cloned())
    }

    async fn find_follow_by_remote_id(&self, remote_id: &str) -> Result<Option<Follow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .follows
            .values()
            .find(|follow| follow.remote_follow_id.as_deref() == Some(remote_id))
            .cloned())
    }

    async fn insert_follow(&self, follow: Follow) -> Result<Follow> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.follows.values().find(|existing| {
            existing.follower_id == follow.follower_id && existing.followed_id == follow.followed_id
        }) {
            return Ok(existing.clone());
        }
        tables.follows.insert(follow.id.clone(), follow.clone());
        Ok(follow)
    }

    async fn update_follow(&self, follow: &Follow) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.follows.contains_key(&follow.id) {
            return Err(AppError::NotFound);
        }
        tables.follows.insert(follow.id.clone(), follow.clone());
        Ok(())
    }

    async fn delete_follow(&self, id: &str) -> Result<()> {
        self.tables.write().await.follows.remove(id);
        Ok(())
    }

    async fn list_followers(&self, followed_id: &str) -> Result<Vec<Follow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .follows
            .values()
            .filter(|follow| follow.followed_id == followed_id)
            .cloned()
            .collect())
    }

    async fn list_following(&self, follower_id: &str) -> Result<Vec<Follow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .follows
            .values()
            .filter(|follow| follow.follower_id == follower_id)
            .cloned()
            .collect())
    }

    async fn delete_follows_involving(&self, actor_id: &str) -> Result<usize> {
        let mut tables = self.tables.write().await;
        let before = tables.follows.len();
        tables
            .follows
            .retain(|_, follow| follow.follower_id != actor_id && follow.followed_id != actor_id);
        Ok(before - tables.follows.len())
    }

    // =========================================================================
    // Likes and reactions
    // =========================================================================

    async fn find_like_by_remote_id(&self, remote_id: &str) -> Result<Option<Like>> {
        let tables = self.tables.read().await;
        Ok(tables
            .likes
            .values()
            .find(|like| like.remote_id.as_deref() == Some(remote_id))
            .cloned())
    }

    async fn find_like(&self, user_id: &str, post_id: &str) -> Result<Option<Like>> {
        let tables = self.tables.read().await;
        Ok(tables
            .likes
            .values()
            .find(|like| like.user_id == user_id && like.post_id == post_id)
            .cloned())
    }

    async fn insert_like(&self, like: Like) -> Result<Like> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables
            .likes
            .values()
            .find(|existing| existing.user_id == like.user_id && existing.post_id == like.post_id)
        {
            return Ok(existing.clone());
        }
        tables.likes.insert(like.id.clone(), like.clone());
        Ok(like)
    }

    async fn delete_like(&self, id: &str) -> Result<()> {
        self.tables.write().await.likes.remove(id);
        Ok(())
    }

    async fn delete_likes_by_user(&self, user_id: &str) -> Result<usize> {
        let mut tables = self.tables.write().await;
        let before = tables.likes.len();
        tables.likes.retain(|_, like| like.user_id != user_id);
        Ok(before - tables.likes.len())
    }

    async fn find_reaction_by_remote_id(&self, remote_id: &str) -> Result<Option<EmojiReaction>> {
        let tables = self.tables.read().await;
        Ok(tables
            .reactions
            .values()
            .find(|reaction| reaction.remote_id.as_deref() == Some(remote_id))
            .cloned())
    }

    async fn insert_reaction(&self, reaction: EmojiReaction) -> Result<EmojiReaction> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = reaction.remote_id.as_deref().and_then(|remote_id| {
            tables
                .reactions
                .values()
                .find(|existing| existing.remote_id.as_deref() == Some(remote_id))
        }) {
            return Ok(existing.clone());
        }
        tables
            .reactions
            .insert(reaction.id.clone(), reaction.clone());
        Ok(reaction)
    }

    async fn delete_reactions_by_user(&self, user_id: &str) -> Result<usize> {
        let mut tables = self.tables.write().await;
        let before = tables.reactions.len();
        tables
            .reactions
            .retain(|_, reaction| reaction.user_id != user_id);
        Ok(before - tables.reactions.len())
    }

    // =========================================================================
    // Emoji and media
    // =========================================================================

    async fn find_emoji_by_remote_id(&self, remote_id: &str) -> Result<Option<Emoji>> {
        let tables = self.tables.read().await;
        Ok(tables
            .emojis
            .values()
            .find(|emoji| emoji.external.as_deref() == Some(remote_id))
            .cloned())
    }

    async fn insert_emoji(&self, emoji: Emoji) -> Result<Emoji> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = emoji.external.as_deref().and_then(|remote_id| {
            tables
                .emojis
                .values()
                .find(|existing| existing.external.as_deref() == Some(remote_id))
        }) {
            return Ok(existing.clone());
        }
        tables.emojis.insert(emoji.id.clone(), emoji.clone());
        Ok(emoji)
    }

    async fn insert_media(&self, media: Media) -> Result<Media> {
        self.tables
            .write()
            .await
            .media
            .insert(media.id.clone(), media.clone());
        Ok(media)
    }

    async fn get_media(&self, id: &str) -> Result<Option<Media>> {
        Ok(self.tables.read().await.media.get(id).cloned())
    }

    // =========================================================================
    // Blocks
    // =========================================================================

    async fn insert_user_block(&self, block: UserBlock) -> Result<()> {
        self.tables.write().await.user_blocks.push(block);
        Ok(())
    }

    async fn insert_server_block(&self, block: ServerBlock) -> Result<()> {
        self.tables.write().await.server_blocks.push(block);
        Ok(())
    }

    async fn is_actor_blocked_by(&self, local_id: &str, actor_id: &str) -> Result<bool> {
        let tables = self.tables.read().await;
        Ok(tables
            .user_blocks
            .iter()
            .any(|block| block.user_id == local_id && block.blocked_user_id == actor_id))
    }

    async fn is_host_blocked_by(&self, local_id: &str, host_id: &str) -> Result<bool> {
        let tables = self.tables.read().await;
        Ok(tables
            .server_blocks
            .iter()
            .any(|block| block.user_id == local_id && block.blocked_host_id == host_id))
    }
}
