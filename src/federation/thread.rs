//! Thread resolution
//!
//! Turns a post URL (and optionally the object that arrived inline) into a
//! stored post, creating unknown ancestors first so the ancestor index can
//! be extended from the parent on insert.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

use super::activity::{addresses, object_id, str_field};
use super::context::FederationContext;
use super::emoji::{emoji_tags, import_emojis};
use super::resolver::{ActorResolver, ResolveOptions};
use super::transport::Transport;
use crate::data::{Actor, Media, Poll, PollOption, Post, Store, Visibility, new_id};
use crate::error::Result;

#[async_trait]
pub trait ThreadResolver: Send + Sync {
    /// Stored post for `url`, fetching and creating it and its ancestors
    /// when unknown. `inline` is used instead of fetching when the object
    /// arrived with the activity. `None` when the post cannot be obtained.
    async fn resolve_post(
        &self,
        asking: &Actor,
        url: &str,
        inline: Option<&Value>,
    ) -> Result<Option<Post>>;

    /// Copy the poll state of a `Question` onto `post`.
    async fn merge_poll(&self, question: &Value, post: &Post) -> Result<()>;
}

/// [`ThreadResolver`] that fetches over the signed transport.
#[derive(Clone)]
pub struct RemoteThreadResolver {
    ctx: Arc<FederationContext>,
    store: Arc<dyn Store>,
    actors: ActorResolver,
    transport: Arc<dyn Transport>,
}

impl RemoteThreadResolver {
    pub fn new(
        ctx: Arc<FederationContext>,
        store: Arc<dyn Store>,
        actors: ActorResolver,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            ctx,
            store,
            actors,
            transport,
        }
    }

    fn resolve_at<'a>(
        &'a self,
        asking: &'a Actor,
        url: &'a str,
        inline: Option<&'a Value>,
        depth: u32,
    ) -> BoxFuture<'a, Result<Option<Post>>> {
        Box::pin(async move {
            if self.ctx.is_local_url(url) {
                return match self.ctx.local_post_id(url) {
                    Some(id) => self.store.get_post(id).await,
                    None => Ok(None),
                };
            }

            if let Some(existing) = self.store.find_post_by_remote_id(url).await? {
                return Ok(Some(existing));
            }

            if depth >= self.ctx.max_resolve_depth {
                tracing::debug!(post = %url, depth, "Thread depth exceeded");
                return Ok(None);
            }

            let object = match inline {
                Some(object) => object.clone(),
                None => match self
                    .transport
                    .fetch_json(url, &self.ctx.fetch_signer(asking)?)
                    .await
                {
                    Ok(object) => object,
                    Err(error) if error.is_retryable() => return Err(error),
                    Err(error) => {
                        tracing::trace!(post = %url, error = %error, "Could not fetch remote post");
                        return Ok(None);
                    }
                },
            };

            self.create_post(asking, url, &object, depth).await
        })
    }

    async fn create_post(
        &self,
        asking: &Actor,
        url: &str,
        object: &Value,
        depth: u32,
    ) -> Result<Option<Post>> {
        let Some(author_url) = object.get("attributedTo").and_then(first_id) else {
            tracing::debug!(post = %url, "Remote post without author");
            return Ok(None);
        };
        let nested = ResolveOptions {
            depth: depth + 1,
            force_refresh: false,
        };
        let author = self.actors.resolve_with(&author_url, asking, nested).await?;
        if self.ctx.is_unreachable(&author) {
            tracing::debug!(post = %url, author = %author_url, "Author unreachable, post dropped");
            return Ok(None);
        }

        let parent = match object.get("inReplyTo").and_then(object_id) {
            Some(parent_url) => {
                let parent = self.resolve_at(asking, &parent_url, None, depth + 1).await?;
                if parent.is_none() {
                    tracing::debug!(post = %url, parent = %parent_url, "Parent unavailable, stored as root");
                }
                parent
            }
            None => None,
        };

        let tags = emoji_tags(object);
        let (media_ids, mentioned_user_ids, emojis) = futures::join!(
            import_attachments(self.store.as_ref(), object, &author.id),
            self.resolve_mentions(asking, object, nested),
            import_emojis(self.store.as_ref(), &tags),
        );

        let mut post = Post::new(
            author.id.clone(),
            ammonia::clean(&str_field(object, "content").unwrap_or_default()),
        );
        post.parent_id = parent.map(|parent| parent.id);
        post.remote_post_id = Some(url.to_string());
        post.visibility =
            Visibility::from_addressing(&addresses(object, "to"), &addresses(object, "cc"));
        post.content_warning = str_field(object, "summary").unwrap_or_default();
        post.media_ids = media_ids?;
        post.mentioned_user_ids = mentioned_user_ids?;
        post.emoji_ids = emojis.into_iter().map(|emoji| emoji.id).collect();
        post.tags = hashtags(object);
        post.poll = poll_from_question(object);
        if let Some(published) = timestamp(object, "published") {
            post.created_at = published;
            post.updated_at = timestamp(object, "updated").unwrap_or(published);
        }

        let post = self.store.insert_post(post).await?;
        tracing::debug!(post = %url, post_id = %post.id, "Stored remote post");
        Ok(Some(post))
    }

    async fn resolve_mentions(
        &self,
        asking: &Actor,
        object: &Value,
        options: ResolveOptions,
    ) -> Result<Vec<String>> {
        let Some(tags) = object.get("tag").and_then(Value::as_array) else {
            return Ok(Vec::new());
        };
        let hrefs: Vec<String> = tags
            .iter()
            .filter(|tag| str_field(tag, "type").as_deref() == Some("Mention"))
            .filter_map(|tag| str_field(tag, "href"))
            .collect();

        let resolved = futures::future::join_all(
            hrefs
                .iter()
                .map(|href| self.actors.resolve_with(href, asking, options)),
        )
        .await;

        let mut ids = Vec::new();
        for actor in resolved {
            let actor = actor?;
            if !self.ctx.is_unreachable(&actor) && !ids.contains(&actor.id) {
                ids.push(actor.id);
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl ThreadResolver for RemoteThreadResolver {
    async fn resolve_post(
        &self,
        asking: &Actor,
        url: &str,
        inline: Option<&Value>,
    ) -> Result<Option<Post>> {
        self.resolve_at(asking, url, inline, 0).await
    }

    async fn merge_poll(&self, question: &Value, post: &Post) -> Result<()> {
        let Some(poll) = poll_from_question(question) else {
            return Ok(());
        };
        if post.poll.as_ref() == Some(&poll) {
            return Ok(());
        }
        let mut updated = post.clone();
        updated.poll = Some(poll);
        self.store.update_post(&updated).await
    }
}

/// Store every `attachment` of `object` as external media owned by
/// `owner_id` and return the new ids.
pub async fn import_attachments(
    store: &dyn Store,
    object: &Value,
    owner_id: &str,
) -> Result<Vec<String>> {
    let Some(attachments) = object.get("attachment").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    let nsfw = object
        .get("sensitive")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let mut ids = Vec::with_capacity(attachments.len());
    for attachment in attachments {
        let Some(url) = attachment.get("url").and_then(first_id).or_else(|| str_field(attachment, "href")) else {
            continue;
        };
        let media = store
            .insert_media(Media {
                id: new_id(),
                user_id: owner_id.to_string(),
                url,
                nsfw,
                description: str_field(attachment, "name").unwrap_or_default(),
                external: true,
            })
            .await?;
        ids.push(media.id);
    }
    Ok(ids)
}

/// Poll carried by a `Question`: `oneOf` for single choice, `anyOf` for
/// multiple choice, votes from `replies.totalItems`.
pub fn poll_from_question(object: &Value) -> Option<Poll> {
    let (choices, multiple_choice) = match (object.get("oneOf"), object.get("anyOf")) {
        (Some(Value::Array(choices)), _) => (choices, false),
        (_, Some(Value::Array(choices))) => (choices, true),
        _ => return None,
    };

    let options = choices
        .iter()
        .map(|choice| PollOption {
            title: str_field(choice, "name").unwrap_or_default(),
            votes: choice
                .get("replies")
                .and_then(|replies| replies.get("totalItems"))
                .and_then(Value::as_u64)
                .unwrap_or(0),
        })
        .collect();

    let end_time = timestamp(object, "endTime");
    let closed = object.get("closed").is_some_and(|closed| !closed.is_null())
        || end_time.is_some_and(|end| end <= Utc::now());

    Some(Poll {
        multiple_choice,
        end_time,
        closed,
        options,
    })
}

fn hashtags(object: &Value) -> Vec<String> {
    object
        .get("tag")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter(|tag| str_field(tag, "type").as_deref() == Some("Hashtag"))
                .filter_map(|tag| str_field(tag, "name"))
                .map(|name| name.trim_start_matches('#').to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// A string, the `id`/`href` of an object, or the first such entry of an array.
fn first_id(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => items.iter().find_map(first_id),
        Value::Object(_) => str_field(value, "id").or_else(|| str_field(value, "href")),
        _ => object_id(value),
    }
}

pub(crate) fn timestamp(object: &Value, key: &str) -> Option<DateTime<Utc>> {
    str_field(object, key)
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
}
