//! Custom emoji import
//!
//! `Emoji` tags on actor documents and posts are stored by their remote id
//! the first time they are seen.

use serde_json::Value;

use super::activity::{EmojiTag, str_field};
use crate::data::{Emoji, Store, new_id};
use crate::error::Result;

/// `Emoji` entries of a document's `tag` array. Tags without an id or an
/// icon are ignored.
pub fn emoji_tags(document: &Value) -> Vec<EmojiTag> {
    let Some(tags) = document.get("tag").and_then(Value::as_array) else {
        return Vec::new();
    };
    tags.iter()
        .filter(|tag| str_field(tag, "type").as_deref() == Some("Emoji"))
        .filter_map(|tag| {
            Some(EmojiTag {
                id: str_field(tag, "id")?,
                name: str_field(tag, "name").unwrap_or_default(),
                icon_url: tag.get("icon").and_then(|icon| str_field(icon, "url"))?,
            })
        })
        .collect()
}

/// Existing emoji with the tag's remote id, or a newly stored one.
pub async fn get_or_create_emoji(store: &dyn Store, tag: &EmojiTag) -> Result<Emoji> {
    if let Some(existing) = store.find_emoji_by_remote_id(&tag.id).await? {
        return Ok(existing);
    }
    store
        .insert_emoji(Emoji {
            id: new_id(),
            name: tag.name.clone(),
            url: tag.icon_url.clone(),
            external: Some(tag.id.clone()),
        })
        .await
}

/// Import every tag, skipping the ones that fail.
pub async fn import_emojis(store: &dyn Store, tags: &[EmojiTag]) -> Vec<Emoji> {
    let mut imported = Vec::with_capacity(tags.len());
    for tag in tags {
        match get_or_create_emoji(store, tag).await {
            Ok(emoji) => imported.push(emoji),
            Err(error) => {
                tracing::debug!(emoji = %tag.id, error = %error, "Emoji import failed");
            }
        }
    }
    imported
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_emoji_tags_ignores_other_tags() {
        let document = json!({
            "tag": [
                { "type": "Hashtag", "name": "#rust" },
                {
                    "type": "Emoji",
                    "id": "https://remote.example/emojis/blobcat",
                    "name": ":blobcat:",
                    "icon": { "url": "https://remote.example/files/blobcat.png" }
                },
                { "type": "Emoji", "id": "https://remote.example/emojis/noicon" }
            ]
        });

        let tags = emoji_tags(&document);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].name, ":blobcat:");
    }

    #[tokio::test]
    async fn test_import_is_idempotent_by_remote_id() {
        let store = MemoryStore::new();
        let tag = EmojiTag {
            id: "https://remote.example/emojis/blobcat".to_string(),
            name: ":blobcat:".to_string(),
            icon_url: "https://remote.example/files/blobcat.png".to_string(),
        };

        let first = import_emojis(&store, std::slice::from_ref(&tag)).await;
        let second = import_emojis(&store, &[tag]).await;

        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, second[0].id);
        assert_eq!(
            first[0].external.as_deref(),
            Some("https://remote.example/emojis/blobcat")
        );
    }
}
