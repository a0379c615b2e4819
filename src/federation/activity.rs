//! Activity envelope model
//!
//! Inbound JSON is parsed once into a closed set of variants. Types the
//! engine does not act on land in an `Other` variant instead of failing.

use serde_json::Value;

/// Addressing target meaning "everyone".
pub const PUBLIC_COLLECTION: &str = "https://www.w3.org/ns/activitystreams#Public";

/// A parsed inbound activity.
#[derive(Debug, Clone)]
pub struct Activity {
    /// Activity id; used as the idempotency key of the record it creates
    pub id: Option<String>,
    /// Acting actor URL
    pub actor: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub kind: ActivityKind,
    /// Envelope as received, echoed back in acknowledgments
    pub raw: Value,
}

#[derive(Debug, Clone)]
pub enum ActivityKind {
    Follow { object: String },
    Accept { object: AcceptedObject },
    Undo(UndoTarget),
    Like { object: String },
    Create(CreatedObject),
    Announce { object: Option<String> },
    Update(UpdatedObject),
    Delete(DeleteTarget),
    EmojiReact {
        object: String,
        content: String,
        emoji: Option<EmojiTag>,
    },
    Add { object: String },
    Move { target: String },
    Other { kind: String },
}

/// Object of an `Accept`; only accepted follows are acted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptedObject {
    Follow { id: String },
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoTarget {
    Follow { id: String },
    Like { id: String },
    Announce { id: String },
    Other { kind: String },
}

/// Object kinds that become posts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostKind {
    Note,
    ChatMessage,
    Question,
}

impl PostKind {
    fn parse(kind: &str) -> Option<Self> {
        match kind {
            "Note" => Some(PostKind::Note),
            "ChatMessage" => Some(PostKind::ChatMessage),
            "Question" => Some(PostKind::Question),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum CreatedObject {
    Post { kind: PostKind, id: String, object: Value },
    Other { kind: String },
}

#[derive(Debug, Clone)]
pub enum UpdatedObject {
    Note { id: String, object: Value },
    Question { id: String, object: Value },
    Person { id: String },
    Other { kind: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteTarget {
    /// Bare id: the actor itself is gone
    Actor { id: String },
    Tombstone { id: String },
    Other { kind: String },
}

/// Custom emoji attached to a reaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmojiTag {
    pub id: String,
    pub name: String,
    pub icon_url: String,
}

/// Why an envelope could not be parsed at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
}

impl Activity {
    /// Parse an envelope. Only `type` and `actor` are required up front;
    /// a variant whose own fields are missing is a `ParseError` too.
    pub fn from_value(raw: Value) -> Result<Self, ParseError> {
        let kind_name = str_field(&raw, "type").ok_or(ParseError::MissingField("type"))?;
        let actor = str_field(&raw, "actor").ok_or(ParseError::MissingField("actor"))?;
        let object = raw.get("object").cloned().unwrap_or(Value::Null);

        let kind = match kind_name.as_str() {
            "Follow" => ActivityKind::Follow {
                object: object_id(&object).ok_or(ParseError::MissingField("object"))?,
            },
            "Accept" => ActivityKind::Accept {
                object: match (str_field(&object, "type").as_deref(), str_field(&object, "id")) {
                    (Some("Follow"), Some(id)) => AcceptedObject::Follow { id },
                    _ => AcceptedObject::Other,
                },
            },
            "Undo" => ActivityKind::Undo(parse_undo(&object)),
            "Like" => ActivityKind::Like {
                object: object_id(&object).ok_or(ParseError::MissingField("object"))?,
            },
            "Create" => ActivityKind::Create(parse_created(&object)?),
            "Announce" => ActivityKind::Announce {
                object: announced_url(&object),
            },
            "Update" => ActivityKind::Update(parse_updated(&object)?),
            "Delete" => ActivityKind::Delete(parse_delete(&object)),
            "EmojiReact" => ActivityKind::EmojiReact {
                object: object_id(&object).ok_or(ParseError::MissingField("object"))?,
                content: str_field(&raw, "content").unwrap_or_default(),
                emoji: single_emoji_tag(&raw),
            },
            "Add" => ActivityKind::Add {
                object: object_id(&object).ok_or(ParseError::MissingField("object"))?,
            },
            "Move" => ActivityKind::Move {
                target: str_field(&raw, "target")
                    .or_else(|| object_id(&object))
                    .ok_or(ParseError::MissingField("target"))?,
            },
            other => ActivityKind::Other {
                kind: other.to_string(),
            },
        };

        Ok(Self {
            id: str_field(&raw, "id"),
            actor,
            to: addresses(&raw, "to"),
            cc: addresses(&raw, "cc"),
            kind,
            raw,
        })
    }

    pub fn type_name(&self) -> &str {
        match &self.kind {
            ActivityKind::Follow { .. } => "Follow",
            ActivityKind::Accept { .. } => "Accept",
            ActivityKind::Undo(_) => "Undo",
            ActivityKind::Like { .. } => "Like",
            ActivityKind::Create(_) => "Create",
            ActivityKind::Announce { .. } => "Announce",
            ActivityKind::Update(_) => "Update",
            ActivityKind::Delete(_) => "Delete",
            ActivityKind::EmojiReact { .. } => "EmojiReact",
            ActivityKind::Add { .. } => "Add",
            ActivityKind::Move { .. } => "Move",
            ActivityKind::Other { kind } => kind,
        }
    }
}

/// Actor whose own document was deleted, signalled by an id of
/// `{actor}#delete`. Post deletions use the same suffix on the post URL, so
/// the stripped id must be the acting actor.
pub fn self_deleted_actor(raw: &Value) -> Option<String> {
    if str_field(raw, "type").as_deref() != Some("Delete") {
        return None;
    }
    let id = str_field(raw, "id")?;
    let actor = str_field(raw, "actor")?;
    id.strip_suffix("#delete")
        .filter(|stripped| *stripped == actor)
        .map(str::to_string)
}

/// URL of the boosted object. Some servers wrap the boosted object in
/// another activity, so one extra level of `object` is unwrapped.
pub fn announced_url(object: &Value) -> Option<String> {
    match object {
        Value::String(url) => Some(url.clone()),
        Value::Object(map) => match map.get("object") {
            Some(inner) => object_id(inner),
            None => str_field(object, "id"),
        },
        _ => None,
    }
}

fn parse_undo(object: &Value) -> UndoTarget {
    let Some(kind) = str_field(object, "type") else {
        return UndoTarget::Other {
            kind: "unknown".to_string(),
        };
    };
    let Some(id) = str_field(object, "id") else {
        return UndoTarget::Other { kind };
    };
    match kind.as_str() {
        "Follow" => UndoTarget::Follow { id },
        "Like" => UndoTarget::Like { id },
        "Announce" => UndoTarget::Announce { id },
        _ => UndoTarget::Other { kind },
    }
}

fn parse_created(object: &Value) -> Result<CreatedObject, ParseError> {
    let kind = str_field(object, "type").unwrap_or_else(|| "unknown".to_string());
    match PostKind::parse(&kind) {
        Some(post_kind) => Ok(CreatedObject::Post {
            kind: post_kind,
            id: str_field(object, "id").ok_or(ParseError::MissingField("object.id"))?,
            object: object.clone(),
        }),
        None => Ok(CreatedObject::Other { kind }),
    }
}

fn parse_updated(object: &Value) -> Result<UpdatedObject, ParseError> {
    let kind = str_field(object, "type").unwrap_or_else(|| "unknown".to_string());
    let id = || str_field(object, "id").ok_or(ParseError::MissingField("object.id"));
    Ok(match kind.as_str() {
        "Note" => UpdatedObject::Note {
            id: id()?,
            object: object.clone(),
        },
        "Question" => UpdatedObject::Question {
            id: id()?,
            object: object.clone(),
        },
        "Person" | "Service" | "Application" | "Group" => UpdatedObject::Person { id: id()? },
        _ => UpdatedObject::Other { kind },
    })
}

fn parse_delete(object: &Value) -> DeleteTarget {
    match object {
        Value::String(id) => DeleteTarget::Actor { id: id.clone() },
        _ => match (str_field(object, "type"), str_field(object, "id")) {
            (Some(kind), Some(id)) if kind == "Tombstone" => DeleteTarget::Tombstone { id },
            (Some(kind), _) => DeleteTarget::Other { kind },
            (None, _) => DeleteTarget::Other {
                kind: "unknown".to_string(),
            },
        },
    }
}

fn single_emoji_tag(raw: &Value) -> Option<EmojiTag> {
    let tags = raw.get("tag")?.as_array()?;
    let [tag] = tags.as_slice() else {
        return None;
    };
    let icon_url = tag.get("icon").and_then(|icon| str_field(icon, "url"))?;
    Some(EmojiTag {
        id: str_field(tag, "id")?,
        name: str_field(tag, "name").unwrap_or_default(),
        icon_url,
    })
}

/// `object` as an id: either the string itself or the nested `id`.
pub fn object_id(object: &Value) -> Option<String> {
    match object {
        Value::String(id) => Some(id.clone()),
        Value::Object(_) => str_field(object, "id"),
        _ => None,
    }
}

pub fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Addressing fields may be a single string or a list.
pub fn addresses(value: &Value, key: &str) -> Vec<String> {
    match value.get(key) {
        Some(Value::String(target)) => vec![target.clone()],
        Some(Value::Array(targets)) => targets
            .iter()
            .filter_map(|target| target.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}
