use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single entity record as held in the read cache. The `id` field carries identity.
pub type Record = serde_json::Map<String, Value>;

/// Domain-change notification as it arrives over the event stream.
///
/// Routed by `event_type`, filtered by `scope_id` (household, list or user
/// depending on the event family). Never mutated after receipt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub scope_id: String,
    #[serde(default)]
    pub payload: Value,
}

impl EventEnvelope {
    pub fn new(event_type: impl Into<String>, scope_id: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            scope_id: scope_id.into(),
            payload,
        }
    }

    /// Known event type, if the name is one the sync layer understands.
    pub fn kind(&self) -> Option<EventType> {
        EventType::parse(&self.event_type)
    }

    /// Decode the payload as an item add/update/delete payload.
    pub fn item_payload(&self) -> Result<ItemEventPayload, PayloadError> {
        ItemEventPayload::from_value(&self.payload)
    }
}

/// Event names consumed by the synchronizers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    ItemAdded,
    ItemUpdated,
    ItemDeleted,
    ShoppingListItemAdded,
    ShoppingListItemUpdated,
    ShoppingListItemDeleted,
    NotificationNew,
}

impl EventType {
    pub const ALL: [EventType; 7] = [
        Self::ItemAdded,
        Self::ItemUpdated,
        Self::ItemDeleted,
        Self::ShoppingListItemAdded,
        Self::ShoppingListItemUpdated,
        Self::ShoppingListItemDeleted,
        Self::NotificationNew,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ItemAdded => "item.added",
            Self::ItemUpdated => "item.updated",
            Self::ItemDeleted => "item.deleted",
            Self::ShoppingListItemAdded => "shoppinglist.item.added",
            Self::ShoppingListItemUpdated => "shoppinglist.item.updated",
            Self::ShoppingListItemDeleted => "shoppinglist.item.deleted",
            Self::NotificationNew => "notification.new",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{ itemId, item? }` for add/update, `{ itemId }` for delete.
///
/// Decoded with [`from_value`](Self::from_value); unknown payload fields are ignored.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemEventPayload {
    pub item_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<Record>,
}

/// Keys that may carry the entity id, highest precedence first.
const ID_KEYS: [&str; 3] = ["itemId", "notificationId", "id"];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("payload has no itemId")]
    MissingId,
    #[error("payload field `{0}` is not a string")]
    InvalidId(&'static str),
    #[error("payload has an empty itemId")]
    EmptyId,
    #[error("payload field `item` is not an object")]
    InvalidItem,
}

impl ItemEventPayload {
    pub fn from_value(value: &Value) -> Result<Self, PayloadError> {
        let object = value.as_object().ok_or(PayloadError::NotAnObject)?;

        let (key, raw_id) = ID_KEYS
            .iter()
            .find_map(|key| object.get(*key).map(|v| (*key, v)))
            .ok_or(PayloadError::MissingId)?;
        let item_id = raw_id.as_str().ok_or(PayloadError::InvalidId(key))?;
        if item_id.is_empty() {
            return Err(PayloadError::EmptyId);
        }

        let item = match object.get("item") {
            None | Some(Value::Null) => None,
            Some(Value::Object(fields)) => Some(fields.clone()),
            Some(_) => return Err(PayloadError::InvalidItem),
        };

        Ok(Self {
            item_id: item_id.to_string(),
            item,
        })
    }

    /// Full record for insertion: the attached fields with `id` forced to `item_id`.
    pub fn to_record(&self) -> Record {
        let mut record = self.item.clone().unwrap_or_default();
        let _ = record.insert("id".into(), Value::String(self.item_id.clone()));
        record
    }
}
