//! JSON frames exchanged over the event-stream WebSocket.
//!
//! Handshake: `hello` → `welcome` (or `rejected`), then `join` → `joined`.
//! After that the server pushes `event` frames scoped to the joined household
//! and to the authenticated user.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::EventEnvelope;
use crate::ids::{HouseholdId, UserId};

/// Frames sent by the client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ClientFrame {
    Hello {
        token: String,
    },
    #[serde(rename_all = "camelCase")]
    Join {
        household_id: HouseholdId,
    },
    Leave,
    Emit {
        #[serde(rename = "type")]
        event_type: String,
        #[serde(default)]
        data: Value,
    },
}

/// Frames sent by the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ServerFrame {
    #[serde(rename_all = "camelCase")]
    Welcome {
        user_id: UserId,
    },
    Rejected {
        reason: String,
    },
    #[serde(rename_all = "camelCase")]
    Joined {
        household_id: HouseholdId,
    },
    Event(EventEnvelope),
    Error {
        message: String,
    },
}

impl ClientFrame {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ServerFrame {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::Rejected { .. } => "rejected",
            Self::Joined { .. } => "joined",
            Self::Event(_) => "event",
            Self::Error { .. } => "error",
        }
    }
}

/// Who receives a published envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum Audience {
    Household(HouseholdId),
    User(UserId),
}

/// An envelope addressed to an audience, as fed into the hub.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub audience: Audience,
    pub envelope: EventEnvelope,
}

impl Delivery {
    pub fn household(household_id: HouseholdId, envelope: EventEnvelope) -> Self {
        Self {
            audience: Audience::Household(household_id),
            envelope,
        }
    }

    pub fn user(user_id: UserId, envelope: EventEnvelope) -> Self {
        Self {
            audience: Audience::User(user_id),
            envelope,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hello_frame_shape() {
        let json = ClientFrame::Hello { token: "T1".into() }.to_json().unwrap();
        assert_eq!(json, r#"{"kind":"hello","token":"T1"}"#);
    }

    #[test]
    fn join_frame_uses_camel_case() {
        let value = serde_json::to_value(ClientFrame::Join {
            household_id: HouseholdId::from_raw("H1"),
        })
        .unwrap();
        assert_eq!(value, json!({"kind": "join", "householdId": "H1"}));
    }

    #[test]
    fn emit_frame_renames_type() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"kind":"emit","type":"typing","data":{"listId":"L1"}}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Emit {
                event_type: "typing".into(),
                data: json!({"listId": "L1"}),
            }
        );
    }

    #[test]
    fn event_frame_flattens_envelope() {
        let frame = ServerFrame::Event(EventEnvelope::new(
            "item.added",
            "H1",
            json!({"itemId": "I1"}),
        ));
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["kind"], "event");
        assert_eq!(value["type"], "item.added");
        assert_eq!(value["scopeId"], "H1");

        let parsed: ServerFrame = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, frame);
        assert_eq!(parsed.kind(), "event");
    }

    #[test]
    fn welcome_frame_parses() {
        let frame: ServerFrame = serde_json::from_str(r#"{"kind":"welcome","userId":"U1"}"#).unwrap();
        assert_eq!(
            frame,
            ServerFrame::Welcome {
                user_id: UserId::from_raw("U1")
            }
        );
    }

    #[test]
    fn delivery_audience_shape() {
        let delivery = Delivery::user(
            UserId::from_raw("U1"),
            EventEnvelope::new("notification.new", "U1", json!({"itemId": "N1"})),
        );
        let value = serde_json::to_value(&delivery).unwrap();
        assert_eq!(value["audience"], json!({"kind": "user", "id": "U1"}));
    }
}
