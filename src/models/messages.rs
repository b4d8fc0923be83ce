use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::presence::{PeerRecord, PeerSlot};

/// One live awareness record as seen by the relay.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct SlotState {
    #[schema(value_type = u64)]
    pub slot: PeerSlot,
    #[schema(value_type = Object)]
    pub record: PeerRecord,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PublishMessage {
    pub record: PeerRecord,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "publish")]
    Publish(PublishMessage),
    #[serde(rename = "clear")]
    Clear,
    #[serde(rename = "ping")]
    Ping,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WelcomeMessage {
    pub slot: PeerSlot,
    pub states: Vec<SlotState>,
}

/// A record was written (`Some`) or removed (`None`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StateMessage {
    pub slot: PeerSlot,
    pub record: Option<PeerRecord>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PongMessage {
    pub date: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "welcome")]
    Welcome(WelcomeMessage),
    #[serde(rename = "state")]
    State(StateMessage),
    #[serde(rename = "pong")]
    Pong(PongMessage),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_messages_use_type_tag() {
        let clear: ClientMessage = serde_json::from_value(json!({"type": "clear"})).unwrap();
        assert_eq!(clear, ClientMessage::Clear);

        let publish: ClientMessage = serde_json::from_value(json!({
            "type": "publish",
            "record": {
                "user": {"id": "alice", "name": "Alice", "color": "#4B2995"},
                "cursor": {"anchor": 3, "head": 7}
            }
        }))
        .unwrap();
        let ClientMessage::Publish(PublishMessage { record }) = publish else {
            panic!("expected publish");
        };
        assert_eq!(record.display_name(), Some("Alice"));
        assert_eq!(record.marker, None);
    }

    #[test]
    fn removed_state_serializes_null_record() {
        let message = ServerMessage::State(StateMessage { slot: 4, record: None });
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"type": "state", "slot": 4, "record": null})
        );
    }
}
