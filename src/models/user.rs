use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A chat user. `external_id` is the opaque identifier issued by the chat
/// platform; it is the only identity the transport layer ever sees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub external_id: String,
    pub display_name: String,
    pub created_at: DateTime<FixedOffset>,
}
