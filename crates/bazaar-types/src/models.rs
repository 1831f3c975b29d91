use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user as it leaves the server. Carries no password field; the hash only
/// exists on the DB row type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub phone_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A buyer/seller thread, optionally anchored to one product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub product_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.buyer_id == user_id || self.seller_id == user_id
    }

    pub fn participants(&self) -> [Uuid; 2] {
        [self.buyer_id, self.seller_id]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_json_never_carries_a_password() {
        let user = User {
            id: Uuid::new_v4(),
            username: "alice".into(),
            phone_number: Some("09120000000".into()),
            created_at: Utc::now(),
        };

        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password").is_none());
        assert_eq!(json["phoneNumber"], "09120000000");
        assert!(json.get("createdAt").is_some());
    }

    #[test]
    fn participant_check_covers_both_sides() {
        let buyer = Uuid::new_v4();
        let seller = Uuid::new_v4();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            buyer_id: buyer,
            seller_id: seller,
            product_id: None,
            created_at: Utc::now(),
        };

        assert!(conversation.is_participant(buyer));
        assert!(conversation.is_participant(seller));
        assert!(!conversation.is_participant(Uuid::new_v4()));
    }
}
