//! Request and response types for payment intents.

use serde::{Deserialize, Serialize};

use pledge_core::{Currency, IssueId, OrganizationId, PaymentReference, RepositoryId, UserId};

/// Intent lifecycle status as reported by the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
}

impl IntentStatus {
    /// Whether the processor has settled the payment.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Whether the payer's payment method is saved for later charges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupFutureUsage {
    OnSession,
    OffSession,
}

/// Attribution metadata attached to a pledge payment intent.
///
/// Carried by the processor between intent creation and record creation;
/// `issue_id` is required to create a pledge, and `user_id` /
/// `anonymous_email` tell who paid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PledgeIntentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<IssueId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_id: Option<RepositoryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<OrganizationId>,
    /// Set when an authenticated user created the intent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// Set when an anonymous payer created the intent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymous_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_behalf_of_organization_id: Option<OrganizationId>,
}

/// Parameters for creating an intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateIntent {
    /// Amount to charge, in minor units, fee included.
    pub amount: i64,
    pub currency: Currency,
    pub receipt_email: Option<String>,
    pub setup_future_usage: Option<SetupFutureUsage>,
    pub metadata: PledgeIntentMetadata,
}

/// Parameters for modifying an existing intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyIntent {
    /// New amount to charge, in minor units, fee included.
    pub amount: i64,
    pub receipt_email: Option<String>,
    pub setup_future_usage: Option<SetupFutureUsage>,
    pub on_behalf_of_organization_id: Option<OrganizationId>,
}

/// What create/modify return: enough for the client to confirm payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentHandle {
    pub id: PaymentReference,
    pub client_secret: Option<String>,
    pub currency: Currency,
}

/// The processor's authoritative view of an intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: PaymentReference,
    pub status: IntentStatus,
    pub amount: i64,
    pub currency: Currency,
    pub receipt_email: Option<String>,
    pub client_secret: Option<String>,
    pub setup_future_usage: Option<SetupFutureUsage>,
    #[serde(default)]
    pub metadata: PledgeIntentMetadata,
}

impl PaymentIntent {
    /// The create/modify view of this intent.
    pub fn handle(&self) -> IntentHandle {
        IntentHandle {
            id: self.id.clone(),
            client_secret: self.client_secret.clone(),
            currency: self.currency.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn only_succeeded_is_settled() {
        assert!(IntentStatus::Succeeded.is_settled());
        assert!(!IntentStatus::RequiresAction.is_settled());
        assert!(!IntentStatus::Processing.is_settled());
    }

    #[test]
    fn status_wire_names() {
        let s: IntentStatus = serde_json::from_str("\"requires_action\"").unwrap();
        assert_eq!(s, IntentStatus::RequiresAction);
    }

    #[test]
    fn metadata_omits_absent_fields() {
        let meta = PledgeIntentMetadata {
            issue_id: Some(IssueId(Uuid::nil())),
            ..Default::default()
        };
        let json = serde_json::to_value(&meta).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 1);
        assert!(obj.contains_key("issue_id"));
    }

    #[test]
    fn metadata_tolerates_missing_fields() {
        let meta: PledgeIntentMetadata = serde_json::from_str("{}").unwrap();
        assert_eq!(meta, PledgeIntentMetadata::default());
    }
}
