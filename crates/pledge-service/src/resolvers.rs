//! # Identity and Issue Resolvers
//!
//! Contracts for the platform collaborators the ledger consults but does not
//! own: user accounts and the issues pledges target. In-memory
//! implementations back development servers and tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use pledge_core::{IssueId, OrganizationId, PledgeError, PledgeId, RepositoryId, UserId};

/// A platform user as seen by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
}

/// Why an account was created, recorded at signup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignupAttribution {
    pub intent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pledge: Option<PledgeId>,
}

impl SignupAttribution {
    /// Attribution for an account created by an anonymous pledge.
    pub fn pledge(id: PledgeId) -> Self {
        Self {
            intent: "pledge".to_string(),
            pledge: Some(id),
        }
    }
}

/// An issue with the associations the ledger needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: IssueId,
    pub repository_id: RepositoryId,
    pub organization_id: OrganizationId,
    /// Payout transitions require a closed issue.
    pub closed: bool,
}

/// Looks up and creates user accounts.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn get(&self, id: UserId) -> Result<Option<User>, PledgeError>;

    /// Resolve the account for `email`, creating it with `attribution` if
    /// none exists. The flag is `true` when an account was created.
    ///
    /// Must be idempotent per email: concurrent callers for the same email
    /// end up with the same account.
    async fn get_by_email_or_create(
        &self,
        email: &str,
        attribution: SignupAttribution,
    ) -> Result<(User, bool), PledgeError>;
}

/// Looks up issues with their repository and organization.
#[async_trait]
pub trait IssueResolver: Send + Sync {
    async fn get(&self, id: IssueId) -> Result<Option<Issue>, PledgeError>;
}

#[derive(Debug, Default)]
struct Accounts {
    users: HashMap<UserId, User>,
    by_email: HashMap<String, UserId>,
    attributions: HashMap<UserId, SignupAttribution>,
}

/// In-memory accounts keyed by id and by case-folded email.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIdentityResolver {
    accounts: Arc<RwLock<Accounts>>,
}

impl InMemoryIdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an existing account.
    pub fn add_user(&self, email: &str) -> User {
        let user = User {
            id: UserId::new(),
            email: email.to_string(),
        };
        let mut accounts = self.accounts.write();
        accounts.by_email.insert(email.to_lowercase(), user.id);
        accounts.users.insert(user.id, user.clone());
        user
    }

    /// The signup attribution an account was created with, if it was created
    /// through [`IdentityResolver::get_by_email_or_create`].
    pub fn signup_attribution(&self, id: UserId) -> Option<SignupAttribution> {
        self.accounts.read().attributions.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.accounts.read().users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl IdentityResolver for InMemoryIdentityResolver {
    async fn get(&self, id: UserId) -> Result<Option<User>, PledgeError> {
        Ok(self.accounts.read().users.get(&id).cloned())
    }

    async fn get_by_email_or_create(
        &self,
        email: &str,
        attribution: SignupAttribution,
    ) -> Result<(User, bool), PledgeError> {
        let key = email.to_lowercase();
        let mut accounts = self.accounts.write();
        if let Some(user) = accounts
            .by_email
            .get(&key)
            .and_then(|id| accounts.users.get(id))
        {
            return Ok((user.clone(), false));
        }

        let user = User {
            id: UserId::new(),
            email: email.to_string(),
        };
        accounts.by_email.insert(key, user.id);
        accounts.users.insert(user.id, user.clone());
        accounts.attributions.insert(user.id, attribution);
        tracing::info!(user_id = %user.id, "account created from pledge receipt email");
        Ok((user, true))
    }
}

/// In-memory issues.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIssueResolver {
    issues: Arc<RwLock<HashMap<IssueId, Issue>>>,
}

impl InMemoryIssueResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open issue under a fresh repository and organization.
    pub fn add_open_issue(&self) -> Issue {
        let issue = Issue {
            id: IssueId::new(),
            repository_id: RepositoryId::new(),
            organization_id: OrganizationId::new(),
            closed: false,
        };
        self.insert(issue);
        issue
    }

    pub fn insert(&self, issue: Issue) {
        self.issues.write().insert(issue.id, issue);
    }

    /// Open or close an issue. Returns `false` if the issue is unknown.
    pub fn set_closed(&self, id: IssueId, closed: bool) -> bool {
        match self.issues.write().get_mut(&id) {
            Some(issue) => {
                issue.closed = closed;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl IssueResolver for InMemoryIssueResolver {
    async fn get(&self, id: IssueId) -> Result<Option<Issue>, PledgeError> {
        Ok(self.issues.read().get(&id).copied())
    }
}
