//! Composite identifiers for accounts, transactions and import batches.
//!
//! All identifiers are deterministic: the same bank data always produces the
//! same identifier, which is what makes re-import idempotent.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of a source (bank-feed) account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    /// Creates an AccountId, rejecting blank input.
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_string();
        if value.is_empty() {
            return Err(DomainError::EmptyAccountId);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AccountId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AccountId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Unique identifier for a Transaction: (source account, bank-assigned id).
///
/// This is the only key used for duplicate detection at import time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "TransactionIdParts")]
pub struct TransactionId {
    account_id: AccountId,
    external_id: String,
}

#[derive(Deserialize)]
struct TransactionIdParts {
    account_id: String,
    external_id: String,
}

impl TryFrom<TransactionIdParts> for TransactionId {
    type Error = DomainError;

    fn try_from(parts: TransactionIdParts) -> Result<Self, Self::Error> {
        Self::new(AccountId::new(parts.account_id)?, parts.external_id)
    }
}

impl TransactionId {
    /// Separator used by the textual form `account/external`.
    pub const SEPARATOR: char = '/';

    /// Creates a TransactionId, rejecting a blank external id.
    pub fn new(account_id: AccountId, external_id: impl Into<String>) -> Result<Self, DomainError> {
        let external_id = external_id.into().trim().to_string();
        if external_id.is_empty() {
            return Err(DomainError::EmptyExternalId);
        }
        Ok(Self {
            account_id,
            external_id,
        })
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    pub fn external_id(&self) -> &str {
        &self.external_id
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.account_id, Self::SEPARATOR, self.external_id)
    }
}

impl std::str::FromStr for TransactionId {
    type Err = DomainError;

    /// Parses `account/external`. The account part ends at the first separator,
    /// so external ids may themselves contain `/`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (account, external) = s
            .split_once(Self::SEPARATOR)
            .ok_or(DomainError::EmptyExternalId)?;
        Self::new(AccountId::new(account)?, external)
    }
}

/// Identifier of one import run: (account, per-account sequence number).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImportBatchId {
    account_id: AccountId,
    sequence: u64,
}

impl ImportBatchId {
    /// Creates a batch id. The sequence number must be positive.
    pub fn new(account_id: AccountId, sequence: u64) -> Result<Self, DomainError> {
        if sequence == 0 {
            return Err(DomainError::InvalidBatchSequence);
        }
        Ok(Self {
            account_id,
            sequence,
        })
    }

    /// The first batch of an account.
    pub fn first(account_id: AccountId) -> Self {
        Self {
            account_id,
            sequence: 1,
        }
    }

    /// The batch that follows this one for the same account.
    pub fn next(&self) -> Self {
        Self {
            account_id: self.account_id.clone(),
            sequence: self.sequence.saturating_add(1),
        }
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl std::fmt::Display for ImportBatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.account_id, self.sequence)
    }
}
