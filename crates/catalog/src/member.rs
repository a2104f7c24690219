use serde::{Deserialize, Serialize};

use libris_core::{DomainError, DomainResult, MemberId};

/// A registered library member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub member_id: MemberId,
    pub name: String,
    pub email: String,
}

/// Insert payload for a member; the store assigns `member_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMember {
    pub name: String,
    pub email: String,
}

impl NewMember {
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        validate_email(&self.email)
    }
}

/// Shallow plausibility check: one `@` with a non-empty local part and a dotted domain.
pub fn validate_email(email: &str) -> DomainResult<()> {
    let email = email.trim();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain
                    .split_once('.')
                    .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
        }
        None => false,
    };

    if !valid {
        return Err(DomainError::validation(format!("invalid email: {email:?}")));
    }
    Ok(())
}
