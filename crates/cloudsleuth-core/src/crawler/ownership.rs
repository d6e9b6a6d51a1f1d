//! Ownership and sharing classification of discovered entries.

use tracing::debug;

use crate::error::RemoteError;
use crate::model::{Classification, Container};
use crate::remote::{Grants, Session, UserGrant};

/// The principal whose content a walk is restricted to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerIdentity {
    pub email: String,
    pub account_id: Option<String>,
}

impl OwnerIdentity {
    pub fn email(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            account_id: None,
        }
    }

    fn matches(&self, grant: &UserGrant) -> bool {
        grant.email.eq_ignore_ascii_case(&self.email)
            || self
                .account_id
                .as_deref()
                .is_some_and(|id| id == grant.account_id)
    }

    /// The owner grant held by this identity, if any.
    fn owner_grant<'g>(&self, grants: &'g Grants) -> Option<&'g UserGrant> {
        grants.owners().find(|grant| self.matches(grant))
    }
}

/// Classification and grant labels for a new container or leaf.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ownership {
    pub classification: Classification,
    pub owner: Option<String>,
    pub members: Vec<String>,
    pub groups: Vec<String>,
}

impl Ownership {
    fn inherited(parent: &Container) -> Self {
        Self {
            classification: parent.classification,
            owner: parent.owner.clone(),
            members: parent.members.clone(),
            groups: parent.groups.clone(),
        }
    }

    pub fn apply(self, container: &mut Container) {
        container.classification = self.classification;
        container.owner = self.owner;
        container.members = self.members;
        container.groups = self.groups;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Owned(Ownership),
    /// The verified identity does not own the entry; skip its subtree.
    NotOwned,
}

/// `(O)alice@example.com` style labels.
pub fn grant_labels(grants: &Grants) -> (Vec<String>, Vec<String>) {
    let users = grants
        .users
        .iter()
        .map(|u| format!("({}){}", u.access.initial(), u.email))
        .collect();
    let groups = grants
        .groups
        .iter()
        .map(|g| format!("({}){}", g.access.initial(), g.name))
        .collect();
    (users, groups)
}

/// Fetch grants for `shared_id`. A missing sharing record reads as "no
/// sharing metadata".
pub fn fetch_grants(session: &Session, shared_id: &str) -> Result<Option<Grants>, RemoteError> {
    match session.call("list grants", |s| s.list_grants(shared_id)) {
        Ok(grants) => Ok(Some(grants)),
        Err(RemoteError::NotFound { .. }) => {
            debug!("No sharing record for {shared_id}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Classify a container discovered directly under `parent`.
///
/// Without sharing metadata the entry is treated as owned by the walking
/// identity, even when `verify` is set.
pub fn classify_container(
    session: &Session,
    parent: &Container,
    shared_id: Option<&str>,
    verify: Option<&OwnerIdentity>,
) -> Result<Verdict, RemoteError> {
    let mut ownership = Ownership::inherited(parent);
    let Some(grants) = shared_id
        .map(|id| fetch_grants(session, id))
        .transpose()?
        .flatten()
    else {
        return Ok(Verdict::Owned(ownership));
    };

    let owner = match verify {
        Some(identity) => match identity.owner_grant(&grants) {
            Some(grant) => Some(grant),
            None => return Ok(Verdict::NotOwned),
        },
        None => grants.owner(),
    };

    let (members, groups) = grant_labels(&grants);
    ownership.members = members;
    ownership.groups = groups;
    if let Some(owner) = owner {
        ownership.owner = Some(owner.email.clone());
    }
    if parent.is_personal_space_root()
        && ownership.classification == Classification::Private
    {
        ownership.classification = Classification::Shared;
    }
    Ok(Verdict::Owned(ownership))
}
