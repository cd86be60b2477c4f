//! Pledgebook Authorization - the single place where access is decided.
//!
//! An actor's access to a committee is resolved from two independent role
//! tables: the organization-wide membership and the committee-scoped
//! membership. Organization admins and treasurers see every committee of
//! their own organization; everyone else needs an active committee
//! membership. "No access" is a decision, never an error: the only failures
//! surfaced are store failures, mapped onto [`AuthzError`]. Lookups are
//! retried through the resolver's [`ReadRetry`] while the store is
//! unreachable.
//!
//! Decisions may be memoized for the duration of one request through
//! [`ActorScope`]. Nothing is cached on the resolver itself.

#![deny(unsafe_code)]

use pledgebook_storage::{ReadRetry, Repository, StorageError};
use pledgebook_types::{
    CommitteeId, CommitteeMembership, CommitteeRole, OrgMembership, OrganizationId, Pledge,
    UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub type AuthzResult<T> = Result<T, AuthzError>;

/// Failure to reach a decision. Denials are not errors.
#[derive(Debug, Error)]
pub enum AuthzError {
    /// The store stayed unreachable for the whole retry budget.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("role lookup failed: {0}")]
    Lookup(String),
}

impl AuthzError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthzError::StoreUnavailable(_))
    }
}

impl From<StorageError> for AuthzError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::Unavailable(msg) => Self::StoreUnavailable(msg),
            other => Self::Lookup(other.to_string()),
        }
    }
}

/// What an actor is asking to touch.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessScope {
    /// Organization-wide records, e.g. pledges without a committee.
    Organization(OrganizationId),
    Committee(CommitteeId),
}

impl AccessScope {
    /// Scope that guards a pledge.
    pub fn of_pledge(pledge: &Pledge) -> Self {
        match pledge.committee_id {
            Some(ref committee) => AccessScope::Committee(committee.clone()),
            None => AccessScope::Organization(pledge.organization_id.clone()),
        }
    }
}

/// Why access was refused. Logged, never shown to the end user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenialReason {
    NoOrgMembership,
    InactiveOrgMembership,
    /// Committee does not exist or belongs to another organization.
    OutsideOrganization,
    NoCommitteeMembership,
    InactiveCommitteeMembership,
    /// Organization-wide records are reserved to admins and treasurers.
    RequiresGlobalAdmin,
}

/// Outcome of resolving an actor against a scope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub has_access: bool,
    pub is_global_admin: bool,
    pub committee_role: Option<CommitteeRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denial_reason: Option<DenialReason>,
}

impl AccessDecision {
    fn denied(reason: DenialReason) -> Self {
        Self {
            has_access: false,
            is_global_admin: false,
            committee_role: None,
            denial_reason: Some(reason),
        }
    }

    fn global_admin() -> Self {
        Self {
            has_access: true,
            is_global_admin: true,
            committee_role: None,
            denial_reason: None,
        }
    }

    fn committee(role: CommitteeRole) -> Self {
        Self {
            has_access: true,
            is_global_admin: false,
            committee_role: Some(role),
            denial_reason: None,
        }
    }

    /// Read operations only need access.
    pub fn can_read(&self) -> bool {
        self.has_access
    }

    /// Write operations need global admin or a managing committee role.
    pub fn can_manage(&self) -> bool {
        can_manage(self)
    }
}

/// `is_global_admin OR committee_role ∈ {leader, treasurer}`.
pub fn can_manage(decision: &AccessDecision) -> bool {
    decision.has_access
        && (decision.is_global_admin
            || decision
                .committee_role
                .is_some_and(|role| role.can_manage()))
}

/// Resolves access decisions from the repository's membership tables.
///
/// Holds no state besides the repository handle; safe to share and to call
/// concurrently.
#[derive(Clone)]
pub struct AuthorizationResolver {
    repo: Arc<dyn Repository>,
    retry: ReadRetry,
}

impl AuthorizationResolver {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self {
            repo,
            retry: ReadRetry::default(),
        }
    }

    pub fn with_read_retry(mut self, retry: ReadRetry) -> Self {
        self.retry = retry;
        self
    }

    pub fn read_retry(&self) -> ReadRetry {
        self.retry
    }

    /// Resolve `actor` against a committee.
    pub async fn resolve(
        &self,
        actor: &UserId,
        committee_id: &CommitteeId,
    ) -> AuthzResult<AccessDecision> {
        let decision = self.resolve_committee(actor, committee_id).await?;
        log_decision(actor, &AccessScope::Committee(committee_id.clone()), &decision);
        Ok(decision)
    }

    /// Resolve `actor` against organization-wide records.
    pub async fn resolve_organization(
        &self,
        actor: &UserId,
        organization_id: &OrganizationId,
    ) -> AuthzResult<AccessDecision> {
        let decision = match self.org_membership(actor).await? {
            None => AccessDecision::denied(DenialReason::NoOrgMembership),
            Some(m) if !m.status.is_active() => {
                AccessDecision::denied(DenialReason::InactiveOrgMembership)
            }
            Some(m) if &m.organization_id != organization_id => {
                AccessDecision::denied(DenialReason::OutsideOrganization)
            }
            Some(m) if m.role.is_global_admin() => AccessDecision::global_admin(),
            Some(_) => AccessDecision::denied(DenialReason::RequiresGlobalAdmin),
        };
        log_decision(
            actor,
            &AccessScope::Organization(organization_id.clone()),
            &decision,
        );
        Ok(decision)
    }

    pub async fn resolve_scope(
        &self,
        actor: &UserId,
        scope: &AccessScope,
    ) -> AuthzResult<AccessDecision> {
        match scope {
            AccessScope::Committee(committee_id) => self.resolve(actor, committee_id).await,
            AccessScope::Organization(org_id) => self.resolve_organization(actor, org_id).await,
        }
    }

    /// Whether `actor` is an active admin or treasurer of any organization.
    pub async fn is_global_admin(&self, actor: &UserId) -> AuthzResult<bool> {
        Ok(self
            .org_membership(actor)
            .await?
            .is_some_and(|m| m.status.is_active() && m.role.is_global_admin()))
    }

    /// Start a per-request decision cache for one actor.
    pub fn scoped(&self, actor: UserId) -> ActorScope<'_> {
        ActorScope {
            resolver: self,
            actor,
            decisions: HashMap::new(),
        }
    }

    async fn resolve_committee(
        &self,
        actor: &UserId,
        committee_id: &CommitteeId,
    ) -> AuthzResult<AccessDecision> {
        let membership = match self.org_membership(actor).await? {
            None => return Ok(AccessDecision::denied(DenialReason::NoOrgMembership)),
            Some(m) if !m.status.is_active() => {
                return Ok(AccessDecision::denied(DenialReason::InactiveOrgMembership))
            }
            Some(m) => m,
        };

        // Tenant boundary: a committee of another organization is out of reach,
        // even for that other organization's admins.
        let in_tenant = self
            .retry
            .run("get_committee", || self.repo.get_committee(committee_id))
            .await?
            .is_some_and(|c| c.organization_id == membership.organization_id);
        if !in_tenant {
            return Ok(AccessDecision::denied(DenialReason::OutsideOrganization));
        }

        if membership.role.is_global_admin() {
            return Ok(AccessDecision::global_admin());
        }

        Ok(match self.committee_membership(actor, committee_id).await? {
            None => AccessDecision::denied(DenialReason::NoCommitteeMembership),
            Some(cm) if !cm.status.is_active() => {
                AccessDecision::denied(DenialReason::InactiveCommitteeMembership)
            }
            Some(cm) => AccessDecision::committee(cm.role),
        })
    }

    async fn org_membership(&self, actor: &UserId) -> AuthzResult<Option<OrgMembership>> {
        Ok(self
            .retry
            .run("get_org_membership", || self.repo.get_org_membership(actor))
            .await?)
    }

    async fn committee_membership(
        &self,
        actor: &UserId,
        committee_id: &CommitteeId,
    ) -> AuthzResult<Option<CommitteeMembership>> {
        Ok(self
            .retry
            .run("get_committee_membership", || {
                self.repo.get_committee_membership(actor, committee_id)
            })
            .await?)
    }
}

fn log_decision(actor: &UserId, scope: &AccessScope, decision: &AccessDecision) {
    if let Some(reason) = decision.denial_reason {
        debug!(actor = %actor, ?scope, ?reason, "access denied");
    } else {
        debug!(
            actor = %actor,
            ?scope,
            global_admin = decision.is_global_admin,
            role = ?decision.committee_role,
            "access granted"
        );
    }
}

/// Decisions for one actor within one request.
///
/// Drop it when the request ends; it must never outlive the request or be
/// handed to another actor.
pub struct ActorScope<'a> {
    resolver: &'a AuthorizationResolver,
    actor: UserId,
    decisions: HashMap<AccessScope, AccessDecision>,
}

impl ActorScope<'_> {
    pub fn actor(&self) -> &UserId {
        &self.actor
    }

    pub async fn decide(&mut self, scope: &AccessScope) -> AuthzResult<AccessDecision> {
        if let Some(decision) = self.decisions.get(scope) {
            return Ok(decision.clone());
        }
        let decision = self.resolver.resolve_scope(&self.actor, scope).await?;
        self.decisions.insert(scope.clone(), decision.clone());
        Ok(decision)
    }

    /// Number of distinct scopes resolved so far.
    pub fn resolved(&self) -> usize {
        self.decisions.len()
    }
}
