use crate::error::{LedgerError, LedgerResult};
use pledgebook_authz::{AccessDecision, AccessScope, AuthorizationResolver, DenialReason};
use pledgebook_storage::ReadRetry;
use pledgebook_types::UserId;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Need {
    Read,
    Manage,
}

/// Turns access decisions into ledger errors without leaking existence.
#[derive(Clone)]
pub(crate) struct Guard {
    resolver: AuthorizationResolver,
}

impl Guard {
    /// Ledger operations retry whole attempts, so lookups made through the
    /// guard do not retry on their own.
    pub(crate) fn new(resolver: AuthorizationResolver) -> Self {
        Self {
            resolver: resolver.with_read_retry(ReadRetry::disabled()),
        }
    }

    pub(crate) fn resolver(&self) -> &AuthorizationResolver {
        &self.resolver
    }

    pub(crate) async fn require(
        &self,
        actor: &UserId,
        scope: &AccessScope,
        need: Need,
    ) -> LedgerResult<AccessDecision> {
        let decision = self.resolver.resolve_scope(actor, scope).await?;
        if permits(&decision, need) {
            return Ok(decision);
        }

        warn!(
            actor = %actor,
            scope = ?scope,
            need = ?need,
            reason = ?decision.denial_reason,
            "Access denied"
        );
        if decision.denial_reason == Some(DenialReason::OutsideOrganization) {
            return Err(self.hidden(actor, "record").await);
        }
        Err(LedgerError::AuthorizationDenied)
    }

    /// Error for a record that is absent or lives in another tenant.
    ///
    /// Global admins see `NotFound`, everybody else `AuthorizationDenied`, so
    /// neither can tell a foreign record from a missing one.
    pub(crate) async fn hidden(&self, actor: &UserId, what: &str) -> LedgerError {
        match self.resolver.is_global_admin(actor).await {
            Ok(true) => LedgerError::NotFound(what.to_string()),
            Ok(false) => LedgerError::AuthorizationDenied,
            Err(err) => err.into(),
        }
    }
}

pub(crate) fn permits(decision: &AccessDecision, need: Need) -> bool {
    match need {
        Need::Read => decision.can_read(),
        Need::Manage => decision.can_manage(),
    }
}
