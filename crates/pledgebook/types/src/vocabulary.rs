use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// A string that does not name any variant of a closed enum.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} `{value}`")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! closed_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                match raw {
                    $($text => Ok($name::$variant),)+
                    other => Err(ParseEnumError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

closed_enum!(
    /// Organization-wide role.
    OrgRole, "organization role" {
        Admin => "admin",
        Treasurer => "treasurer",
        Member => "member",
        /// Signed up but not yet approved by an admin.
        Pending => "pending",
    }
);

impl OrgRole {
    /// Admins and treasurers see every committee of their organization.
    pub fn is_global_admin(&self) -> bool {
        matches!(self, OrgRole::Admin | OrgRole::Treasurer)
    }
}

closed_enum!(
    /// Committee-scoped role.
    CommitteeRole, "committee role" {
        Leader => "leader",
        Treasurer => "treasurer",
        Secretary => "secretary",
        MemberAtLarge => "member_at_large",
    }
);

impl CommitteeRole {
    /// Leaders and treasurers may create and edit pledges, offerings and expenses.
    pub fn can_manage(&self) -> bool {
        matches!(self, CommitteeRole::Leader | CommitteeRole::Treasurer)
    }
}

closed_enum!(
    /// Soft-delete flag shared by memberships, committees and members.
    MembershipStatus, "status" {
        Active => "active",
        Inactive => "inactive",
    }
);

impl MembershipStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, MembershipStatus::Active)
    }
}

closed_enum!(
    /// Pledge lifecycle state.
    PledgeState, "pledge state" {
        Active => "active",
        Completed => "completed",
        Expired => "expired",
        /// Terminal.
        Cancelled => "cancelled",
    }
);

impl PledgeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PledgeState::Cancelled)
    }
}

closed_enum!(
    PaymentMethod, "payment method" {
        Cash => "cash",
        Transfer => "transfer",
        Check => "check",
        Other => "other",
    }
);
