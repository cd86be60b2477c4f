use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Fresh random identifier.
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(
    /// Tenant identifier.
    OrganizationId
);
string_id!(
    /// Login identity of an actor. Distinct from [`MemberId`].
    UserId
);
string_id!(CommitteeId);
string_id!(
    /// The person a pledge is made on behalf of.
    MemberId
);
string_id!(ProjectId);
string_id!(PledgeId);
string_id!(PaymentId);
string_id!(OfferingId);
string_id!(ExpenseId);
