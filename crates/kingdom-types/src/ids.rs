//! Type-safe identifier wrappers around [`Uuid`].
//!
//! Every entity the simulation tracks has a strongly-typed ID so that a
//! player id can never be passed where a settlement id is expected. All IDs
//! use UUID v7 (time-ordered), which keeps journal and job ids sortable by
//! creation time.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Unique identifier for a player account.
    ///
    /// Identity itself is owned by the session layer; the simulation only
    /// stores balances keyed by this id.
    PlayerId
}

define_id! {
    /// Unique identifier for a settlement (a room on the world map).
    SettlementId
}

define_id! {
    /// Unique identifier for a posted job.
    JobId
}

define_id! {
    /// Unique identifier for a claim a player holds on a job.
    ClaimId
}

define_id! {
    /// Unique identifier for a journal entry (balance movement record).
    LedgerEntryId
}
