//! Type-safe identifier wrappers around prefixed id strings.
//!
//! Every entity in a generated case has a strongly-typed ID to prevent
//! accidental mixing of identifiers at compile time. Unlike database-owned
//! identifiers, case ids are authored by the generative model as opaque
//! prefixed strings (`role_*`, `char_*`, `loc_*`, `fact_*`, `entry_*`,
//! `E*` for events, `q_*` for questions), so the wrappers are
//! string-backed rather than UUIDs.
//!
//! [`SubjectId`] is the union space used wherever characters, roles, and
//! locations mix: involvement maps, fact subject lists, and the bipartite
//! fact graph. [`DraftId`] identifies one generation run and is the only
//! UUID-backed id (generated app-side, never by the model).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix of fact ids synthesized to guarantee graph reachability.
pub const BRIDGE_FACT_PREFIX: &str = "fact_bridge_";

/// Prefix of noise fact ids inserted for misdirection.
pub const RED_HERRING_FACT_PREFIX: &str = "fact_red_herring_";

/// Generates a newtype wrapper around a prefixed id [`String`].
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Wrap a raw id string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Return the id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume the wrapper and return the inner string.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(String::from(id))
            }
        }
    };
}

define_id! {
    /// Identifier for a character role slot in the template (`role_*`).
    RoleId
}

define_id! {
    /// Identifier for a generated character (`char_*`).
    CharacterId
}

define_id! {
    /// Identifier for a location in the case world (`loc_*`).
    LocationId
}

define_id! {
    /// Identifier for a fact (`fact_*`), including synthesized bridge and
    /// red-herring facts.
    FactId
}

define_id! {
    /// Identifier for an event in the causal chain (`E*`).
    EventId
}

define_id! {
    /// Identifier for a casebook entry (`entry_*`).
    EntryId
}

define_id! {
    /// Identifier for a quiz question (`q_*`).
    QuestionId
}

define_id! {
    /// Identifier for a fact subject: a character, a role (before the
    /// role-to-character rewrite), or a location.
    SubjectId
}

impl FactId {
    /// Whether this fact was synthesized as a reachability bridge.
    pub fn is_bridge(&self) -> bool {
        self.0.starts_with(BRIDGE_FACT_PREFIX)
    }

    /// Whether this fact was synthesized as a red herring.
    pub fn is_red_herring(&self) -> bool {
        self.0.starts_with(RED_HERRING_FACT_PREFIX)
    }

    /// Whether this fact was synthesized by the fact-graph stage rather
    /// than revealed by an event.
    pub fn is_synthetic(&self) -> bool {
        self.is_bridge() || self.is_red_herring()
    }

    /// Id of the false counterpart fact emitted when a character denies
    /// this fact.
    pub fn denial(&self) -> Self {
        Self(format!("{}_false", self.0))
    }
}

impl From<CharacterId> for SubjectId {
    fn from(id: CharacterId) -> Self {
        Self(id.0)
    }
}

impl From<LocationId> for SubjectId {
    fn from(id: LocationId) -> Self {
        Self(id.0)
    }
}

impl From<RoleId> for SubjectId {
    fn from(id: RoleId) -> Self {
        Self(id.0)
    }
}

impl From<&CharacterId> for SubjectId {
    fn from(id: &CharacterId) -> Self {
        Self(id.0.clone())
    }
}

impl From<&LocationId> for SubjectId {
    fn from(id: &LocationId) -> Self {
        Self(id.0.clone())
    }
}

impl From<&RoleId> for SubjectId {
    fn from(id: &RoleId) -> Self {
        Self(id.0.clone())
    }
}

/// Unique identifier for one generation run.
///
/// Keys the draft accumulator in the hot store. Uses UUID v7
/// (time-ordered) so concurrent runs stay isolated and sort by start
/// time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DraftId(pub Uuid);

impl DraftId {
    /// Create a new draft identifier using UUID v7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Return the inner [`Uuid`] value.
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for DraftId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for DraftId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for DraftId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}
