//! Type-safe identifier wrappers around [`Uuid`].
//!
//! Worlds and events carry strongly-typed IDs so they cannot be mixed up at
//! compile time. All IDs use UUID v7 (time-ordered) for efficient database
//! indexing.

use std::str::FromStr;

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

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
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
    /// Unique identifier for a simulated world (one clock, one event aggregate).
    WorldId
}

define_id! {
    /// Globally unique identifier for an event in the event log.
    EventId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let world = WorldId::new();
        let event = EventId::new();
        assert_ne!(world.into_inner(), Uuid::nil());
        assert_ne!(event.into_inner(), Uuid::nil());
    }

    #[test]
    fn id_display_matches_uuid() {
        let id = WorldId::new();
        assert_eq!(id.to_string(), id.into_inner().to_string());
    }

    #[test]
    fn id_parses_from_display_form() {
        let id = WorldId::new();
        let parsed: Result<WorldId, _> = id.to_string().parse();
        assert_eq!(parsed.ok(), Some(id));
        assert!("not-a-uuid".parse::<WorldId>().is_err());
    }
}
