//! Enum types for Attest entities

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ENTITY TYPES
// ============================================================================

/// Entity type discriminator embedded in every [`Gid`](crate::Gid).
///
/// The numeric tags are persisted inside identifiers and must never be
/// renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Organization,
    Framework,
    Control,
    Task,
    Evidence,
    Vendor,
    People,
    Policy,
    ControlStateTransition,
    TaskStateTransition,
    EvidenceStateTransition,
}

impl EntityType {
    pub const ALL: [EntityType; 11] = [
        EntityType::Organization,
        EntityType::Framework,
        EntityType::Control,
        EntityType::Task,
        EntityType::Evidence,
        EntityType::Vendor,
        EntityType::People,
        EntityType::Policy,
        EntityType::ControlStateTransition,
        EntityType::TaskStateTransition,
        EntityType::EvidenceStateTransition,
    ];

    pub const fn tag(self) -> u16 {
        match self {
            EntityType::Organization => 0,
            EntityType::Framework => 1,
            EntityType::Control => 2,
            EntityType::Task => 3,
            EntityType::Evidence => 4,
            EntityType::Vendor => 5,
            EntityType::People => 6,
            EntityType::Policy => 7,
            EntityType::ControlStateTransition => 8,
            EntityType::TaskStateTransition => 9,
            EntityType::EvidenceStateTransition => 10,
        }
    }

    pub fn from_tag(tag: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.tag() == tag)
    }

    /// Table holding rows of this type.
    pub const fn table(self) -> &'static str {
        match self {
            EntityType::Organization => "organizations",
            EntityType::Framework => "frameworks",
            EntityType::Control => "controls",
            EntityType::Task => "tasks",
            EntityType::Evidence => "evidences",
            EntityType::Vendor => "vendors",
            EntityType::People => "peoples",
            EntityType::Policy => "policies",
            EntityType::ControlStateTransition => "control_state_transitions",
            EntityType::TaskStateTransition => "task_state_transitions",
            EntityType::EvidenceStateTransition => "evidence_state_transitions",
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            EntityType::Organization => "organization",
            EntityType::Framework => "framework",
            EntityType::Control => "control",
            EntityType::Task => "task",
            EntityType::Evidence => "evidence",
            EntityType::Vendor => "vendor",
            EntityType::People => "people",
            EntityType::Policy => "policy",
            EntityType::ControlStateTransition => "control_state_transition",
            EntityType::TaskStateTransition => "task_state_transition",
            EntityType::EvidenceStateTransition => "evidence_state_transition",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// STRING-BACKED ENUMS
// ============================================================================

/// Declares an enum persisted as its SCREAMING_SNAKE_CASE name, with
/// `as_str`, `Display` and `FromStr`.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub const fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(CoreError::invalid_argument(
                        stringify!($name),
                        format!("unknown value {:?}", other),
                    )),
                }
            }
        }
    };
}

string_enum! {
    /// Implementation state of a control.
    ControlState {
        NotStarted => "NOT_STARTED",
        InProgress => "IN_PROGRESS",
        NotApplicable => "NOT_APPLICABLE",
        Implemented => "IMPLEMENTED",
    }
}

string_enum! {
    /// Completion state of a task.
    TaskState {
        Todo => "TODO",
        Done => "DONE",
    }
}

string_enum! {
    /// Validity of a piece of evidence.
    EvidenceState {
        Valid => "VALID",
        Invalid => "INVALID",
        Expired => "EXPIRED",
    }
}

string_enum! {
    ControlImportance {
        Mandatory => "MANDATORY",
        Preferred => "PREFERRED",
        Advanced => "ADVANCED",
    }
}

string_enum! {
    PeopleKind {
        Employee => "EMPLOYEE",
        Contractor => "CONTRACTOR",
    }
}

string_enum! {
    PolicyStatus {
        Draft => "DRAFT",
        Active => "ACTIVE",
    }
}

string_enum! {
    /// Vendor risk classification.
    RiskTier {
        Critical => "CRITICAL",
        Significant => "SIGNIFICANT",
        General => "GENERAL",
    }
}

string_enum! {
    ServiceCriticality {
        Low => "LOW",
        Medium => "MEDIUM",
        High => "HIGH",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::collections::HashSet;

    #[test]
    fn test_entity_type_tags_are_unique() {
        let tags: HashSet<u16> = EntityType::ALL.iter().map(|t| t.tag()).collect();
        assert_eq!(tags.len(), EntityType::ALL.len());
        for t in EntityType::ALL {
            assert_eq!(EntityType::from_tag(t.tag()), Some(t));
        }
        assert_eq!(EntityType::from_tag(999), None);
    }

    #[test]
    fn test_string_enum_roundtrip() -> Result<(), CoreError> {
        for state in ControlState::ALL {
            assert_eq!(state.as_str().parse::<ControlState>()?, *state);
        }
        assert_eq!("DONE".parse::<TaskState>()?, TaskState::Done);
        assert_eq!(RiskTier::Significant.to_string(), "SIGNIFICANT");
        Ok(())
    }

    #[test]
    fn test_string_enum_rejects_unknown() {
        let err = "done".parse::<TaskState>().err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::InvalidArgument));
    }

    #[test]
    fn test_string_enum_serde_matches_as_str() -> Result<(), serde_json::Error> {
        assert_eq!(serde_json::to_string(&EvidenceState::Expired)?, "\"EXPIRED\"");
        let kind: PeopleKind = serde_json::from_str("\"CONTRACTOR\"")?;
        assert_eq!(kind, PeopleKind::Contractor);
        Ok(())
    }
}
