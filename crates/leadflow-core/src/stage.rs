//! Stage catalog: the fixed qualification pipeline.
//!
//! ```text
//! initial_contact → project_type → budget → timeline → location
//!     → project_stage → design_preference → qualified
//! ```
//!
//! `disqualified` is a separate terminal reachable from any non-terminal stage.

use crate::error::LeadflowError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One step in the qualification pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    InitialContact,
    ProjectType,
    Budget,
    Timeline,
    Location,
    ProjectStage,
    DesignPreference,
    Qualified,
    Disqualified,
}

impl Stage {
    /// Every stage, pipeline order first, then `disqualified`.
    pub const ALL: [Stage; 9] = [
        Stage::InitialContact,
        Stage::ProjectType,
        Stage::Budget,
        Stage::Timeline,
        Stage::Location,
        Stage::ProjectStage,
        Stage::DesignPreference,
        Stage::Qualified,
        Stage::Disqualified,
    ];

    /// Database / wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitialContact => "initial_contact",
            Self::ProjectType => "project_type",
            Self::Budget => "budget",
            Self::Timeline => "timeline",
            Self::Location => "location",
            Self::ProjectStage => "project_stage",
            Self::DesignPreference => "design_preference",
            Self::Qualified => "qualified",
            Self::Disqualified => "disqualified",
        }
    }

    /// Successor in the pipeline, or `None` at a terminal stage.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Self::InitialContact => Some(Self::ProjectType),
            Self::ProjectType => Some(Self::Budget),
            Self::Budget => Some(Self::Timeline),
            Self::Timeline => Some(Self::Location),
            Self::Location => Some(Self::ProjectStage),
            Self::ProjectStage => Some(Self::DesignPreference),
            Self::DesignPreference => Some(Self::Qualified),
            Self::Qualified | Self::Disqualified => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Qualified | Self::Disqualified)
    }

    /// Whether a lead sitting at `self` may move to `target`.
    ///
    /// Only forward moves along the pipeline, or to `disqualified`, from a
    /// non-terminal stage.
    pub fn can_move_to(&self, target: Stage) -> bool {
        if self.is_terminal() || *self == target {
            return false;
        }
        target == Self::Disqualified || target > *self
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = LeadflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| LeadflowError::UnknownStage(s.to_string()))
    }
}

/// Resolve the successor of a stage given by name.
///
/// Returns `Ok(None)` when the stage is terminal and `UnknownStage` for a
/// name outside the catalog.
pub fn next_stage(current: &str) -> Result<Option<Stage>, LeadflowError> {
    Ok(current.parse::<Stage>()?.next())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_order() {
        let mut stage = Stage::InitialContact;
        let mut walked = vec![stage];
        while let Some(next) = stage.next() {
            walked.push(next);
            stage = next;
        }
        assert_eq!(walked.len(), 8);
        assert_eq!(walked.last(), Some(&Stage::Qualified));
        assert!(!walked.contains(&Stage::Disqualified));
    }

    #[test]
    fn test_next_stage_by_name() {
        assert_eq!(next_stage("budget").unwrap(), Some(Stage::Timeline));
        assert_eq!(
            next_stage("design_preference").unwrap(),
            Some(Stage::Qualified)
        );
        assert_eq!(next_stage("qualified").unwrap(), None);
        assert_eq!(next_stage("disqualified").unwrap(), None);
    }

    #[test]
    fn test_unknown_stage_rejected() {
        let err = next_stage("negotiation").unwrap_err();
        assert!(matches!(err, LeadflowError::UnknownStage(ref s) if s == "negotiation"));
        assert!("".parse::<Stage>().is_err());
        assert!("Budget".parse::<Stage>().is_err());
    }

    #[test]
    fn test_round_trip_names() {
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
    }

    #[test]
    fn test_can_move_to() {
        assert!(Stage::InitialContact.can_move_to(Stage::ProjectType));
        assert!(Stage::InitialContact.can_move_to(Stage::Location));
        assert!(Stage::Budget.can_move_to(Stage::Disqualified));
        assert!(!Stage::Budget.can_move_to(Stage::ProjectType));
        assert!(!Stage::Budget.can_move_to(Stage::Budget));
        assert!(!Stage::Qualified.can_move_to(Stage::Disqualified));
        assert!(!Stage::Disqualified.can_move_to(Stage::Qualified));
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&Stage::DesignPreference).unwrap();
        assert_eq!(json, "\"design_preference\"");
        let back: Stage = serde_json::from_str("\"project_stage\"").unwrap();
        assert_eq!(back, Stage::ProjectStage);
    }
}
