//! Citizen feedback reporting
//!
//! Reports are formatted for display and logged; they never reach the model
//! and are not persisted.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeedbackError {
    #[error("Unknown issue category '{0}' (expected Water, Electricity, Sanitation, Roads or Others)")]
    UnknownCategory(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FeedbackCategory {
    Water,
    Electricity,
    Sanitation,
    Roads,
    Others,
}

impl FeedbackCategory {
    pub const ALL: [FeedbackCategory; 5] = [
        FeedbackCategory::Water,
        FeedbackCategory::Electricity,
        FeedbackCategory::Sanitation,
        FeedbackCategory::Roads,
        FeedbackCategory::Others,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FeedbackCategory::Water => "Water",
            FeedbackCategory::Electricity => "Electricity",
            FeedbackCategory::Sanitation => "Sanitation",
            FeedbackCategory::Roads => "Roads",
            FeedbackCategory::Others => "Others",
        }
    }
}

impl fmt::Display for FeedbackCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedbackCategory {
    type Err = FeedbackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| FeedbackError::UnknownCategory(wanted.to_string()))
    }
}

/// What the shell shows after a report is submitted
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackReceipt {
    pub category: FeedbackCategory,
    pub description: String,
    pub submitted_at: DateTime<Utc>,
}

impl FeedbackReceipt {
    pub fn confirmation(&self) -> String {
        format!("Feedback logged under '{}' category.", self.category)
    }

    pub fn description_line(&self) -> String {
        format!("Description: {}", self.description)
    }
}

/// Record a report for the current session. The description is kept verbatim.
pub fn log_feedback(category: FeedbackCategory, description: &str) -> FeedbackReceipt {
    log::info!(
        "Feedback received: category={}, {} chars",
        category,
        description.len()
    );

    FeedbackReceipt {
        category,
        description: description.to_string(),
        submitted_at: Utc::now(),
    }
}
