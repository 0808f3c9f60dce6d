//! Prompt templates for the model-backed assistant modules
//!
//! Every function here is pure: same input, same prompt, no model call.
//! Feedback reports never reach the model and are formatted in `feedback`.

use serde::{Deserialize, Serialize};

/// The prompts the assistant knows how to build
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PromptTemplate {
    PolicySummary,
    KpiForecast,
    EcoTips,
    AnomalyNarration,
    ChatTurn,
}

impl PromptTemplate {
    pub const ALL: [PromptTemplate; 5] = [
        PromptTemplate::PolicySummary,
        PromptTemplate::KpiForecast,
        PromptTemplate::EcoTips,
        PromptTemplate::AnomalyNarration,
        PromptTemplate::ChatTurn,
    ];

    /// Render the prompt for `input`. Total for any string, including empty.
    pub fn render(self, input: &str) -> String {
        match self {
            PromptTemplate::PolicySummary => policy_summary(input),
            PromptTemplate::KpiForecast => kpi_forecast(input),
            PromptTemplate::EcoTips => eco_tips(input),
            PromptTemplate::AnomalyNarration => anomaly_narration(input),
            PromptTemplate::ChatTurn => chat_turn(input),
        }
    }

    /// Like `render`, but `None` when there is nothing to ask about.
    pub fn render_if_present(self, input: &str) -> Option<String> {
        if input.trim().is_empty() {
            None
        } else {
            Some(self.render(input))
        }
    }
}

pub fn policy_summary(text: &str) -> String {
    format!(
        "Summarize this city policy document in a citizen-friendly manner:\n{}",
        text
    )
}

pub fn kpi_forecast(table_text: &str) -> String {
    format!(
        "Given the following KPI data, forecast next year's trend:\n{}",
        table_text
    )
}

pub fn eco_tips(keyword: &str) -> String {
    format!(
        "Generate 5 eco-friendly tips related to {} that students can follow.",
        keyword
    )
}

pub fn anomaly_narration(table_text: &str) -> String {
    format!(
        "Analyze the following KPI data and detect any unusual patterns or anomalies:\n{}",
        table_text
    )
}

pub fn chat_turn(utterance: &str) -> String {
    format!("User: {}\nAssistant:", utterance)
}
