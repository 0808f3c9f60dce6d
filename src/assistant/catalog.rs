//! Module catalog: menu entries and the dashboard overview

use serde::{Deserialize, Serialize};

/// Sidebar entries, in menu order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AssistantModule {
    Dashboard,
    PolicySummary,
    FeedbackReporting,
    KpiForecasting,
    EcoTips,
    AnomalyDetection,
    ChatAssistant,
}

/// Serializable description of one module for the shell
#[derive(Debug, Clone, Serialize)]
pub struct ModuleInfo {
    pub id: AssistantModule,
    pub title: &'static str,
    pub icon: &'static str,
    pub description: &'static str,
    pub uses_model: bool,
}

impl AssistantModule {
    pub const MENU: [AssistantModule; 7] = [
        AssistantModule::Dashboard,
        AssistantModule::PolicySummary,
        AssistantModule::FeedbackReporting,
        AssistantModule::KpiForecasting,
        AssistantModule::EcoTips,
        AssistantModule::AnomalyDetection,
        AssistantModule::ChatAssistant,
    ];

    pub fn title(self) -> &'static str {
        match self {
            AssistantModule::Dashboard => "User Dashboard",
            AssistantModule::PolicySummary => "Policy Search & Summarization",
            AssistantModule::FeedbackReporting => "Citizen Feedback Reporting",
            AssistantModule::KpiForecasting => "KPI Forecasting",
            AssistantModule::EcoTips => "Eco Tips Generator",
            AssistantModule::AnomalyDetection => "Anomaly Detection",
            AssistantModule::ChatAssistant => "Chat Assistant",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            AssistantModule::Dashboard => "📊",
            AssistantModule::PolicySummary => "📜",
            AssistantModule::FeedbackReporting => "🗣️",
            AssistantModule::KpiForecasting => "📈",
            AssistantModule::EcoTips => "🌿",
            AssistantModule::AnomalyDetection => "🚨",
            AssistantModule::ChatAssistant => "💬",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            AssistantModule::Dashboard => "An overview of the modules available.",
            AssistantModule::PolicySummary => {
                "Upload or paste city policy documents and get clear, citizen-friendly summaries."
            }
            AssistantModule::FeedbackReporting => {
                "Report issues around the city easily and help local authorities respond faster."
            }
            AssistantModule::KpiForecasting => {
                "Upload KPI data and get AI-driven forecasts to help plan city resources effectively."
            }
            AssistantModule::EcoTips => {
                "Get simple eco-friendly tips to promote sustainable living in your community."
            }
            AssistantModule::AnomalyDetection => {
                "Detect unusual patterns in city data to catch issues early and improve city management."
            }
            AssistantModule::ChatAssistant => {
                "Ask questions and get instant answers about your city's sustainability and governance."
            }
        }
    }

    /// Feedback and the dashboard never call the model
    pub fn uses_model(self) -> bool {
        !matches!(
            self,
            AssistantModule::Dashboard | AssistantModule::FeedbackReporting
        )
    }

    pub fn info(self) -> ModuleInfo {
        ModuleInfo {
            id: self,
            title: self.title(),
            icon: self.icon(),
            description: self.description(),
            uses_model: self.uses_model(),
        }
    }
}

/// Dashboard text: a welcome line, then one entry per module
pub fn dashboard_overview() -> String {
    let mut text = String::from(
        "Welcome to your Smart City Assistant dashboard! Here's a quick overview of the modules available:\n",
    );
    for module in AssistantModule::MENU.iter().skip(1) {
        text.push_str(&format!(
            "\n{} {}\n{}\n",
            module.icon(),
            module.title(),
            module.description()
        ));
    }
    text
}
