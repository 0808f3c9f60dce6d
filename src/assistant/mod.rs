//! The assistant's modules as the shell presents them, and the actions that
//! turn module input into a model call.

pub mod actions;
pub mod catalog;

pub use actions::{
    detect_anomalies, eco_tips, forecast_kpi, summarize_policy, PolicyDocument,
};
pub use catalog::{dashboard_overview, AssistantModule, ModuleInfo};
