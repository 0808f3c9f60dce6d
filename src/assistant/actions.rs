//! Module actions: shape the input, render the prompt, ask the gateway
//!
//! Each action returns `None` when the required input is blank. In that case
//! the gateway is not touched.

use serde::Deserialize;

use crate::llm_engine::{ModelGateway, ModelResponse};
use crate::table::UploadedTable;
use crate::templates::PromptTemplate;

/// Text of a policy upload: extracted pages plus anything pasted by hand
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyDocument {
    #[serde(default)]
    pub pages: Vec<String>,
    #[serde(default)]
    pub pasted: Option<String>,
}

impl PolicyDocument {
    pub fn from_pasted(text: impl Into<String>) -> Self {
        Self {
            pages: Vec::new(),
            pasted: Some(text.into()),
        }
    }

    /// Pages back to back, then the pasted text on its own line.
    pub fn text(&self) -> String {
        let mut text = self.pages.concat();
        if let Some(pasted) = self.pasted.as_deref().filter(|p| !p.is_empty()) {
            text.push('\n');
            text.push_str(pasted);
        }
        text
    }
}

async fn run(gateway: &ModelGateway, template: PromptTemplate, content: &str) -> Option<ModelResponse> {
    if content.trim().is_empty() {
        log::debug!("Skipping {:?}: no input", template);
        return None;
    }

    let fitted = match gateway.budget().fit(content) {
        Ok(fitted) => fitted,
        Err(e) => {
            log::warn!("{:?} input refused: {}", template, e);
            return Some(Err(e));
        }
    };

    log::info!("Running {:?} ({} chars of input)", template, fitted.len());
    Some(gateway.generate(&template.render(&fitted)).await)
}

pub async fn summarize_policy(gateway: &ModelGateway, document: &PolicyDocument) -> Option<ModelResponse> {
    run(gateway, PromptTemplate::PolicySummary, &document.text()).await
}

pub async fn forecast_kpi(gateway: &ModelGateway, table: &UploadedTable) -> Option<ModelResponse> {
    run(gateway, PromptTemplate::KpiForecast, &table.to_plain_text()).await
}

pub async fn eco_tips(gateway: &ModelGateway, keyword: &str) -> Option<ModelResponse> {
    run(gateway, PromptTemplate::EcoTips, keyword).await
}

pub async fn detect_anomalies(gateway: &ModelGateway, table: &UploadedTable) -> Option<ModelResponse> {
    run(gateway, PromptTemplate::AnomalyNarration, &table.to_plain_text()).await
}
