//! Shell commands
//!
//! The shell binary speaks line-delimited JSON-RPC 2.0 on stdin/stdout. Each
//! request runs to completion before the next line is read. One
//! `ShellSession` holds the chat transcript for the lifetime of the process.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::assistant::{self, AssistantModule, PolicyDocument};
use crate::chat::ChatSession;
use crate::config::AssistantConfig;
use crate::feedback::{self, FeedbackCategory};
use crate::globals;
use crate::llm_engine::{display_text, ModelError, ModelGateway, ModelResponse};
use crate::table::UploadedTable;

pub const PARSE_ERROR: i32 = -32700;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const HANDLER_FAILED: i32 = -32000;

// ============================================================================
// JSON-RPC Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    jsonrpc: String,
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcResponse {
    pub fn success(id: u64, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: u64, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError { code, message }),
        }
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Unknown method: {0}")]
    UnknownMethod(String),
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    #[error("{0} is required")]
    MissingInput(&'static str),
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl CommandError {
    pub fn code(&self) -> i32 {
        match self {
            CommandError::UnknownMethod(_) => METHOD_NOT_FOUND,
            CommandError::InvalidParams(_) | CommandError::MissingInput(_) => INVALID_PARAMS,
            CommandError::Failed(_) => HANDLER_FAILED,
        }
    }
}

impl From<feedback::FeedbackError> for CommandError {
    fn from(e: feedback::FeedbackError) -> Self {
        CommandError::InvalidParams(e.to_string())
    }
}

type CommandResult = Result<serde_json::Value, CommandError>;

// ============================================================================
// Params
// ============================================================================

#[derive(Debug, Deserialize)]
struct FeedbackParams {
    category: String,
    #[serde(default)]
    description: String,
}

/// A CSV upload, inline or by path
#[derive(Debug, Deserialize)]
struct TableParams {
    #[serde(default)]
    csv: Option<String>,
    #[serde(default)]
    path: Option<PathBuf>,
}

impl TableParams {
    fn load(&self) -> Result<UploadedTable, CommandError> {
        match (&self.csv, &self.path) {
            (Some(csv), _) => Ok(UploadedTable::from_csv_str(csv)?),
            (None, Some(path)) => Ok(UploadedTable::from_csv_path(path)?),
            (None, None) => Err(CommandError::MissingInput("csv or path")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EcoTipsParams {
    keyword: String,
}

#[derive(Debug, Deserialize)]
struct ChatParams {
    message: String,
}

fn parse<T: for<'de> Deserialize<'de>>(params: serde_json::Value) -> Result<T, CommandError> {
    serde_json::from_value(params).map_err(|e| CommandError::InvalidParams(e.to_string()))
}

/// What a model-backed command returns to the shell
#[derive(Debug, Serialize)]
struct ModelReply {
    ok: bool,
    text: String,
}

impl From<&ModelResponse> for ModelReply {
    fn from(response: &ModelResponse) -> Self {
        Self {
            ok: response.is_ok(),
            text: display_text(response),
        }
    }
}

fn reply(response: Option<ModelResponse>, input: &'static str) -> CommandResult {
    let response = response.ok_or(CommandError::MissingInput(input))?;
    Ok(serde_json::to_value(ModelReply::from(&response)).map_err(anyhow::Error::from)?)
}

// ============================================================================
// Session
// ============================================================================

enum GatewaySource {
    /// Process-wide gateway, loaded on first use
    Shared(AssistantConfig),
    Fixed(Arc<ModelGateway>),
}

pub struct ShellSession {
    gateway: GatewaySource,
    chat: ChatSession,
}

impl ShellSession {
    pub fn new(config: AssistantConfig) -> Self {
        Self {
            gateway: GatewaySource::Shared(config),
            chat: ChatSession::new(),
        }
    }

    pub fn with_gateway(gateway: Arc<ModelGateway>) -> Self {
        Self {
            gateway: GatewaySource::Fixed(gateway),
            chat: ChatSession::new(),
        }
    }

    async fn gateway(&self) -> Result<Arc<ModelGateway>, ModelError> {
        match &self.gateway {
            GatewaySource::Shared(config) => globals::shared_gateway(config).await,
            GatewaySource::Fixed(gateway) => Ok(gateway.clone()),
        }
    }

    pub async fn handle(&mut self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id;
        log::debug!("Received request: {} (id={})", request.method, id);

        let result = match request.method.as_str() {
            "dashboard" => self.dashboard(),
            "summarize_policy" => match parse(request.params) {
                Ok(document) => self.summarize_policy(document).await,
                Err(e) => Err(e),
            },
            "log_feedback" => parse(request.params).and_then(|p| self.log_feedback(p)),
            "forecast_kpi" => match parse(request.params) {
                Ok(params) => self.forecast_kpi(params).await,
                Err(e) => Err(e),
            },
            "detect_anomalies" => match parse(request.params) {
                Ok(params) => self.detect_anomalies(params).await,
                Err(e) => Err(e),
            },
            "eco_tips" => match parse(request.params) {
                Ok(params) => self.eco_tips(params).await,
                Err(e) => Err(e),
            },
            "chat" => match parse(request.params) {
                Ok(params) => self.chat(params).await,
                Err(e) => Err(e),
            },
            "chat_history" => self.chat_history(),
            "reset_chat" => self.reset_chat(),
            other => Err(CommandError::UnknownMethod(other.to_string())),
        };

        match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => {
                log::warn!("Request {} failed: {}", id, e);
                JsonRpcResponse::error(id, e.code(), e.to_string())
            }
        }
    }

    fn dashboard(&self) -> CommandResult {
        let modules: Vec<_> = AssistantModule::MENU.iter().map(|m| m.info()).collect();
        Ok(serde_json::json!({
            "overview": assistant::dashboard_overview(),
            "modules": modules,
        }))
    }

    async fn summarize_policy(&self, document: PolicyDocument) -> CommandResult {
        if document.text().trim().is_empty() {
            return Err(CommandError::MissingInput("policy text"));
        }
        let response = match self.gateway().await {
            Ok(gateway) => assistant::summarize_policy(&gateway, &document).await,
            Err(e) => Some(Err(e)),
        };
        reply(response, "policy text")
    }

    fn log_feedback(&self, params: FeedbackParams) -> CommandResult {
        let category: FeedbackCategory = params.category.parse()?;
        let receipt = feedback::log_feedback(category, &params.description);
        Ok(serde_json::json!({
            "confirmation": receipt.confirmation(),
            "description": receipt.description_line(),
            "receipt": receipt,
        }))
    }

    async fn forecast_kpi(&self, params: TableParams) -> CommandResult {
        let table = params.load()?;
        let response = match self.gateway().await {
            Ok(gateway) => assistant::forecast_kpi(&gateway, &table).await,
            Err(e) => Some(Err(e)),
        };
        with_table(reply(response, "KPI table")?, &table)
    }

    async fn detect_anomalies(&self, params: TableParams) -> CommandResult {
        let table = params.load()?;
        let response = match self.gateway().await {
            Ok(gateway) => assistant::detect_anomalies(&gateway, &table).await,
            Err(e) => Some(Err(e)),
        };
        with_table(reply(response, "KPI table")?, &table)
    }

    async fn eco_tips(&self, params: EcoTipsParams) -> CommandResult {
        if params.keyword.trim().is_empty() {
            return Err(CommandError::MissingInput("keyword"));
        }
        let response = match self.gateway().await {
            Ok(gateway) => assistant::eco_tips(&gateway, &params.keyword).await,
            Err(e) => Some(Err(e)),
        };
        reply(response, "keyword")
    }

    async fn chat(&mut self, params: ChatParams) -> CommandResult {
        if params.message.trim().is_empty() {
            return Err(CommandError::MissingInput("message"));
        }
        let response = match self.gateway().await {
            Ok(gateway) => self.chat.send(&gateway, &params.message).await,
            Err(e) => {
                let failed = Err(e);
                self.chat.record_failed_turn(&params.message, &failed);
                Some(failed)
            }
        };
        reply(response, "message")
    }

    fn chat_history(&self) -> CommandResult {
        Ok(serde_json::json!({
            "session_id": self.chat.id(),
            "messages": self.chat.transcript().messages(),
        }))
    }

    fn reset_chat(&mut self) -> CommandResult {
        log::info!("Chat session {} closed", self.chat.id());
        self.chat = ChatSession::new();
        Ok(serde_json::json!({ "session_id": self.chat.id() }))
    }
}

fn with_table(mut reply: serde_json::Value, table: &UploadedTable) -> CommandResult {
    reply["table"] = serde_json::to_value(table).map_err(anyhow::Error::from)?;
    Ok(reply)
}

/// Decode one request line. `None` for blank lines.
fn parse_line(bytes: &[u8]) -> Option<Result<JsonRpcRequest, String>> {
    let line = match std::str::from_utf8(bytes) {
        Ok(line) => line,
        Err(e) => return Some(Err(format!("Parse error: request is not valid UTF-8 ({})", e))),
    };
    if line.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str(line).map_err(|e| format!("Parse error: {}", e)))
}

/// Answer requests read from `reader` until EOF, one response line each.
///
/// A line that is not UTF-8 or not a request gets a parse error for id 0 and
/// the loop moves on. Only an I/O error ends it early.
pub async fn serve<R, W>(shell: &mut ShellSession, mut reader: R, writer: &mut W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(());
        }

        let response = match parse_line(&buf) {
            None => continue,
            Some(Ok(request)) => shell.handle(request).await,
            Some(Err(message)) => {
                log::warn!("Rejected request line: {}", message);
                JsonRpcResponse::error(0, PARSE_ERROR, message)
            }
        };

        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        writer.write_all(&out).await?;
        writer.flush().await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_engine::testing::MockProvider;
    use crate::llm_engine::ERROR_MARKER;

    fn request(id: u64, method: &str, params: serde_json::Value) -> JsonRpcRequest {
        serde_json::from_value(serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))
        .unwrap()
    }

    fn session(mock: &Arc<MockProvider>) -> ShellSession {
        ShellSession::with_gateway(Arc::new(ModelGateway::new(mock.clone())))
    }

    #[tokio::test]
    async fn test_eco_tips_command() {
        let mock = Arc::new(MockProvider::scripted(["Turn off lights."]));
        let mut shell = session(&mock);

        let response = shell
            .handle(request(1, "eco_tips", serde_json::json!({"keyword": "solar"})))
            .await;
        let result = response.result.unwrap();
        assert_eq!(result["ok"], true);
        assert_eq!(result["text"], "Turn off lights.");
        assert_eq!(response.id, 1);
    }

    #[tokio::test]
    async fn test_blank_keyword_is_invalid() {
        let mock = Arc::new(MockProvider::echo());
        let mut shell = session(&mock);

        let response = shell
            .handle(request(2, "eco_tips", serde_json::json!({"keyword": " "})))
            .await;
        assert_eq!(response.error.unwrap().code, INVALID_PARAMS);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_feedback_never_calls_model() {
        let mock = Arc::new(MockProvider::echo());
        let mut shell = session(&mock);

        let response = shell
            .handle(request(
                3,
                "log_feedback",
                serde_json::json!({"category": "Roads", "description": "Pothole on Main St"}),
            ))
            .await;
        let result = response.result.unwrap();
        assert_eq!(result["confirmation"], "Feedback logged under 'Roads' category.");
        assert_eq!(result["description"], "Description: Pothole on Main St");
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_feedback_unknown_category() {
        let mut shell = session(&Arc::new(MockProvider::echo()));
        let response = shell
            .handle(request(4, "log_feedback", serde_json::json!({"category": "Parks"})))
            .await;
        assert_eq!(response.error.unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_forecast_returns_table() {
        let mock = Arc::new(MockProvider::echo());
        let mut shell = session(&mock);

        let response = shell
            .handle(request(
                5,
                "forecast_kpi",
                serde_json::json!({"csv": "zone,usage\nA,120\nB,95\n"}),
            ))
            .await;
        let result = response.result.unwrap();
        assert_eq!(result["ok"], true);
        assert_eq!(result["table"]["columns"][1], "usage");
        assert!(mock.prompts()[0].starts_with("Given the following KPI data"));
    }

    #[tokio::test]
    async fn test_bad_csv_is_handler_failure() {
        let mut shell = session(&Arc::new(MockProvider::echo()));
        let response = shell
            .handle(request(
                6,
                "detect_anomalies",
                serde_json::json!({"csv": "zone,usage\nA,1,2\n"}),
            ))
            .await;
        assert_eq!(response.error.unwrap().code, HANDLER_FAILED);
    }

    #[tokio::test]
    async fn test_model_failure_is_a_reply() {
        let mock = Arc::new(MockProvider::failing(ModelError::InferenceFailed(
            "context overflow".to_string(),
        )));
        let mut shell = session(&mock);

        let response = shell
            .handle(request(
                7,
                "summarize_policy",
                serde_json::json!({"pasted": "Water rationing rules"}),
            ))
            .await;
        let result = response.result.unwrap();
        assert_eq!(result["ok"], false);
        let text = result["text"].as_str().unwrap();
        assert!(text.starts_with(ERROR_MARKER));
        assert!(text.contains("context overflow"));
    }

    #[tokio::test]
    async fn test_chat_history_and_reset() {
        let mock = Arc::new(MockProvider::scripted(["R1", "R2"]));
        let mut shell = session(&mock);

        shell.handle(request(8, "chat", serde_json::json!({"message": "U1"}))).await;
        shell.handle(request(9, "chat", serde_json::json!({"message": "U2"}))).await;

        let history = shell
            .handle(request(10, "chat_history", serde_json::Value::Null))
            .await
            .result
            .unwrap();
        let messages = history["messages"].as_array().unwrap();
        let turns: Vec<(&str, &str)> = messages
            .iter()
            .map(|m| (m["role"].as_str().unwrap(), m["content"].as_str().unwrap()))
            .collect();
        assert_eq!(
            turns,
            vec![("user", "U1"), ("assistant", "R1"), ("user", "U2"), ("assistant", "R2")]
        );

        let old_id = history["session_id"].clone();
        let reset = shell
            .handle(request(11, "reset_chat", serde_json::Value::Null))
            .await
            .result
            .unwrap();
        assert_ne!(reset["session_id"], old_id);

        let history = shell
            .handle(request(12, "chat_history", serde_json::Value::Null))
            .await
            .result
            .unwrap();
        assert!(history["messages"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dashboard() {
        let mut shell = session(&Arc::new(MockProvider::echo()));
        let result = shell
            .handle(request(13, "dashboard", serde_json::Value::Null))
            .await
            .result
            .unwrap();
        assert_eq!(result["modules"].as_array().unwrap().len(), 7);
        assert!(result["overview"].as_str().unwrap().contains("Eco Tips Generator"));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let mut shell = session(&Arc::new(MockProvider::echo()));
        let response = shell.handle(request(14, "retrain", serde_json::json!({}))).await;
        let error = response.error.unwrap();
        assert_eq!(error.code, METHOD_NOT_FOUND);
        assert!(error.message.contains("retrain"));
    }

    #[tokio::test]
    async fn test_invalid_params() {
        let mut shell = session(&Arc::new(MockProvider::echo()));
        let response = shell
            .handle(request(15, "chat", serde_json::json!({"text": "wrong field"})))
            .await;
        assert_eq!(response.error.unwrap().code, INVALID_PARAMS);
    }

    fn response_lines(output: &[u8]) -> Vec<serde_json::Value> {
        std::str::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_serve_survives_non_utf8_line() {
        let mut shell = session(&Arc::new(MockProvider::echo()));
        let mut input: Vec<u8> = Vec::new();
        input.extend_from_slice(
            b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"log_feedback\",\"params\":{\"category\":\"Roads\",\"description\":\"caf\xe9\"}}\n",
        );
        input.extend_from_slice(b"\n");
        input.extend_from_slice(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"dashboard\"}\n");
        let mut output = Vec::new();

        serve(&mut shell, input.as_slice(), &mut output).await.unwrap();

        let responses = response_lines(&output);
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], 0);
        assert_eq!(responses[0]["error"]["code"], PARSE_ERROR);
        assert!(responses[0]["error"]["message"].as_str().unwrap().contains("UTF-8"));
        assert_eq!(responses[1]["id"], 2);
        assert_eq!(responses[1]["result"]["modules"].as_array().unwrap().len(), 7);
    }

    #[tokio::test]
    async fn test_serve_keeps_chat_after_bad_json() {
        let mock = Arc::new(MockProvider::scripted(["Hello!"]));
        let mut shell = session(&mock);
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"chat\",\"params\":{\"message\":\"hi\"}}\n",
            "not json\n",
            "{\"jsonrpc\":\"2.0\",\"id\":3,\"method\":\"chat_history\"}",
        );
        let mut output = Vec::new();

        serve(&mut shell, input.as_bytes(), &mut output).await.unwrap();

        let responses = response_lines(&output);
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["result"]["text"], "Hello!");
        assert_eq!(responses[1]["error"]["code"], PARSE_ERROR);
        assert_eq!(responses[2]["result"]["messages"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_serve_string_id_is_parse_error() {
        let mut shell = session(&Arc::new(MockProvider::echo()));
        let input = b"{\"jsonrpc\":\"2.0\",\"id\":\"abc\",\"method\":\"dashboard\"}\n";
        let mut output = Vec::new();

        serve(&mut shell, &input[..], &mut output).await.unwrap();

        let responses = response_lines(&output);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], 0);
        assert_eq!(responses[0]["error"]["code"], PARSE_ERROR);
    }
}
