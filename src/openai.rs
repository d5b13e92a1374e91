use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, error};

use crate::brain::{FunctionDef, Policy, PolicyError};
use crate::types::ChatMessage;

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// [`Policy`] backed by the OpenAI chat completions API.
pub struct OpenAiPolicy {
    client: Client,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiPolicy {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            temperature,
        }
    }

    async fn send(&self, body: Value) -> Result<Value, PolicyError> {
        let response = self
            .client
            .post(CHAT_COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PolicyError::Unavailable(format!("request failed: {e}")))?;

        let status = response.status();
        let json_resp: Value = response
            .json()
            .await
            .map_err(|e| PolicyError::Unavailable(format!("unreadable response: {e}")))?;
        check_status(status, json_resp)
    }
}

fn chat_body(model: &str, temperature: f32, prompt: &str) -> Value {
    json!({
        "model": model,
        "messages": [ChatMessage::user(prompt)],
        "temperature": temperature,
    })
}

/// Request body that offers exactly one tool and forces the model to call it.
fn function_call_body(model: &str, temperature: f32, prompt: &str, function: &FunctionDef) -> Value {
    let mut body = chat_body(model, temperature, prompt);
    body["tools"] = json!([{
        "type": "function",
        "function": {
            "name": function.name,
            "description": function.description,
            "parameters": function.parameters,
        }
    }]);
    body["tool_choice"] = json!({"type": "function", "function": {"name": function.name}});
    body
}

fn check_status(status: StatusCode, json_resp: Value) -> Result<Value, PolicyError> {
    if status.is_success() {
        return Ok(json_resp);
    }
    let err_msg = json_resp["error"]["message"]
        .as_str()
        .unwrap_or("Unknown API error");
    error!(%status, %err_msg, "OpenAI API error");
    Err(PolicyError::Unavailable(format!(
        "OpenAI API error ({status}): {err_msg}"
    )))
}

fn completion_content(json_resp: &Value) -> Result<String, PolicyError> {
    json_resp["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| PolicyError::Unavailable(format!("no content in LLM response: {json_resp}")))
}

fn function_arguments(json_resp: &Value, function: &FunctionDef) -> Result<String, PolicyError> {
    let call = &json_resp["choices"][0]["message"]["tool_calls"][0]["function"];
    if call["name"].as_str().is_some_and(|name| name != function.name) {
        return Err(PolicyError::SchemaViolation(format!(
            "expected a {} call, got {}",
            function.name, call["name"]
        )));
    }
    call["arguments"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| PolicyError::SchemaViolation(format!("no {} call in LLM response", function.name)))
}

#[async_trait]
impl Policy for OpenAiPolicy {
    async fn complete(&self, prompt: &str) -> Result<String, PolicyError> {
        let json_resp = self
            .send(chat_body(&self.model, self.temperature, prompt))
            .await?;
        let content = completion_content(&json_resp)?;
        debug!(%content, "LLM says");
        Ok(content)
    }

    async fn complete_with_function(
        &self,
        prompt: &str,
        function: &FunctionDef,
    ) -> Result<String, PolicyError> {
        let json_resp = self
            .send(function_call_body(&self.model, self.temperature, prompt, function))
            .await?;
        let arguments = function_arguments(&json_resp, function)?;
        debug!(%arguments, "LLM function call");
        Ok(arguments)
    }
}
