use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{ChatOptions, ChatStream, ModelInfo, Provider, PullStream};
use super::configs::OllamaProviderConfig;
use super::utils::{
    messages_to_ollama_spec, parse_pull_line, parse_stream_line, tools_to_ollama_spec, LineBuffer,
};
use crate::errors::ProviderError;
use crate::models::message::Message;
use crate::models::tool::Tool;

pub const OLLAMA_HOST: &str = "http://localhost:11434";
pub const OLLAMA_MODEL: &str = "llama3.1";
pub const OLLAMA_KEEP_ALIVE: &str = "15m";

pub struct OllamaProvider {
    client: Client,
    config: OllamaProviderConfig,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

impl OllamaProvider {
    /// Only connecting is bounded by the client. Streamed bodies may run for as
    /// long as the model generates, so they are bounded per read instead.
    pub fn new(config: OllamaProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.config.host.trim_end_matches('/'), endpoint)
    }

    fn connection_error(&self, error: reqwest::Error) -> ProviderError {
        ProviderError::Connection {
            host: self.config.host.clone(),
            reason: error.to_string(),
        }
    }

    /// Send a request, giving up when no response arrives within the idle timeout
    async fn send(&self, request: RequestBuilder) -> Result<Response, ProviderError> {
        match tokio::time::timeout(self.config.idle_timeout, request.send()).await {
            Ok(result) => result.map_err(|e| self.connection_error(e)),
            Err(_) => Err(idle_error(&self.config.host, self.config.idle_timeout)),
        }
    }

    fn build_payload(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[Tool],
        options: &ChatOptions,
    ) -> Result<Value> {
        let mut payload = json!({
            "model": model,
            "messages": messages_to_ollama_spec(messages),
            "stream": true,
            "keep_alive": self.config.keep_alive,
        });

        let mut model_options = serde_json::Map::new();
        if let Some(temperature) = options.temperature {
            model_options.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(max_tokens) = options.max_tokens {
            model_options.insert("num_predict".to_string(), json!(max_tokens));
        }
        if !model_options.is_empty() {
            payload["options"] = Value::Object(model_options);
        }

        let tools_spec = tools_to_ollama_spec(tools)?;
        if !tools_spec.is_empty() {
            payload["tools"] = json!(tools_spec);
        }
        // Models without reasoning support reject the flag, so it is only sent on request
        if options.think {
            payload["think"] = json!(true);
        }

        Ok(payload)
    }

    async fn check_status(response: Response, model: &str) -> Result<Response, ProviderError> {
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(ProviderError::ModelNotFound(model.to_string())),
            status if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() >= 500 => {
                let body = response.text().await.unwrap_or_default();
                Err(ProviderError::Server(format!("{} {}", status, body.trim())))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ProviderError::Request(format!("{} {}", status, body.trim())))
            }
        }
    }

    /// Decode a newline-delimited JSON body as it arrives
    fn ndjson_stream<T, F>(&self, response: Response, parse: F) -> BoxStream<'static, Result<T>>
    where
        T: Send + 'static,
        F: Fn(&str) -> Result<Option<T>, ProviderError> + Send + 'static,
    {
        let host = self.config.host.clone();
        let idle_timeout = self.config.idle_timeout;
        let mut bytes = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut buffer = LineBuffer::default();
            loop {
                let data = match tokio::time::timeout(idle_timeout, bytes.next()).await {
                    Ok(Some(Ok(data))) => data,
                    Ok(None) => break,
                    Ok(Some(Err(e))) => {
                        yield Err(anyhow::Error::from(ProviderError::Connection {
                            host: host.clone(),
                            reason: e.to_string(),
                        }));
                        return;
                    }
                    Err(_) => {
                        yield Err(anyhow::Error::from(idle_error(&host, idle_timeout)));
                        return;
                    }
                };
                for line in buffer.push(&data) {
                    match parse(&line) {
                        Ok(Some(item)) => yield Ok(item),
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(anyhow::Error::from(e));
                            return;
                        }
                    }
                }
            }
            if let Some(rest) = buffer.finish() {
                match parse(&rest) {
                    Ok(Some(item)) => yield Ok(item),
                    Ok(None) => {}
                    Err(e) => yield Err(anyhow::Error::from(e)),
                }
            }
        };
        Box::pin(stream)
    }
}

fn idle_error(host: &str, idle_timeout: Duration) -> ProviderError {
    ProviderError::Connection {
        host: host.to_string(),
        reason: format!("no data received for {}s", idle_timeout.as_secs_f64()),
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    async fn stream_chat(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[Tool],
        options: &ChatOptions,
    ) -> Result<ChatStream> {
        let payload = self.build_payload(model, messages, tools, options)?;
        tracing::debug!(model, messages = messages.len(), tools = tools.len(), "starting chat stream");

        let response = self
            .send(self.client.post(self.url("api/chat")).json(&payload))
            .await?;
        let response = Self::check_status(response, model).await?;
        Ok(self.ndjson_stream(response, parse_stream_line))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self.send(self.client.get(self.url("api/tags"))).await?;
        let response = Self::check_status(response, "").await?;
        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        Ok(tags.models)
    }

    async fn pull_model(&self, model: &str) -> Result<PullStream> {
        tracing::debug!(model, "pulling model");
        let payload = json!({"model": model, "stream": true});
        let response = self
            .send(self.client.post(self.url("api/pull")).json(&payload))
            .await?;
        let response = Self::check_status(response, model).await?;
        Ok(self.ndjson_stream(response, parse_pull_line))
    }

    /// A generate request with no prompt and a zero keep-alive evicts the model
    async fn unload_model(&self, model: &str) -> Result<()> {
        let payload = json!({"model": model, "keep_alive": 0});
        let response = self
            .send(self.client.post(self.url("api/generate")).json(&payload))
            .await?;
        Self::check_status(response, model).await?;
        tracing::debug!(model, "model unloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::base::{ChatChunk, PullProgress};
    use futures::TryStreamExt;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn _setup_mock_server(status: u16, body: &str) -> (MockServer, OllamaProvider) {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&mock_server)
            .await;

        let provider = OllamaProvider::new(OllamaProviderConfig::new(mock_server.uri())).unwrap();
        (mock_server, provider)
    }

    async fn collect(provider: &OllamaProvider, tools: &[Tool]) -> Result<Vec<ChatChunk>> {
        let messages = vec![Message::user().with_text("Hello?")];
        let stream = provider
            .stream_chat(OLLAMA_MODEL, &messages, tools, &ChatOptions::default())
            .await?;
        stream.try_collect().await
    }

    #[tokio::test]
    async fn test_stream_text() -> Result<()> {
        let body = concat!(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Hello\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\" there\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true,\"prompt_eval_count\":12,\"eval_count\":2}\n",
        );
        let (_server, provider) = _setup_mock_server(200, body).await;

        let chunks = collect(&provider, &[]).await?;
        let text: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(text, "Hello there");
        let last = chunks.last().unwrap();
        assert!(last.done);
        assert_eq!(last.usage.as_ref().unwrap().output_tokens, Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn test_stream_tool_call() -> Result<()> {
        let body = "{\"message\":{\"role\":\"assistant\",\"content\":\"\",\"tool_calls\":[{\"function\":{\"name\":\"read_file\",\"arguments\":{\"file_path\":\"test.txt\"}}}]},\"done\":false}\n{\"done\":true}";
        let (_server, provider) = _setup_mock_server(200, body).await;

        let tool = Tool::new(
            "read_file",
            "Read the content of a file",
            json!({
                "type": "object",
                "properties": {"file_path": {"type": "string"}},
                "required": ["file_path"]
            }),
        );
        let chunks = collect(&provider, &[tool]).await?;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].tool_calls[0].name(), "read_file");
        assert_eq!(chunks[0].tool_calls[0].arguments()["file_path"], "test.txt");
        assert!(chunks[1].done);
        Ok(())
    }

    #[tokio::test]
    async fn test_payload_carries_options() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({
                "model": "qwen3:8b",
                "stream": true,
                "think": true,
                "keep_alive": OLLAMA_KEEP_ALIVE,
                "options": {"num_predict": 1500}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"done\":true}\n"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = OllamaProvider::new(OllamaProviderConfig::new(mock_server.uri()))?;
        let options = ChatOptions {
            temperature: None,
            max_tokens: Some(1500),
            think: true,
        };
        let stream = provider
            .stream_chat("qwen3:8b", &[Message::user().with_text("hi")], &[], &options)
            .await?;
        let chunks: Vec<ChatChunk> = stream.try_collect().await?;
        assert_eq!(chunks.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_think_flag_omitted_by_default() -> Result<()> {
        let provider = OllamaProvider::new(OllamaProviderConfig::default())?;
        let payload = provider.build_payload(
            OLLAMA_MODEL,
            &[Message::user().with_text("hi")],
            &[],
            &ChatOptions::default(),
        )?;
        assert!(payload.get("think").is_none());
        assert!(payload.get("tools").is_none());
        assert!(payload.get("options").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_model_not_found() -> Result<()> {
        let (_server, provider) = _setup_mock_server(404, "{\"error\":\"model not found\"}").await;

        let err = collect(&provider, &[]).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProviderError>(),
            Some(ProviderError::ModelNotFound(name)) if name == OLLAMA_MODEL
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_server_error() -> Result<()> {
        let (_server, provider) = _setup_mock_server(500, "boom").await;

        let err = collect(&provider, &[]).await.unwrap_err();
        assert!(err.to_string().contains("Server error: 500"));
        Ok(())
    }

    #[tokio::test]
    async fn test_error_inside_stream() -> Result<()> {
        let body = "{\"message\":{\"role\":\"assistant\",\"content\":\"Hi\"},\"done\":false}\n{\"error\":\"out of memory\"}\n";
        let (_server, provider) = _setup_mock_server(200, body).await;

        let err = collect(&provider, &[]).await.unwrap_err();
        assert!(err.to_string().contains("out of memory"));
        Ok(())
    }

    #[tokio::test]
    async fn test_connection_refused() -> Result<()> {
        let provider = OllamaProvider::new(OllamaProviderConfig::new("http://127.0.0.1:1"))?;
        let err = collect(&provider, &[]).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProviderError>(),
            Some(ProviderError::Connection { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_list_models() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [
                    {"name": "llama3.1:latest", "size": 4920753328u64, "modified_at": "2025-01-10T09:00:00Z"},
                    {"name": "qwen3:8b"}
                ]
            })))
            .mount(&mock_server)
            .await;

        let provider = OllamaProvider::new(OllamaProviderConfig::new(mock_server.uri()))?;
        let models = provider.list_models().await?;
        let names: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["llama3.1:latest", "qwen3:8b"]);
        assert_eq!(models[0].size, 4920753328);
        assert_eq!(models[1].size, 0);
        assert!(models[1].modified_at.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_pull_model_streams_progress() -> Result<()> {
        let mock_server = MockServer::start().await;
        let body = concat!(
            "{\"status\":\"pulling manifest\"}\n",
            "{\"status\":\"pulling 6a0746a1ec1a\",\"total\":100,\"completed\":40}\n",
            "{\"status\":\"success\"}\n",
        );
        Mock::given(method("POST"))
            .and(path("/api/pull"))
            .and(body_partial_json(json!({"model": "qwen3:4b", "stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = OllamaProvider::new(OllamaProviderConfig::new(mock_server.uri()))?;
        let updates: Vec<PullProgress> = provider.pull_model("qwen3:4b").await?.try_collect().await?;
        assert_eq!(updates.len(), 3);
        assert_eq!(updates[1].completed, Some(40));
        assert_eq!(updates[1].total, Some(100));
        assert_eq!(updates[2].status, "success");
        Ok(())
    }

    #[tokio::test]
    async fn test_pull_model_error_line() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/pull"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "{\"status\":\"pulling manifest\"}\n{\"error\":\"pull model manifest: file does not exist\"}\n",
            ))
            .mount(&mock_server)
            .await;

        let provider = OllamaProvider::new(OllamaProviderConfig::new(mock_server.uri()))?;
        let result: Result<Vec<PullProgress>> =
            provider.pull_model("nope").await?.try_collect().await;
        assert!(result.unwrap_err().to_string().contains("file does not exist"));
        Ok(())
    }

    #[tokio::test]
    async fn test_unload_model_sends_zero_keep_alive() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({"model": "qwen3:4b", "keep_alive": 0})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"done": true})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = OllamaProvider::new(OllamaProviderConfig::new(mock_server.uri()))?;
        provider.unload_model("qwen3:4b").await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_silent_backend_hits_idle_timeout() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("{\"done\":true}\n")
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&mock_server)
            .await;

        let config = OllamaProviderConfig {
            idle_timeout: Duration::from_millis(200),
            ..OllamaProviderConfig::new(mock_server.uri())
        };
        let provider = OllamaProvider::new(config)?;
        let err = collect(&provider, &[]).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProviderError>(),
            Some(ProviderError::Connection { reason, .. }) if reason.starts_with("no data received")
        ));
        Ok(())
    }

    #[test]
    fn test_default_timeouts() {
        let config = OllamaProviderConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.idle_timeout >= Duration::from_secs(60));
    }
}
