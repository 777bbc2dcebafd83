//! API call step executor.

use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::StepExecutor;
use crate::connection::{ConnectionClient, HttpRequest, HttpResponse, RequestBody, RequestTarget};
use crate::context::ExecutionContext;
use crate::error::StepError;
use crate::plan::{ApiCallStep, ResponseFormat, TargetTemplate};
use crate::sanitize::sanitize_headers;
use crate::template::TemplateResolver;

/// Issues a step's HTTP request through the execution's connection.
pub struct ApiCallExecutor {
    client: Arc<dyn ConnectionClient>,
    resolver: TemplateResolver,
    default_timeout: Duration,
}

impl ApiCallExecutor {
    pub fn new(client: Arc<dyn ConnectionClient>, default_timeout: Duration) -> Self {
        Self {
            client,
            resolver: TemplateResolver::new(),
            default_timeout,
        }
    }

    fn timeout_for(&self, step: &ApiCallStep) -> Duration {
        step.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout)
    }

    /// Resolve every template in the step into a concrete request.
    pub fn build_request(&self, step: &ApiCallStep, ctx: &ExecutionContext) -> Result<HttpRequest, StepError> {
        let target = match &step.target {
            TargetTemplate::Url(t) => RequestTarget::Url(self.resolver.render(t, ctx)?),
            TargetTemplate::Path(t) => RequestTarget::Path(self.resolver.render(t, ctx)?),
        };

        let mut request = HttpRequest::new(step.method, target);

        for (name, value) in &step.headers {
            request.headers.push((name.clone(), self.resolver.render(value, ctx)?));
        }

        for (name, value) in &step.query {
            let resolved = self.resolver.resolve_value(value, ctx)?;
            let text = match resolved {
                Value::String(s) => s,
                Value::Null => {
                    return Err(StepError::Validation(format!(
                        "query parameter '{name}' resolved to null"
                    )))
                }
                other => other.to_string(),
            };
            request.query.push((name.clone(), text));
        }

        if let Some(body) = &step.body {
            request.body = Some(match self.resolver.resolve_value(body, ctx)? {
                Value::String(s) => RequestBody::Text(s),
                other => RequestBody::Json(other),
            });
        }

        request.timeout = Some(self.timeout_for(step));
        Ok(request)
    }
}

/// Convert a response body according to the requested format.
fn decode_body(format: ResponseFormat, body: &[u8]) -> Value {
    match format {
        ResponseFormat::Json => serde_json::from_slice(body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned())),
        ResponseFormat::Text => Value::String(String::from_utf8_lossy(body).into_owned()),
        ResponseFormat::Binary => json!({
            "base64": base64::engine::general_purpose::STANDARD.encode(body),
            "size": body.len(),
        }),
    }
}

fn response_output(format: ResponseFormat, response: &HttpResponse) -> Value {
    let headers: Map<String, Value> = response
        .headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), Value::String(v.clone())))
        .collect();

    json!({
        "status": response.status,
        "headers": sanitize_headers(&headers),
        "data": decode_body(format, &response.body),
    })
}

#[async_trait]
impl StepExecutor for ApiCallExecutor {
    type Step = ApiCallStep;

    async fn execute(
        &self,
        step: &ApiCallStep,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<Value, StepError> {
        let request = self.build_request(step, ctx)?;
        let timeout = self.timeout_for(step);
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);

        tracing::debug!(
            method = step.method.as_str(),
            target = ?request.target,
            timeout_ms,
            "Executing API call"
        );

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StepError::Canceled),
            result = tokio::time::timeout(timeout, self.client.send(request)) => match result {
                Err(_) => return Err(StepError::CallTimeout(timeout_ms)),
                Ok(response) => response.map_err(|e| StepError::from_connection(e, timeout_ms))?,
            },
        };

        if !step.accepts(response.status) {
            tracing::debug!(status = response.status, "API call returned unaccepted status");
            return Err(StepError::HttpStatus {
                status: response.status,
            });
        }

        Ok(response_output(step.response_format, &response))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::connection::{ConnectionError, HttpMethod};
    use crate::plan::StatusRange;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Client answering from a fixed script, recording every request.
    pub(crate) struct ScriptedClient {
        pub responses: Mutex<VecDeque<Result<HttpResponse, ConnectionError>>>,
        pub requests: Mutex<Vec<HttpRequest>>,
        pub delay: Duration,
    }

    impl ScriptedClient {
        pub(crate) fn new(responses: Vec<Result<HttpResponse, ConnectionError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }
    }

    pub(crate) fn ok_json(status: u16, body: Value) -> Result<HttpResponse, ConnectionError> {
        Ok(HttpResponse {
            status,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: body.to_string().into_bytes(),
        })
    }

    #[async_trait]
    impl ConnectionClient for ScriptedClient {
        fn base_url(&self) -> Option<&str> {
            Some("http://scripted.local")
        }

        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ConnectionError> {
            self.requests.lock().unwrap().push(request);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ConnectionError::Network("script exhausted".into())))
        }
    }

    fn step(target: TargetTemplate) -> ApiCallStep {
        ApiCallStep {
            method: HttpMethod::GET,
            target,
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
            accept_status: Vec::new(),
            timeout_ms: None,
            response_format: ResponseFormat::Json,
        }
    }

    fn context() -> ExecutionContext {
        let mut ctx = ExecutionContext::new(Uuid::new_v4(), "wf", "tester");
        ctx.insert(0, "first", json!({"data": {"x": 1, "name": "alpha"}}));
        ctx
    }

    #[test]
    fn test_build_request_resolves_templates() {
        let executor = ApiCallExecutor::new(Arc::new(ScriptedClient::new(vec![])), Duration::from_secs(5));
        let mut s = step(TargetTemplate::Path("/items/{{ first.data.name }}".into()));
        s.method = HttpMethod::POST;
        s.headers.push(("X-Item".into(), "{{ first.data.x }}".into()));
        s.query.push(("n".into(), json!("{{ first.data.x }}")));
        s.body = Some(json!({"value": "{{ first.data.x }}", "label": "id-{{ first.data.x }}"}));
        s.timeout_ms = Some(250);

        let request = executor.build_request(&s, &context()).unwrap();
        assert_eq!(request.target, RequestTarget::Path("/items/alpha".into()));
        assert_eq!(request.headers, vec![("X-Item".to_string(), "1".to_string())]);
        assert_eq!(request.query, vec![("n".to_string(), "1".to_string())]);
        assert_eq!(
            request.body,
            Some(RequestBody::Json(json!({"value": 1, "label": "id-1"})))
        );
        assert_eq!(request.timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_build_request_missing_field_fails() {
        let executor = ApiCallExecutor::new(Arc::new(ScriptedClient::new(vec![])), Duration::from_secs(5));
        let mut s = step(TargetTemplate::Url("https://api.example.com".into()));
        s.body = Some(json!({"value": "{{ first.data.missing }}"}));
        let err = executor.build_request(&s, &context()).unwrap_err();
        assert!(matches!(err, StepError::Template(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_success_output_shape() {
        let client = Arc::new(ScriptedClient::new(vec![Ok(HttpResponse {
            status: 200,
            headers: vec![
                ("Content-Type".into(), "application/json".into()),
                ("Set-Cookie".into(), "session=abc".into()),
            ],
            body: br#"{"data": {"x": 1}}"#.to_vec(),
        })]));
        let executor = ApiCallExecutor::new(client.clone(), Duration::from_secs(5));
        let output = executor
            .execute(&step(TargetTemplate::Path("/x".into())), &context(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output["status"], 200);
        assert_eq!(output["data"]["data"]["x"], 1);
        assert_eq!(output["headers"]["content-type"], "application/json");
        assert_eq!(output["headers"]["set-cookie"], crate::sanitize::REDACTED);
        assert_eq!(client.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_status_classification() {
        let client = Arc::new(ScriptedClient::new(vec![
            ok_json(404, json!({})),
            ok_json(503, json!({})),
            ok_json(404, json!({"found": false})),
        ]));
        let executor = ApiCallExecutor::new(client, Duration::from_secs(5));
        let ctx = context();
        let cancel = CancellationToken::new();
        let s = step(TargetTemplate::Path("/x".into()));

        let err = executor.execute(&s, &ctx, &cancel).await.unwrap_err();
        assert_eq!(err, StepError::HttpStatus { status: 404 });
        assert!(!err.is_retryable());

        let err = executor.execute(&s, &ctx, &cancel).await.unwrap_err();
        assert!(err.is_retryable());

        let mut lenient = s.clone();
        lenient.accept_status = vec![StatusRange::parse("2xx").unwrap(), StatusRange::parse("404").unwrap()];
        let output = executor.execute(&lenient, &ctx, &cancel).await.unwrap();
        assert_eq!(output["data"]["found"], false);
    }

    #[tokio::test]
    async fn test_call_timeout() {
        let mut client = ScriptedClient::new(vec![ok_json(200, json!({}))]);
        client.delay = Duration::from_millis(500);
        let executor = ApiCallExecutor::new(Arc::new(client), Duration::from_millis(20));
        let err = executor
            .execute(&step(TargetTemplate::Path("/slow".into())), &context(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, StepError::CallTimeout(20));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_cancel_aborts_in_flight_call() {
        let mut client = ScriptedClient::new(vec![ok_json(200, json!({}))]);
        client.delay = Duration::from_secs(10);
        let executor = ApiCallExecutor::new(Arc::new(client), Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = executor
            .execute(&step(TargetTemplate::Path("/hang".into())), &context(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, StepError::Canceled);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_network_error_is_retryable() {
        let client = Arc::new(ScriptedClient::new(vec![Err(ConnectionError::Network(
            "dns error".into(),
        ))]));
        let executor = ApiCallExecutor::new(client, Duration::from_secs(5));
        let err = executor
            .execute(&step(TargetTemplate::Path("/x".into())), &context(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Network(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_decode_body_formats() {
        assert_eq!(decode_body(ResponseFormat::Json, b"{\"a\":1}"), json!({"a": 1}));
        assert_eq!(decode_body(ResponseFormat::Json, b"plain"), json!("plain"));
        assert_eq!(decode_body(ResponseFormat::Text, b"{\"a\":1}"), json!("{\"a\":1}"));
        assert_eq!(
            decode_body(ResponseFormat::Binary, b"hi"),
            json!({"base64": "aGk=", "size": 2})
        );
    }
}
