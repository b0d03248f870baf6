// Task executors
// The engine drives tasks through the `Executor` capability. The default
// implementation calls the proxy's loopback chat-completions endpoint;
// system_report tasks short-circuit to a locally computed summary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{Result, SchedulerError};
use crate::store::Store;
use crate::task::{Task, TaskKind};
use crate::webhook::{TaskNotification, WebhookDispatcher};

/// Generous ceiling so slow model responses still complete.
const CHAT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const USER_AGENT: &str = concat!("cliproxy-scheduler/", env!("CARGO_PKG_VERSION"));
const ERROR_BODY_PREVIEW: usize = 500;

/// Invocation capability the engine holds tasks against. Tests substitute
/// recording or failing implementations.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, task: &Task) -> Result<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatExecutorConfig {
    /// Loopback base such as `http://127.0.0.1:8317`.
    pub base_url: String,
    /// When set, sent as both `X-Local-Password` and a bearer token.
    pub local_password: Option<String>,
}

/// Default executor: drives `{base_url}/v1/chat/completions` and extracts
/// the first choice's message content.
pub struct ChatExecutor {
    config: ChatExecutorConfig,
    client: Client,
    store: Arc<Store>,
    dispatcher: Arc<WebhookDispatcher>,
}

impl ChatExecutor {
    pub fn new(
        config: ChatExecutorConfig,
        store: Arc<Store>,
        dispatcher: Arc<WebhookDispatcher>,
    ) -> Self {
        Self {
            config,
            client: Client::builder()
                .timeout(CHAT_TIMEOUT)
                .user_agent(USER_AGENT)
                .build()
                .expect("failed to create reqwest client"),
            store,
            dispatcher,
        }
    }

    async fn chat_completion(&self, task: &Task) -> Result<String> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let body = json!({
            "model": task.model,
            "messages": [{"role": "user", "content": task.prompt}],
        });

        let mut request = self.client.post(url).json(&body);
        if let Some(password) = self
            .config
            .local_password
            .as_deref()
            .filter(|p| !p.is_empty())
        {
            request = request
                .header("X-Local-Password", password)
                .bearer_auth(password);
        }

        let response = request.send().await?;
        let status = response.status();
        let raw = response.text().await?;

        if status.as_u16() >= 400 {
            return Err(SchedulerError::UpstreamStatus {
                status: status.as_u16(),
                body: truncate_for_error(&raw, ERROR_BODY_PREVIEW),
            });
        }

        // A 2xx body that is not OpenAI-shaped is still worth logging
        // verbatim rather than failing the execution.
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => Ok(extract_chat_text(&value).unwrap_or(raw)),
            Err(_) => Ok(raw),
        }
    }

    /// Scheduler health summary over the store; no HTTP involved.
    fn build_system_report(&self) -> String {
        let total = self.store.task_count();
        let active = self.store.active_task_count();

        let cutoff = Utc::now() - chrono::Duration::hours(24);
        let logs = self.store.get_logs();
        let recent: Vec<_> = logs.iter().filter(|l| l.executed_at >= cutoff).collect();
        let failures = recent.iter().filter(|l| !l.success).count();
        let success_rate = if recent.is_empty() {
            100.0
        } else {
            (recent.len() - failures) as f64 / recent.len() as f64 * 100.0
        };

        format!(
            "**System Report**\n\n\
             Total Tasks: {total}\n\
             Active Tasks: {active}\n\
             Executions (24h): {executions}\n\
             Failures (24h): {failures}\n\
             Success Rate (24h): {success_rate:.1}%\n\n\
             Generated at {generated}",
            executions = recent.len(),
            generated = Utc::now().to_rfc3339(),
        )
    }
}

#[async_trait]
impl Executor for ChatExecutor {
    async fn execute(&self, task: &Task) -> Result<String> {
        let output = if task.kind == TaskKind::SystemReport {
            self.build_system_report()
        } else {
            self.chat_completion(task).await?
        };

        if !task.webhook_url.trim().is_empty() {
            let dispatcher = self.dispatcher.clone();
            let notification = TaskNotification::for_task(task, &output);
            tokio::spawn(async move {
                dispatcher.notify(&notification).await;
            });
            debug!("webhook dispatch queued for task {}", task.id);
        }

        Ok(output)
    }
}

fn extract_chat_text(value: &Value) -> Option<String> {
    value
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(|s| s.to_string())
}

fn truncate_for_error(body: &str, limit: usize) -> String {
    if body.chars().count() <= limit {
        return body.to_string();
    }
    let truncated: String = body.chars().take(limit).collect();
    format!("{truncated}...")
}

// ============================================================================
// Tests
// ============================================================================
