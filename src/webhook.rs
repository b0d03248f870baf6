// Webhook dispatcher
// Best-effort, single-shot result notifications. WeCom robot URLs get the
// template-card shape that host expects; every other destination gets a flat
// JSON body. Failures are logged and dropped, never retried.

use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::task::{Task, TaskKind};

const WECOM_HOST: &str = "qyapi.weixin.qq.com";
const WECOM_DESC_LIMIT: usize = 100;
const WECOM_SOURCE_ICON: &str =
    "https://wework.qpic.cn/wwpic/252813_jOfDHtcISzuodLa_1629280209/0";
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(15);

/// Snapshot of the fields a notification needs, detached from the task lock.
#[derive(Debug, Clone)]
pub struct TaskNotification {
    pub task_id: String,
    pub task_name: String,
    pub kind: TaskKind,
    pub model: String,
    pub webhook_url: String,
    pub executed_at: DateTime<Utc>,
    pub content: String,
}

impl TaskNotification {
    pub fn for_task(task: &Task, content: &str) -> Self {
        Self {
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            kind: task.kind,
            model: task.model.clone(),
            webhook_url: task.webhook_url.clone(),
            executed_at: Utc::now(),
            content: content.to_string(),
        }
    }
}

pub struct WebhookDispatcher {
    client: Client,
}

impl WebhookDispatcher {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(DELIVERY_TIMEOUT)
                .build()
                .expect("failed to create reqwest client"),
        }
    }

    /// Deliver one notification. Returns the HTTP status when a response
    /// arrived; callers that do not track delivery can ignore it.
    pub async fn notify(&self, notification: &TaskNotification) -> Option<u16> {
        let payload = build_payload(notification);
        let result = self
            .client
            .post(&notification.webhook_url)
            .json(&payload)
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    debug!(
                        "webhook delivered for task {} ({status})",
                        notification.task_id
                    );
                } else {
                    warn!(
                        "webhook for task {} rejected with status {status}",
                        notification.task_id
                    );
                }
                Some(status.as_u16())
            }
            Err(e) => {
                warn!("webhook for task {} failed: {e}", notification.task_id);
                None
            }
        }
    }
}

impl Default for WebhookDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn build_payload(notification: &TaskNotification) -> Value {
    if notification.webhook_url.contains(WECOM_HOST) {
        wecom_template_card(notification)
    } else {
        json!({
            "task_id": notification.task_id,
            "task_name": notification.task_name,
            "executed_at": notification.executed_at.to_rfc3339(),
            "content": notification.content,
        })
    }
}

fn wecom_template_card(notification: &TaskNotification) -> Value {
    let title = if notification.kind == TaskKind::SystemReport {
        "System Report".to_string()
    } else {
        format!("Task Completed: {}", notification.task_name)
    };
    let timestamp = notification
        .executed_at
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();

    json!({
        "msgtype": "template_card",
        "template_card": {
            "card_type": "text_notice",
            "source": {
                "icon_url": WECOM_SOURCE_ICON,
                "desc": truncate_desc(&notification.content, WECOM_DESC_LIMIT),
                "desc_color": 0,
            },
            "main_title": {
                "title": title,
                "desc": notification.task_name,
            },
            "emphasis_content": {
                "title": "Success",
                "desc": "Task completed",
            },
            "sub_title_text": timestamp,
            "horizontal_content_list": [
                { "keyname": "Task Type", "value": notification.kind.as_str() },
                { "keyname": "Model", "value": notification.model },
            ],
            "card_action": {
                "type": 1,
                "url": "https://work.weixin.qq.com",
            },
            "quote_area": {
                "type": 0,
                "quote_text": notification.content,
            },
        },
    })
}

fn truncate_desc(content: &str, limit: usize) -> String {
    if content.chars().count() <= limit {
        return content.to_string();
    }
    let truncated: String = content.chars().take(limit).collect();
    format!("{truncated}...")
}

// ============================================================================
// Tests
// ============================================================================
