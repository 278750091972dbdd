use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::model::Course;
use crate::notify::{Notifier, NotifyError};

const BARK_ENDPOINT: &str = "https://api.day.app";
const DEFAULT_ICON: &str = "https://cdn.arthals.ink/pku.jpg";
const SEND_TIMEOUT_SECS: u64 = 10;

/// Pushes notifications to an iOS device through the Bark relay.
pub struct BarkNotifier {
    client: Client,
    push_url: String,
    icon: String,
}

impl BarkNotifier {
    pub fn new(token: String, icon: Option<String>) -> Self {
        let client = Client::builder()
            .user_agent("gradewatch/0.1")
            .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
            .build()
            .expect("failed to build bark HTTP client");
        Self {
            client,
            push_url: format!("{BARK_ENDPOINT}/{token}"),
            icon: icon.unwrap_or_else(|| DEFAULT_ICON.to_string()),
        }
    }

    async fn deliver(&self, title: &str, body: &str) -> Result<(), NotifyError> {
        let form = [
            ("title", title),
            ("body", body),
            ("icon", self.icon.as_str()),
            ("level", "timeSensitive"),
        ];
        self.client
            .post(&self.push_url)
            .form(&form)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for BarkNotifier {
    async fn send(&self, title: &str, body: &str, _course: Option<&Course>) -> bool {
        match self.deliver(title, body).await {
            Ok(()) => {
                debug!(channel = "bark", title, "notification delivered");
                true
            }
            Err(err) => {
                warn!(channel = "bark", title, error = %err, "notification failed");
                false
            }
        }
    }

    fn channel_name(&self) -> &str {
        "bark"
    }
}
