//! Notification channels for grade changes.

pub mod bark;
pub mod console;
pub mod email;
pub mod multi;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ChannelConfig;
use crate::model::Course;

pub use bark::BarkNotifier;
pub use console::ConsoleNotifier;
pub use email::EmailNotifier;
pub use multi::MultiNotifier;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("smtp failure: {0}")]
    Smtp(String),
    #[error("bad channel config: {0}")]
    Config(String),
}

/// A delivery channel for grade notifications.
///
/// `send` reports the outcome as a bool and never propagates transport
/// errors. A failed delivery is logged by the channel itself and must not
/// abort the run that produced it; the snapshot is persisted either way.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, title: &str, body: &str, course: Option<&Course>) -> bool;

    fn channel_name(&self) -> &str;
}

/// Build the notifier described by `config`. Pure construction, no network
/// traffic; bad addresses and empty composites fail here instead of at
/// send time.
pub fn build_notifier(config: &ChannelConfig) -> Result<Box<dyn Notifier>, NotifyError> {
    match config {
        ChannelConfig::Bark { token, icon } => {
            Ok(Box::new(BarkNotifier::new(token.clone(), icon.clone())))
        }
        ChannelConfig::Email {
            smtp_server,
            smtp_port,
            email_username,
            email_password,
            from_email,
            to_email,
        } => Ok(Box::new(EmailNotifier::from_config(
            smtp_server,
            *smtp_port,
            email_username,
            email_password,
            from_email,
            to_email,
        )?)),
        ChannelConfig::Console => Ok(Box::new(ConsoleNotifier)),
        ChannelConfig::Multi { channels } => {
            if channels.is_empty() {
                return Err(NotifyError::Config(
                    "multi channel needs at least one entry".to_string(),
                ));
            }
            let mut built = Vec::with_capacity(channels.len());
            for channel in channels {
                built.push(build_notifier(channel)?);
            }
            Ok(Box::new(MultiNotifier::new(built)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_bark_from_tagged_config() {
        let config: ChannelConfig = serde_yaml::from_str("type: bark\ntoken: devtoken").unwrap();
        let notifier = build_notifier(&config).unwrap();
        assert_eq!(notifier.channel_name(), "bark");
    }

    #[test]
    fn builds_console_channel() {
        let config: ChannelConfig = serde_yaml::from_str("type: console").unwrap();
        let notifier = build_notifier(&config).unwrap();
        assert_eq!(notifier.channel_name(), "console");
    }

    #[test]
    fn builds_email_channel() {
        let yaml = r#"
type: email
smtp_server: smtp.example.com
smtp_port: 587
email_username: bot@example.com
email_password: secret
from_email: bot@example.com
to_email: me@example.com
"#;
        let config: ChannelConfig = serde_yaml::from_str(yaml).unwrap();
        let notifier = build_notifier(&config).unwrap();
        assert_eq!(notifier.channel_name(), "email");
    }

    #[test]
    fn bad_email_address_is_a_config_error() {
        let config = ChannelConfig::Email {
            smtp_server: "smtp.example.com".to_string(),
            smtp_port: 587,
            email_username: "bot@example.com".to_string(),
            email_password: "secret".to_string(),
            from_email: "not-an-address".to_string(),
            to_email: "me@example.com".to_string(),
        };
        let Err(err) = build_notifier(&config) else {
            panic!("bad address should fail construction");
        };
        assert!(matches!(err, NotifyError::Config(_)));
    }

    #[test]
    fn builds_nested_multi_channel() {
        let yaml = r#"
type: multi
channels:
  - type: console
  - type: bark
    token: devtoken
"#;
        let config: ChannelConfig = serde_yaml::from_str(yaml).unwrap();
        let notifier = build_notifier(&config).unwrap();
        assert_eq!(notifier.channel_name(), "multi");
    }

    #[test]
    fn empty_multi_channel_is_rejected() {
        let config = ChannelConfig::Multi { channels: vec![] };
        let Err(err) = build_notifier(&config) else {
            panic!("empty multi channel should fail construction");
        };
        assert!(matches!(err, NotifyError::Config(_)));
        assert!(err.to_string().contains("at least one"));
    }
}
