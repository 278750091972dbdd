use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Notification channel selection, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelConfig {
    Bark {
        token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        icon: Option<String>,
    },
    Email {
        smtp_server: String,
        #[serde(default = "default_smtp_port")]
        smtp_port: u16,
        email_username: String,
        email_password: String,
        from_email: String,
        to_email: String,
    },
    Console,
    Multi {
        channels: Vec<ChannelConfig>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub username: String,
    pub password: String,
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
    #[serde(default)]
    pub quiet_first_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_dump_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifier: Option<ChannelConfig>,
    /// Bare Bark device token, the config shorthand from early versions.
    /// `notifier` wins when both are present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bark: Option<String>,
}

impl Config {
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.yaml")
    }

    /// Load and validate the config. A missing file is an error: the
    /// portal credentials have no sensible default.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed reading config: {}", path.display()))?;
        let parsed: Self = serde_yaml::from_str(&data)
            .with_context(|| format!("failed parsing YAML config: {}", path.display()))?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() {
            bail!("username is required");
        }
        if self.password.trim().is_empty() {
            bail!("password is required");
        }
        Ok(())
    }

    /// Resolve the effective notification channel. The tagged `notifier`
    /// block wins; a bare `bark` token is wrapped into a Bark channel so
    /// configs written for earlier versions keep working.
    pub fn channel(&self) -> Option<ChannelConfig> {
        if let Some(channel) = &self.notifier {
            return Some(channel.clone());
        }
        self.bark.as_ref().map(|token| ChannelConfig::Bark {
            token: token.clone(),
            icon: None,
        })
    }

    pub fn write_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed creating config directory: {}", parent.display())
                })?;
            }
        }
        fs::write(path, Self::default_template())
            .with_context(|| format!("failed writing config template: {}", path.display()))
    }

    pub fn default_template() -> String {
        let template = r#"# Portal account
username: "2000012345"
password: "your-portal-password"

# Where tracked grades are stored between runs
data_file: "course_data.json"

# Send one summary instead of a notification per course on the
# very first run
quiet_first_run: false

# Keep a copy of the raw score payload for debugging
# raw_dump_file: "current.json"

# Notification channel. type: bark | email | console | multi
notifier:
  type: bark
  token: "your-bark-device-token"
  # icon: "https://example.com/icon.png"

# Email instead:
# notifier:
#   type: email
#   smtp_server: "smtp.example.com"
#   smtp_port: 587
#   email_username: "bot@example.com"
#   email_password: "app-password"
#   from_email: "bot@example.com"
#   to_email: "you@example.com"

# Or fan out to several channels:
# notifier:
#   type: multi
#   channels:
#     - type: bark
#       token: "your-bark-device-token"
#     - type: console
"#;
        template.to_string()
    }

    /// Copy with secrets masked, for `config --show`.
    pub fn redacted(&self) -> Self {
        let mut masked = self.clone();
        masked.password = "********".to_string();
        if let Some(channel) = &mut masked.notifier {
            redact_channel(channel);
        }
        masked
    }
}

fn redact_channel(channel: &mut ChannelConfig) {
    match channel {
        ChannelConfig::Email { email_password, .. } => {
            *email_password = "********".to_string();
        }
        ChannelConfig::Multi { channels } => {
            for nested in channels {
                redact_channel(nested);
            }
        }
        ChannelConfig::Bark { .. } | ChannelConfig::Console => {}
    }
}

fn default_data_file() -> PathBuf {
    PathBuf::from("course_data.json")
}

fn default_smtp_port() -> u16 {
    587
}
