use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{debug, warn};

use crate::model::Course;
use crate::notify::{Notifier, NotifyError};

/// Delivers grade notifications as HTML email over SMTP.
#[derive(Debug)]
pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailNotifier {
    /// Build the transport from config values. STARTTLS on the configured
    /// port; credentials come from the config file alongside the portal
    /// account, not from the environment.
    pub fn from_config(
        smtp_server: &str,
        smtp_port: u16,
        username: &str,
        password: &str,
        from_email: &str,
        to_email: &str,
    ) -> Result<Self, NotifyError> {
        let from: Mailbox = from_email.parse().map_err(|e: lettre::address::AddressError| {
            NotifyError::Config(format!("from_email: {e}"))
        })?;
        let to: Mailbox = to_email.parse().map_err(|e: lettre::address::AddressError| {
            NotifyError::Config(format!("to_email: {e}"))
        })?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(smtp_server)
            .map_err(|e| NotifyError::Config(e.to_string()))?
            .port(smtp_port)
            .credentials(Credentials::new(username.to_string(), password.to_string()))
            .build();
        Ok(Self {
            transport,
            from,
            to,
        })
    }

    async fn deliver(
        &self,
        title: &str,
        body: &str,
        course: Option<&Course>,
    ) -> Result<(), NotifyError> {
        let email = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(title)
            .header(ContentType::TEXT_HTML)
            .body(render_html(body, course))
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;
        self.transport
            .send(email)
            .await
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;
        Ok(())
    }
}

fn render_html(body: &str, course: Option<&Course>) -> String {
    let mut details = String::new();
    if let Some(course) = course {
        details = format!(
            "<h3>Course details</h3>\
             <table border=\"1\" style=\"border-collapse: collapse;\">\
             <tr><td><strong>Course</strong></td><td>{}</td></tr>\
             <tr><td><strong>Grade</strong></td><td>{}</td></tr>\
             <tr><td><strong>GPA</strong></td><td>{}</td></tr>\
             <tr><td><strong>Credit</strong></td><td>{}</td></tr>\
             <tr><td><strong>Term</strong></td><td>{}</td></tr>\
             </table>",
            course.course_name, course.grade, course.gpa, course.credit, course.term
        );
    }
    format!(
        "<html><body>\
         <h2>Grade watch notification</h2>\
         <p>{}</p>\
         {}\
         <hr>\
         <p><small>Sent automatically by gradewatch.</small></p>\
         </body></html>",
        body.replace('\n', "<br>"),
        details
    )
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, title: &str, body: &str, course: Option<&Course>) -> bool {
        match self.deliver(title, body, course).await {
            Ok(()) => {
                debug!(channel = "email", title, "notification delivered");
                true
            }
            Err(err) => {
                warn!(channel = "email", title, error = %err, "notification failed");
                false
            }
        }
    }

    fn channel_name(&self) -> &str {
        "email"
    }
}
