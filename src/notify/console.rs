use async_trait::async_trait;

use crate::model::Course;
use crate::notify::Notifier;

/// Echoes notifications to stdout. Used by `--dry-run` and as a channel of
/// last resort when no push credentials are configured.
pub struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn send(&self, title: &str, body: &str, course: Option<&Course>) -> bool {
        println!("{}", "=".repeat(50));
        println!("Title: {title}");
        println!("{body}");
        if let Some(course) = course {
            println!(
                "Course: {} [{}] grade {} gpa {} credit {}",
                course.course_name, course.term, course.grade, course.gpa, course.credit
            );
        }
        println!("{}", "=".repeat(50));
        true
    }

    fn channel_name(&self) -> &str {
        "console"
    }
}
