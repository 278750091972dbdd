use async_trait::async_trait;
use tracing::{debug, warn};

use crate::model::Course;
use crate::notify::Notifier;

/// Fans a notification out to every configured channel in order.
///
/// Every channel is attempted even after a failure, and the combined
/// outcome is success when at least one delivered. A flaky channel may
/// therefore cause a duplicate on the next retry path rather than a
/// silently dropped change.
pub struct MultiNotifier {
    channels: Vec<Box<dyn Notifier>>,
}

impl MultiNotifier {
    pub fn new(channels: Vec<Box<dyn Notifier>>) -> Self {
        Self { channels }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[async_trait]
impl Notifier for MultiNotifier {
    async fn send(&self, title: &str, body: &str, course: Option<&Course>) -> bool {
        let mut delivered = 0usize;
        for channel in &self.channels {
            if channel.send(title, body, course).await {
                delivered += 1;
            } else {
                warn!(channel = channel.channel_name(), title, "channel failed, continuing");
            }
        }
        debug!(delivered, total = self.channels.len(), "fan-out finished");
        delivered > 0
    }

    fn channel_name(&self) -> &str {
        "multi"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct MockNotifier {
        name: String,
        send_count: Arc<AtomicUsize>,
        should_fail: bool,
    }

    #[async_trait]
    impl Notifier for MockNotifier {
        async fn send(&self, _title: &str, _body: &str, _course: Option<&Course>) -> bool {
            self.send_count.fetch_add(1, Ordering::SeqCst);
            !self.should_fail
        }

        fn channel_name(&self) -> &str {
            &self.name
        }
    }

    fn mock(name: &str, count: &Arc<AtomicUsize>, should_fail: bool) -> Box<dyn Notifier> {
        Box::new(MockNotifier {
            name: name.to_string(),
            send_count: count.clone(),
            should_fail,
        })
    }

    #[tokio::test]
    async fn every_channel_is_attempted_despite_failures() {
        let count_a = Arc::new(AtomicUsize::new(0));
        let count_b = Arc::new(AtomicUsize::new(0));
        let multi = MultiNotifier::new(vec![
            mock("a", &count_a, true),
            mock("b", &count_b, false),
        ]);

        let delivered = multi.send("title", "body", None).await;
        assert!(delivered, "one success should carry the fan-out");
        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn all_failures_report_failure() {
        let count_a = Arc::new(AtomicUsize::new(0));
        let count_b = Arc::new(AtomicUsize::new(0));
        let multi = MultiNotifier::new(vec![
            mock("a", &count_a, true),
            mock("b", &count_b, true),
        ]);

        let delivered = multi.send("title", "body", None).await;
        assert!(!delivered);
        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn all_successes_report_success() {
        let count = Arc::new(AtomicUsize::new(0));
        let multi = MultiNotifier::new(vec![
            mock("a", &count, false),
            mock("b", &count, false),
        ]);

        assert!(multi.send("title", "body", None).await);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(multi.channel_count(), 2);
    }
}
