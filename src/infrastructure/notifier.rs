/// Fire-and-forget user alerts. Callers only invoke it while the host is in
/// the foreground; no core logic depends on delivery.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str, is_stopping: bool);
}

/// Notifier for headless hosts: alerts become log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, message: &str, is_stopping: bool) {
        let title = if is_stopping {
            "Auto-Blocking Stopped"
        } else {
            "Auto-Blocking Started"
        };
        tracing::info!(title, message, "user notification");
    }
}
