//! Utility functions for the voxlink transport.

use std::time::Duration;

pub fn spawn_task<F>(future: F) -> tokio::task::JoinHandle<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(future)
}

pub async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// Prefix of `text` safe to put in a log line.
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}
