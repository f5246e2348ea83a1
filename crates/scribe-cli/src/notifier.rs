use chrono::Local;
use chrono::NaiveTime;
use scribe_core::Notice;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Prints notices as they arrive, off the event loop.
pub fn spawn(mut notices: mpsc::UnboundedReceiver<Notice>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            println!("{}", format_notice(&notice, Local::now().time()));
        }
    })
}

pub fn format_notice(notice: &Notice, at: NaiveTime) -> String {
    format!(
        "[{}] {}: {}",
        at.format("%H:%M:%S"),
        notice.level.label(),
        notice.message
    )
}
