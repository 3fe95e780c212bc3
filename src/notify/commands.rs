use serde::Serialize;

use crate::{
    notify::PendingCounts,
    queue::{FlushReport, QueueName},
    AppState,
};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueFlush {
    pub queue: QueueName,
    pub report: FlushReport,
}

/// Manual flush of every queue. Refused while offline so items keep
/// their attempt budget.
pub async fn flush_queues(state: &AppState) -> Result<Vec<QueueFlush>, String> {
    if !state.lifecycle.is_online() {
        return Err("Offline; queues are kept for later".to_string());
    }

    Ok(state
        .dispatcher
        .flush_all()
        .await
        .into_iter()
        .map(|(queue, report)| QueueFlush { queue, report })
        .collect())
}

pub async fn pending_queues(state: &AppState) -> Result<PendingCounts, String> {
    Ok(state.dispatcher.pending().await)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::{
        catalog::{
            commands::{contact, load_catalog},
            ContactChannel,
        },
        testing::TestApp,
    };

    #[tokio::test]
    async fn flush_is_refused_offline_and_drains_online() {
        let app = TestApp::new(true);
        load_catalog(&app.state).await.unwrap();
        app.state.lifecycle.set_online(false).await;

        contact(&app.state, "p-2".into(), ContactChannel::WhatsApp)
            .await
            .unwrap();
        assert_eq!(pending_queues(&app.state).await.unwrap().consults, 1);
        assert!(flush_queues(&app.state).await.is_err());

        app.state.lifecycle.set_online(true).await;
        let flushed = flush_queues(&app.state).await.unwrap();
        let consults = flushed
            .iter()
            .find(|flush| flush.queue == QueueName::Consults)
            .unwrap();
        assert_eq!(consults.report.delivered, 1);
        assert_eq!(app.email.calls.load(Ordering::SeqCst), 1);
        assert_eq!(pending_queues(&app.state).await.unwrap(), PendingCounts::default());

        app.state.lifecycle.shutdown().await;
    }
}
