//! One subscriber connection per node listening on the notify channel,
//! routing decoded notifications to the scheduler (spec.md §4.6).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, error, warn};

use qube_common::{NewJobNotification, QubeError};
use qube_store::pool;

use crate::scheduler::GroupScheduler;

pub(crate) struct Notifier {
    ready: Arc<AtomicBool>,
}

impl Notifier {
    /// Subscribes before returning, so `isReady` can be read true the
    /// instant this call succeeds (spec.md §4.6: "confirmed before `init`
    /// resolves").
    pub(crate) async fn spawn(redis_url: &str, channel: &str, scheduler: Arc<GroupScheduler>) -> Result<Self, QubeError> {
        let mut pubsub = pool::open_subscriber(redis_url).await?;
        pubsub.subscribe(channel).await?;

        let ready = Arc::new(AtomicBool::new(true));
        let channel = channel.to_string();

        tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            while let Some(message) = stream.next().await {
                let payload: String = match message.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(error = %e, "failed to read notification payload, dropping");
                        continue;
                    }
                };

                match serde_json::from_str::<NewJobNotification>(&payload) {
                    Ok(notification) => {
                        debug!(queue = %notification.queue_name, group = %notification.group_name, "received new-job notification");
                        scheduler.handle_notification(notification).await;
                    }
                    Err(e) => warn!(error = %e, payload = %payload, channel = %channel, "dropping malformed notification"),
                }
            }
            error!(channel = %channel, "notifier subscriber stream ended");
        });

        Ok(Self { ready })
    }

    #[allow(dead_code)]
    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}
