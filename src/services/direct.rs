use std::{sync::Arc, time::Duration};

use tracing::info;

use crate::{
    clients::directory::RecipientDirectory,
    models::{
        directory::{DirectNotificationRequest, DirectSendResult},
        error::DispatchError,
        record::NewNotification,
    },
    services::dispatcher::{DispatchOutcome, Dispatcher},
    utils::with_store_timeout,
};

/// Synchronous send to a known recipient, bypassing the trigger queue.
///
/// The notification is still written as a pending record and dispatched
/// through the same state machine, so deduplication and the post-success
/// action apply exactly as they do for triggered records.
pub struct DirectSender {
    directory: Arc<dyn RecipientDirectory>,
    dispatcher: Arc<Dispatcher>,
    store_timeout: Duration,
}

impl DirectSender {
    pub fn new(
        directory: Arc<dyn RecipientDirectory>,
        dispatcher: Arc<Dispatcher>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            dispatcher,
            store_timeout,
        }
    }

    pub async fn send(
        &self,
        request: DirectNotificationRequest,
    ) -> Result<DirectSendResult, DispatchError> {
        for (field, value) in [
            ("recipient_id", &request.recipient_id),
            ("title", &request.title),
            ("body", &request.body),
        ] {
            if value.trim().is_empty() {
                return Err(DispatchError::InvalidArgument(format!("{} is required", field)));
            }
        }

        let profile = with_store_timeout(self.store_timeout, self.directory.find(&request.recipient_id))
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("recipient {}", request.recipient_id)))?;

        if !profile.notifications_enabled {
            info!(recipient_id = %request.recipient_id, "Recipient has notifications disabled");
            return Ok(DirectSendResult::not_delivered(
                "Notifications are disabled for this recipient",
            ));
        }

        let notification = NewNotification {
            recipient_token: profile.push_token,
            title: request.title,
            body: request.body,
            payload: request.payload,
            correlation_key: request.correlation_key.filter(|key| !key.is_empty()),
        };

        let record = with_store_timeout(
            self.store_timeout,
            self.dispatcher.store().create(notification),
        )
        .await?;

        let result = match self.dispatcher.dispatch(&record).await? {
            DispatchOutcome::Sent { delivery_id } => DirectSendResult::delivered(delivery_id),
            DispatchOutcome::Duplicate => DirectSendResult {
                success: true,
                delivery_id: None,
                message: "Notification already delivered for this correlation key".to_string(),
            },
            DispatchOutcome::Failed { reason, .. } => DirectSendResult::not_delivered(reason.to_string()),
            DispatchOutcome::Skipped { status } => {
                DirectSendResult::not_delivered(format!("Notification is already {}", status))
            }
        };

        info!(
            recipient_id = %request.recipient_id,
            record_id = %record.id,
            success = result.success,
            "Direct notification processed"
        );

        Ok(result)
    }
}
