// Notify Executor
// Fans a message out to notification channels; delivery never fails the step

use crate::collaborators::{Notification, Notifier};
use crate::pipeline::models::{StepDefinition, StepRun};
use crate::pipeline::params::{decode, NotifyParams};
use crate::runners::{StepContext, StepError, StepExecutor};

use std::sync::Arc;

pub struct NotifyExecutor {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl NotifyExecutor {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    fn notifier(&self, channel: &str) -> Option<&Arc<dyn Notifier>> {
        self.notifiers.iter().find(|n| n.channel() == channel)
    }
}

#[async_trait::async_trait]
impl StepExecutor for NotifyExecutor {
    async fn execute(
        &self,
        step: &StepDefinition,
        step_run: &mut StepRun,
        ctx: &StepContext,
    ) -> Result<(), StepError> {
        let params: NotifyParams = match decode(&step.params) {
            Ok(params) => params,
            Err(e) => {
                step_run.log_error(&format!("invalid notify parameters: {}", e));
                return Ok(());
            }
        };

        let notification = Notification {
            run_id: ctx.run_id,
            pipeline_id: ctx.pipeline_id.clone(),
            environment: ctx.environment.clone(),
            message: params.message.unwrap_or_else(|| {
                format!(
                    "Pipeline {} reached step '{}' in stage '{}'",
                    ctx.pipeline_id, step.name, ctx.stage_name
                )
            }),
        };

        for channel in &params.channels {
            let Some(notifier) = self.notifier(channel) else {
                step_run.log_error(&format!("no notifier registered for channel '{}'", channel));
                tracing::warn!(run_id = %ctx.run_id, channel = %channel, "Unknown notification channel");
                continue;
            };

            match notifier.send(&notification).await {
                Ok(()) => step_run.log(format!("Notified {}", channel)),
                Err(e) => {
                    step_run.log_error(&format!("notification via {} failed: {}", channel, e));
                    tracing::warn!(run_id = %ctx.run_id, channel = %channel, error = %e, "Notification failed");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollaboratorError;
    use crate::runners::tests::{context, step};
    use std::sync::Mutex;

    struct FakeNotifier {
        channel: String,
        fail: bool,
        sent: Mutex<Vec<String>>,
    }

    impl FakeNotifier {
        fn new(channel: &str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                channel: channel.to_string(),
                fail,
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl Notifier for FakeNotifier {
        fn channel(&self) -> &str {
            &self.channel
        }

        async fn send(&self, notification: &Notification) -> Result<(), CollaboratorError> {
            if self.fail {
                return Err(CollaboratorError::Notification("smtp down".to_string()));
            }
            self.sent.lock().unwrap().push(notification.message.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_delivery_failures_do_not_fail_step() {
        let slack = FakeNotifier::new("slack", false);
        let email = FakeNotifier::new("email", true);
        let notifiers: Vec<Arc<dyn Notifier>> = vec![slack.clone(), email];
        let executor = NotifyExecutor::new(notifiers);
        let step = step(
            "notify",
            serde_json::json!({ "channels": ["slack", "email", "pager"], "message": "shipped" }),
        );
        let mut run = StepRun::pending(&step);

        executor.execute(&step, &mut run, &context()).await.unwrap();

        assert_eq!(*slack.sent.lock().unwrap(), vec!["shipped"]);
        assert!(run.logs.contains(&"Notified slack".to_string()));
        assert!(run.logs.iter().any(|l| l.contains("smtp down")));
        assert!(run.logs.iter().any(|l| l.contains("'pager'")));
    }
}
