//! `/heavy`: long-running job behind the admission queue
//!
//! Streams progress into a single message with a cancel button and stops at
//! the next step boundary once cancelled.

use crate::dispatch::{
    AdmissionQueue, Context, Continuation, Handler, InlineKeyboard, Payload, Reply, Step,
    QUEUE_FULL_MESSAGE,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Command prefix
pub const PREFIX: &str = "/heavy";

const DEFAULT_STEPS: u32 = 5;
const DEFAULT_STEP_DELAY: Duration = Duration::from_secs(2);

/// The job itself: `steps` units of work, `step_delay` each
#[derive(Debug, Clone)]
pub struct HeavyJob {
    queue: Arc<AdmissionQueue>,
    steps: u32,
    step_delay: Duration,
}

impl HeavyJob {
    /// Job with the default pacing
    #[must_use]
    pub fn new(queue: Arc<AdmissionQueue>) -> Self {
        Self::with_pacing(queue, DEFAULT_STEPS, DEFAULT_STEP_DELAY)
    }

    /// Job with custom pacing
    #[must_use]
    pub const fn with_pacing(queue: Arc<AdmissionQueue>, steps: u32, step_delay: Duration) -> Self {
        Self {
            queue,
            steps,
            step_delay,
        }
    }
}

/// `/heavy` handler sharing `queue` with every other heavy invocation
#[must_use]
pub fn handler(queue: Arc<AdmissionQueue>) -> Handler {
    Handler::new(
        PREFIX,
        "Run a slow job",
        Continuation::new(HeavyJob::new(queue)),
    )
}

fn no_keyboard() -> InlineKeyboard {
    vec![Vec::new()]
}

#[async_trait]
impl Step for HeavyJob {
    async fn run(&self, ctx: Context, payload: Payload) {
        let Some(ticket) = self.queue.try_enter(&ctx).await else {
            if !ctx.is_cancelled() {
                payload.send(Reply::retry(QUEUE_FULL_MESSAGE, PREFIX)).await;
            }
            return;
        };
        info!(user_id = payload.user_id, "Heavy job admitted");

        let cancel = vec![vec![payload.cancel_button()]];
        for step in 0..self.steps {
            let percent = step * 100 / self.steps.max(1);
            let progress = Reply::text(format!("⚙️ Working… {percent}%")).inline(cancel.clone());
            if !payload.send(progress).await {
                debug!("Renderer gone, abandoning job");
                return;
            }

            tokio::select! {
                biased;
                () = ctx.cancelled() => {
                    info!(user_id = payload.user_id, step, "Heavy job cancelled");
                    drop(ticket);
                    payload.send(Reply::text("🛑 Cancelled.").inline(no_keyboard())).await;
                    return;
                }
                () = tokio::time::sleep(self.step_delay) => {}
            }
        }

        ticket.leave();
        payload
            .send(Reply::text("✅ Done.").inline(no_keyboard()))
            .await;
    }
}
