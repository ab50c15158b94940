//! Worker pool: dequeues tasks, runs them through the handler registry
//! wrapped in lifecycle tracking, and reports outcomes back to the broker.

pub mod handler;
pub mod lifecycle;

pub use handler::{Handler, HandlerFunc, ServeMux};
pub use lifecycle::Lifecycle;

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use opentelemetry::KeyValue;
use rand::Rng;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{Instrument, error, info, warn};

use crate::broker::{Broker, Delivery, Task, TaskContext};
use crate::client::DEFAULT_QUEUE;
use crate::error::{Error, HandlerResult, Result};
use crate::store::TaskStore;
use crate::telemetry::metrics;
use crate::telemetry::task::{record_outcome, start_task_span};

/// Worker slots when the configured concurrency is zero.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Maximum tasks running at once. Zero means [`DEFAULT_CONCURRENCY`].
    pub concurrency: usize,
    /// Queue name to relative weight. Empty means `{"default": 1}`.
    pub queues: HashMap<String, u32>,
    /// Sleep between polls when every queue is empty.
    pub poll_interval: Duration,
    /// How long shutdown waits for in-flight tasks.
    pub shutdown_timeout: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            queues: HashMap::new(),
            poll_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(8),
        }
    }
}

/// Runs handlers for tasks pulled from a broker and records their lifecycle.
#[derive(Clone)]
pub struct Processor {
    broker: Arc<dyn Broker>,
    store: Option<Arc<dyn TaskStore>>,
    concurrency: usize,
    queues: Vec<(String, u32)>,
    poll_interval: Duration,
    shutdown_timeout: Duration,
    shutdown: Arc<Notify>,
}

impl Processor {
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Option<Arc<dyn TaskStore>>,
        config: ProcessorConfig,
    ) -> Self {
        let concurrency = if config.concurrency == 0 {
            DEFAULT_CONCURRENCY
        } else {
            config.concurrency
        };

        let mut queues: Vec<(String, u32)> = config
            .queues
            .into_iter()
            .filter(|(_, weight)| *weight > 0)
            .collect();
        if queues.is_empty() {
            queues.push((DEFAULT_QUEUE.to_string(), 1));
        }
        queues.sort();

        Self {
            broker,
            store,
            concurrency,
            queues,
            poll_interval: config.poll_interval,
            shutdown_timeout: config.shutdown_timeout,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Effective queue weights, sorted by name.
    pub fn queues(&self) -> &[(String, u32)] {
        &self.queues
    }

    /// Signal the processor to stop dequeuing and drain.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run the worker loop until [`shutdown`](Self::shutdown) is called.
    ///
    /// Every task goes through `mux` wrapped in [`Lifecycle`]; a handler
    /// panic is reported as a handler error. On return, in-flight tasks
    /// have finished or the shutdown timeout elapsed.
    pub async fn start(&self, mux: ServeMux) -> Result<()> {
        let guarded = CatchPanic {
            inner: Arc::new(mux),
        };
        let handler: Arc<dyn Handler> = Arc::new(Lifecycle::new(guarded, self.store.clone()));
        let slots = Arc::new(Semaphore::new(self.concurrency));

        info!(
            concurrency = self.concurrency,
            queues = ?self.queues,
            "processor started"
        );

        loop {
            let permit = tokio::select! {
                _ = self.shutdown.notified() => break,
                permit = Arc::clone(&slots).acquire_owned() => permit
                    .map_err(|e| Error::Other(format!("worker slots closed: {e}")))?,
            };

            let order = weighted_order(&self.queues, &mut rand::thread_rng());
            let next = tokio::select! {
                _ = self.shutdown.notified() => break,
                next = self.broker.dequeue(&order) => next,
            };

            match next {
                Ok(Some(delivery)) => {
                    let broker = Arc::clone(&self.broker);
                    let handler = Arc::clone(&handler);
                    tokio::spawn(execute(broker, handler, delivery, permit));
                }
                Ok(None) => {
                    drop(permit);
                    if self.idle().await {
                        break;
                    }
                }
                Err(e) => {
                    drop(permit);
                    warn!("dequeue failed: {e}, retrying after poll interval");
                    if self.idle().await {
                        break;
                    }
                }
            }
        }

        info!("processor shutting down, waiting for in-flight tasks");
        let all_slots = u32::try_from(self.concurrency).unwrap_or(u32::MAX);
        match tokio::time::timeout(self.shutdown_timeout, slots.acquire_many(all_slots)).await {
            Ok(_) => info!("processor stopped"),
            Err(_) => warn!(
                timeout = ?self.shutdown_timeout,
                "shutdown timeout elapsed with tasks still running"
            ),
        }
        Ok(())
    }

    /// Sleep one poll interval. Returns `true` if shutdown was requested.
    async fn idle(&self) -> bool {
        tokio::select! {
            _ = self.shutdown.notified() => true,
            _ = tokio::time::sleep(self.poll_interval) => false,
        }
    }
}

/// Run one delivery and report its outcome to the broker.
async fn execute(
    broker: Arc<dyn Broker>,
    handler: Arc<dyn Handler>,
    delivery: Delivery,
    _permit: OwnedSemaphorePermit,
) {
    let Delivery {
        task,
        context,
        receipt,
    } = delivery;
    let span = start_task_span(
        task.task_type(),
        context.task_id().unwrap_or_default(),
        context.queue(),
    );
    let task_type = task.task_type().to_string();

    async {
        let started = Instant::now();
        let result = handler.process_task(&context, task).await;
        let outcome = if result.is_ok() { "completed" } else { "failed" };
        metrics::task_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[
                KeyValue::new("task_type", task_type),
                KeyValue::new("outcome", outcome),
            ],
        );
        record_outcome(&span, outcome);

        let reported = match result {
            Ok(()) => broker.ack(&receipt).await,
            Err(e) => {
                warn!(error = %e, retry_count = context.retry_count(), "task handler failed");
                broker.fail(&receipt, &e.to_string()).await
            }
        };
        if let Err(e) = reported {
            error!(queue = %receipt.queue, msg_id = receipt.msg_id, "broker outcome report failed: {e}");
        }
    }
    .instrument(span.clone())
    .await
}

/// Runs the inner handler on its own tokio task so that a panic comes back
/// as a handler error instead of unwinding through the worker.
struct CatchPanic {
    inner: Arc<dyn Handler>,
}

#[async_trait]
impl Handler for CatchPanic {
    async fn process_task(&self, ctx: &TaskContext, task: Task) -> HandlerResult {
        let inner = Arc::clone(&self.inner);
        let ctx = ctx.clone();
        let run = async move { inner.process_task(&ctx, task).await }.in_current_span();

        match tokio::spawn(run).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(panic_message(e.into_panic()).into()),
            Err(e) => Err(format!("handler task aborted: {e}").into()),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string());
    format!("panic: {detail}")
}

/// Queue names in weighted random order: each position is drawn from the
/// remaining queues with probability proportional to weight.
fn weighted_order(queues: &[(String, u32)], rng: &mut impl Rng) -> Vec<String> {
    let mut remaining: Vec<&(String, u32)> = queues.iter().collect();
    let mut order = Vec::with_capacity(queues.len());
    while !remaining.is_empty() {
        let total: u64 = remaining.iter().map(|(_, w)| u64::from(*w)).sum();
        let mut pick = rng.gen_range(0..total);
        let idx = remaining
            .iter()
            .position(|(_, w)| {
                let w = u64::from(*w);
                if pick < w {
                    true
                } else {
                    pick -= w;
                    false
                }
            })
            .unwrap_or(remaining.len() - 1);
        order.push(remaining.remove(idx).0.clone());
    }
    order
}
