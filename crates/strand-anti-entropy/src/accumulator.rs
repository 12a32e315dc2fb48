//! Batching accumulator for outbound updates
//!
//! Items queued on an [`Accumulator`] are handed to its [`BatchProcessor`] in batches.
//! A batch is released when `max_items` are pending, `max_batch` after the first item
//! of the batch was queued, or after `max_idle` without a new item, whichever comes
//! first. Processing runs on the accumulator's own task, so callers of
//! [`Accumulator::add`] never wait on the processor.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Batch limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccumulatorConfig {
    /// Release a batch once this many items are pending
    pub max_items: usize,
    /// Release a batch this long after its first item
    pub max_batch: Duration,
    /// Release a batch after this long without a new item
    pub max_idle: Duration,
}

/// Consumer of released batches
#[async_trait]
pub trait BatchProcessor<T>: Send + Sync {
    /// Process one batch
    async fn process(&self, items: Vec<T>);
}

enum Command<T> {
    Item(T),
    Flush(oneshot::Sender<()>),
}

/// Queue that releases items to a processor in batches
pub struct Accumulator<T> {
    commands: mpsc::UnboundedSender<Command<T>>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> Accumulator<T> {
    /// Start the accumulator task on `runtime`
    pub fn spawn(
        runtime: &Handle,
        config: AccumulatorConfig,
        processor: Arc<dyn BatchProcessor<T>>,
    ) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let task = runtime.spawn(run(receiver, config, processor));
        Self { commands, task }
    }

    /// Queue an item; returns `false` if the accumulator has stopped
    pub fn add(&self, item: T) -> bool {
        self.commands.send(Command::Item(item)).is_ok()
    }

    /// Release everything queued so far and wait until the processor is done with it
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Stop the task without processing pending items
    pub fn abort(&self) {
        self.task.abort();
    }
}

enum Wake<T> {
    Command(Option<Command<T>>),
    Deadline,
}

async fn run<T>(
    mut receiver: mpsc::UnboundedReceiver<Command<T>>,
    config: AccumulatorConfig,
    processor: Arc<dyn BatchProcessor<T>>,
) {
    let mut pending: Vec<T> = Vec::new();
    let mut batch_deadline: Option<Instant> = None;
    let mut idle_deadline: Option<Instant> = None;

    loop {
        let deadline = match (batch_deadline, idle_deadline) {
            (Some(batch), Some(idle)) => Some(batch.min(idle)),
            (batch, idle) => batch.or(idle),
        };
        let wake = match deadline {
            Some(at) => tokio::select! {
                command = receiver.recv() => Wake::Command(command),
                () = tokio::time::sleep_until(at) => Wake::Deadline,
            },
            None => Wake::Command(receiver.recv().await),
        };

        match wake {
            Wake::Deadline => {
                release(&mut pending, processor.as_ref()).await;
                batch_deadline = None;
                idle_deadline = None;
            }
            Wake::Command(Some(Command::Item(item))) => {
                let now = Instant::now();
                pending.push(item);
                batch_deadline.get_or_insert(now + config.max_batch);
                idle_deadline = Some(now + config.max_idle);
                if pending.len() >= config.max_items {
                    release(&mut pending, processor.as_ref()).await;
                    batch_deadline = None;
                    idle_deadline = None;
                }
            }
            Wake::Command(Some(Command::Flush(ack))) => {
                release(&mut pending, processor.as_ref()).await;
                batch_deadline = None;
                idle_deadline = None;
                let _ = ack.send(());
            }
            Wake::Command(None) => {
                release(&mut pending, processor.as_ref()).await;
                break;
            }
        }
    }
}

async fn release<T>(pending: &mut Vec<T>, processor: &dyn BatchProcessor<T>) {
    if !pending.is_empty() {
        processor.process(std::mem::take(pending)).await;
    }
}
