//! Durable record of one execution's progress.
//!
//! The recorder owns the `WorkflowExecution` while it runs. Every observable
//! change goes through `record`: bump `last_seq`, persist the record, append
//! the event to the log, then publish it on the bus. Persisting happens
//! before publishing, so a subscriber that sees seq N can always read a
//! record at least that new.

use std::sync::Arc;

use capflow_types::error::RepositoryError;
use capflow_types::event::{ExecutionEvent, ExecutionEventKind};
use capflow_types::execution::WorkflowExecution;
use chrono::Utc;

use crate::event::bus::EventBus;
use crate::repository::execution::ExecutionRepository;

pub struct ExecutionRecorder<R: ExecutionRepository> {
    repo: Arc<R>,
    events: EventBus,
    execution: WorkflowExecution,
}

impl<R: ExecutionRepository> ExecutionRecorder<R> {
    pub fn new(repo: Arc<R>, events: EventBus, execution: WorkflowExecution) -> Self {
        Self {
            repo,
            events,
            execution,
        }
    }

    pub fn execution(&self) -> &WorkflowExecution {
        &self.execution
    }

    /// Mutable access for the change that the next `record` describes.
    pub fn execution_mut(&mut self) -> &mut WorkflowExecution {
        &mut self.execution
    }

    /// Publish one observable change.
    ///
    /// Storage failures are logged; the in-memory record stays authoritative
    /// for the rest of the run.
    pub async fn record(&mut self, kind: ExecutionEventKind) {
        let event = self.next_event(kind);

        if let Err(e) = self.repo.save(&self.execution).await {
            tracing::error!(
                execution_id = %self.execution.id,
                seq = event.seq,
                error = %e,
                "failed to persist execution"
            );
        }
        if let Err(e) = self.repo.append_event(&event).await {
            tracing::error!(
                execution_id = %self.execution.id,
                seq = event.seq,
                error = %e,
                "failed to append execution event"
            );
        }
        self.events.publish(event);
    }

    /// Like `record`, but a storage failure is returned and nothing is
    /// published.
    pub async fn try_record(&mut self, kind: ExecutionEventKind) -> Result<(), RepositoryError> {
        let event = self.next_event(kind);
        self.repo.save(&self.execution).await?;
        self.repo.append_event(&event).await?;
        self.events.publish(event);
        Ok(())
    }

    fn next_event(&mut self, kind: ExecutionEventKind) -> ExecutionEvent {
        self.execution.last_seq += 1;
        ExecutionEvent {
            execution_id: self.execution.id,
            seq: self.execution.last_seq,
            at: Utc::now(),
            kind,
        }
    }

    pub fn into_execution(self) -> WorkflowExecution {
        self.execution
    }
}
