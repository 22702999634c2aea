//! Connection acceptor.
//!
//! Polls the listener on a slow cadence, wraps each accepted link in a
//! pooled [`ConnectionRecord`](super::ConnectionRecord) and hands it to the
//! dispatcher through the arrival queue. A record is reserved *before*
//! accepting, so an exhausted pool leaves pending peers in the listen
//! backlog instead of accepting and immediately dropping them.

use core::time::Duration;
use std::sync::Arc;

use log::{info, warn};

use crate::config::{ACCEPT_TASK_NAME, ACCEPT_TASK_PRIORITY, ACCEPT_TASK_STACK_KB, ProgrammerConfig};
use crate::drivers::task_pin::{Core, TaskSpec, spawn_on_core};

use super::connection::{ArrivalQueue, ConnectionPool, PooledConnection};
use super::transport::Listener;

/// Result of one [`Acceptor::poll_once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// A connection was handed to the dispatcher.
    Accepted,
    /// Nothing pending.
    Idle,
    /// No free connection record.
    Exhausted,
    /// Accepted, but the arrival queue was full; the link was closed.
    Dropped,
    /// The listener or the new link reported an error.
    Failed,
}

pub struct Acceptor<Ls: Listener> {
    listener: Ls,
    records: Arc<ConnectionPool<Ls::Link>>,
    arrivals: Arc<ArrivalQueue<Ls::Link>>,
    spare: Option<PooledConnection<Ls::Link>>,
    poll: Duration,
    backoff: Duration,
}

impl<Ls: Listener> Acceptor<Ls> {
    pub fn new(
        listener: Ls,
        records: Arc<ConnectionPool<Ls::Link>>,
        arrivals: Arc<ArrivalQueue<Ls::Link>>,
        config: &ProgrammerConfig,
    ) -> Self {
        Self {
            listener,
            records,
            arrivals,
            spare: None,
            poll: config.accept_poll(),
            backoff: config.accept_backoff(),
        }
    }

    pub fn poll_once(&mut self) -> AcceptOutcome {
        if self.spare.is_none() {
            match self.records.acquire() {
                Ok(record) => self.spare = Some(record),
                Err(_) => return AcceptOutcome::Exhausted,
            }
        }

        let link = match self.listener.try_accept() {
            Ok(Some(link)) => link,
            Ok(None) => return AcceptOutcome::Idle,
            Err(e) => {
                warn!("ACCEPT: listener error: {}", e);
                return AcceptOutcome::Failed;
            }
        };

        let Some(mut record) = self.spare.take() else {
            return AcceptOutcome::Exhausted;
        };
        record.open(link);
        if let Err(e) = record.activate() {
            warn!("ACCEPT: could not configure link: {}", e);
            record.close();
            return AcceptOutcome::Failed;
        }

        match self.arrivals.offer(record) {
            Ok(()) => {
                info!("ACCEPT: new connection");
                AcceptOutcome::Accepted
            }
            Err(mut record) => {
                warn!("ACCEPT: dispatcher backlog full, closing connection");
                record.close();
                AcceptOutcome::Dropped
            }
        }
    }

    /// Delay before the next poll after `outcome`.
    fn pause_after(&self, outcome: AcceptOutcome) -> Duration {
        match outcome {
            AcceptOutcome::Accepted => Duration::ZERO,
            AcceptOutcome::Idle => self.poll,
            AcceptOutcome::Exhausted | AcceptOutcome::Dropped | AcceptOutcome::Failed => {
                self.backoff
            }
        }
    }

    async fn accept_loop(mut self) {
        loop {
            let outcome = self.poll_once();
            let wait = self.pause_after(outcome);
            if !wait.is_zero() {
                async_io_mini::Timer::after(wait).await;
            }
        }
    }

    /// Acceptor thread body: a local executor driving the accept loop.
    pub fn run(self) {
        let executor: edge_executor::LocalExecutor<'_, 2> = edge_executor::LocalExecutor::new();
        executor.spawn(self.accept_loop()).detach();
        info!("ACCEPT: acceptor started");
        futures_lite::future::block_on(executor.run(core::future::pending::<()>()));
    }
}

impl<Ls> Acceptor<Ls>
where
    Ls: Listener + Send + 'static,
    Ls::Link: 'static,
{
    pub fn spawn(self) -> std::io::Result<std::thread::JoinHandle<()>> {
        let spec = TaskSpec {
            core: Core::Pro,
            priority: ACCEPT_TASK_PRIORITY,
            stack_kb: ACCEPT_TASK_STACK_KB,
            name: ACCEPT_TASK_NAME,
        };
        spawn_on_core(spec, move || self.run())
    }
}
