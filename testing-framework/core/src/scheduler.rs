use std::{
    future::Future,
    mem,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{
    task::{AbortHandle, JoinSet},
    time::{MissedTickBehavior, interval, sleep},
};
use tracing::debug;

use crate::{DynError, nodes::ManagedService};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler is already running")]
    AlreadyRunning,
    #[error("scheduler was already stopped")]
    AlreadyStopped,
    #[error("scheduler has not been set up")]
    NotRunning,
}

enum State {
    Idle,
    Running(JoinSet<()>),
    Stopped,
}

/// Deferred and periodic callbacks tied to one stack's lifetime.
///
/// Set up once before the client starts and stopped during shutdown. Stopping
/// aborts every pending callback; the scheduler cannot be restarted.
pub struct Scheduler {
    state: Mutex<State>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(State::Idle),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn setup(&self) -> Result<(), SchedulerError> {
        let mut state = self.lock();
        match *state {
            State::Idle => {
                *state = State::Running(JoinSet::new());
                Ok(())
            }
            State::Running(_) => Err(SchedulerError::AlreadyRunning),
            State::Stopped => Err(SchedulerError::AlreadyStopped),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(*self.lock(), State::Running(_))
    }

    /// Callbacks still registered, finished ones excluded.
    #[must_use]
    pub fn pending(&self) -> usize {
        match &mut *self.lock() {
            State::Running(tasks) => reap(tasks),
            State::Idle | State::Stopped => 0,
        }
    }

    fn spawn<F>(&self, task: F) -> Result<AbortHandle, SchedulerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match &mut *self.lock() {
            State::Running(tasks) => {
                reap(tasks);
                Ok(tasks.spawn(task))
            }
            State::Idle => Err(SchedulerError::NotRunning),
            State::Stopped => Err(SchedulerError::AlreadyStopped),
        }
    }

    /// Runs `callback` once after `delay`. The handle cancels it early.
    pub fn call_later<F>(&self, delay: Duration, callback: F) -> Result<AbortHandle, SchedulerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn(async move {
            sleep(delay).await;
            callback.await;
        })
    }

    /// Runs `callback` every `period`, the first time after one full period,
    /// until the returned handle is aborted or the scheduler stops.
    pub fn call_every<F, Fut>(
        &self,
        period: Duration,
        mut callback: F,
    ) -> Result<AbortHandle, SchedulerError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn(async move {
            let mut ticks = interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticks.tick().await;
            loop {
                ticks.tick().await;
                callback().await;
            }
        })
    }

    /// Aborts every pending callback and returns how many were cancelled.
    pub fn stop(&self) -> Result<usize, SchedulerError> {
        let mut state = self.lock();
        match mem::replace(&mut *state, State::Stopped) {
            State::Running(mut tasks) => {
                let pending = reap(&mut tasks);
                tasks.abort_all();
                debug!(pending, "scheduler stopped");
                Ok(pending)
            }
            State::Idle => {
                *state = State::Idle;
                Err(SchedulerError::NotRunning)
            }
            State::Stopped => Err(SchedulerError::AlreadyStopped),
        }
    }
}

#[async_trait]
impl ManagedService for Scheduler {
    fn name(&self) -> &'static str {
        "scheduler"
    }

    /// A scheduler that was never set up, or is already stopped, has nothing
    /// to cancel.
    async fn stop(&mut self, _cleanup: bool) -> Result<(), DynError> {
        if let Err(error) = Self::stop(self) {
            debug!("nothing to stop: {error}");
        }
        Ok(())
    }
}

/// Drops finished tasks from `tasks` and returns how many remain.
fn reap(tasks: &mut JoinSet<()>) -> usize {
    while tasks.try_join_next().is_some() {}
    tasks.len()
}
