use std::time::Duration;

use async_trait::async_trait;
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use tokio::sync::watch;

use crate::config::{TaskConfig, ThinkTimeConfig};
use crate::registry::RegistryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Friendship,
    Echo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Continue,
    /// The task just run is taken off this user's schedule
    Unschedule,
    /// The virtual user must not run any further tasks
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Stopped,
    Shutdown,
}

/// What a virtual user does on each tick
#[async_trait]
pub trait Behavior: Send {
    /// Registry errors mean the engine itself is broken and are passed on
    async fn run_task(&mut self, task: Task) -> Result<TaskOutcome, RegistryError>;

    /// Release connections. Called once when the task loop ends.
    async fn stop(&mut self);
}

/// Weighted task table consulted on every tick
#[derive(Debug, Clone)]
pub struct TaskSet {
    weighted_tasks: Vec<(Task, usize)>,
    distribution: WeightedIndex<usize>,
}

impl TaskSet {
    /// Returns None unless at least one weight is larger than zero
    pub fn new(weighted_tasks: &[(Task, usize)]) -> Option<Self> {
        let distribution = WeightedIndex::new(weighted_tasks.iter().map(|(_, weight)| *weight)).ok()?;

        Some(Self {
            weighted_tasks: weighted_tasks.to_vec(),
            distribution,
        })
    }

    /// Same table with `task` removed. None if nothing else is left.
    pub fn without(&self, task: Task) -> Option<Self> {
        let remaining: Vec<_> = self
            .weighted_tasks
            .iter()
            .filter(|(t, _)| *t != task)
            .copied()
            .collect();

        Self::new(&remaining)
    }

    pub fn contains(&self, task: Task) -> bool {
        self.weighted_tasks
            .iter()
            .any(|(t, weight)| *t == task && *weight > 0)
    }

    pub fn from_config(config: &TaskConfig) -> Option<Self> {
        Self::new(&[
            (Task::Friendship, config.weight_friendship),
            (Task::Echo, config.weight_echo),
        ])
    }

    pub fn pick(&self, rng: &mut impl Rng) -> Task {
        self.weighted_tasks[self.distribution.sample(rng)].0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThinkTime {
    min_ms: u64,
    max_ms: u64,
}

impl ThinkTime {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min_ms: min_ms.min(max_ms),
            max_ms,
        }
    }

    pub fn from_config(config: &ThinkTimeConfig) -> Self {
        Self::new(config.min_ms, config.max_ms)
    }

    pub fn sample(&self, rng: &mut impl Rng) -> Duration {
        Duration::from_millis(rng.gen_range(self.min_ms..=self.max_ms))
    }
}

/// Run tasks until one of them asks to stop or shutdown is signalled, then
/// stop the behavior. A task answering `Unschedule` is not picked again, and
/// the loop stops once no task is left.
///
/// Only the think-time pause races the shutdown signal. A task that has
/// started runs to completion.
pub async fn run_task_loop<B: Behavior>(
    behavior: &mut B,
    tasks: &TaskSet,
    think_time: ThinkTime,
    rng: &mut SmallRng,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<LoopExit, RegistryError> {
    let result = run_ticks(behavior, tasks, think_time, rng, shutdown).await;

    behavior.stop().await;

    result
}

async fn run_ticks<B: Behavior>(
    behavior: &mut B,
    tasks: &TaskSet,
    think_time: ThinkTime,
    rng: &mut SmallRng,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<LoopExit, RegistryError> {
    let mut tasks = tasks.clone();

    loop {
        let shutting_down = *shutdown.borrow();

        if shutting_down {
            return Ok(LoopExit::Shutdown);
        }

        tokio::select! {
            _ = tokio::time::sleep(think_time.sample(rng)) => (),
            // Also fires when the sender is dropped
            _ = shutdown.changed() => return Ok(LoopExit::Shutdown),
        }

        let task = tasks.pick(rng);

        match behavior.run_task(task).await? {
            TaskOutcome::Continue => (),
            TaskOutcome::Unschedule => match tasks.without(task) {
                Some(remaining) => {
                    ::log::debug!("{:?} task unscheduled", task);

                    tasks = remaining;
                }
                None => return Ok(LoopExit::Stopped),
            },
            TaskOutcome::Stop => return Ok(LoopExit::Stopped),
        }
    }
}
