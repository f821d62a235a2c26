use std::sync::Arc;

use async_trait::async_trait;
use rand::prelude::*;
use tokio::sync::watch;

use crate::api::ApiClient;
use crate::config::Config;
use crate::http_behavior::{HttpBehavior, HttpState};
use crate::metrics::MetricsSink;
use crate::registry::{RegistryError, UserRegistry};
use crate::scheduler::*;
use crate::utils::generate_name;
use crate::ws_behavior::WsSession;

/// Everything shared by the virtual users of one load test
#[derive(Clone)]
pub struct LoadTestState {
    pub config: Arc<Config>,
    pub api: ApiClient,
    pub registry: Arc<UserRegistry>,
    pub sink: Arc<dyn MetricsSink>,
}

/// One simulated client. Runs friendship tasks when it registered over
/// HTTP and echo tasks when its WebSocket session opened.
pub struct VirtualUser {
    http: Option<HttpBehavior>,
    ws: Option<WsSession>,
}

impl VirtualUser {
    /// Register and connect as configured. Returns None when the user has
    /// nothing left to do, e.g. because registration failed.
    pub async fn setup(
        state: &LoadTestState,
        local_name: String,
        rng: &mut SmallRng,
    ) -> Result<Option<(Self, TaskSet)>, RegistryError> {
        let config = &state.config;
        let mut weighted_tasks = Vec::with_capacity(2);

        let http = if config.tasks.weight_friendship > 0 {
            let mut http = HttpBehavior::new(
                local_name.clone(),
                state.api.clone(),
                state.registry.clone(),
                state.sink.clone(),
                SmallRng::from_rng(&mut *rng).unwrap_or_else(|_| SmallRng::from_entropy()),
            );

            http.register().await?;

            if http.state() == HttpState::Stopped {
                // Never participates, not even over WebSocket
                return Ok(None);
            }

            weighted_tasks.push((Task::Friendship, config.tasks.weight_friendship));

            Some(http)
        } else {
            None
        };

        let ws = if config.tasks.weight_echo > 0 {
            let user_id = http
                .as_ref()
                .and_then(|http| http.remote_user())
                .map(|user| user.id.to_string())
                .unwrap_or_else(|| local_name.clone());

            match WsSession::open(
                &config.ws_server_url,
                user_id,
                config.ws.message.clone(),
                state.sink.clone(),
            )
            .await
            {
                Ok(session) => {
                    weighted_tasks.push((Task::Echo, config.tasks.weight_echo));

                    Some(session)
                }
                Err(err) => {
                    ::log::warn!("{}: {:#}", local_name, err);

                    None
                }
            }
        } else {
            None
        };

        let user = Self { http, ws };

        Ok(TaskSet::new(&weighted_tasks).map(|tasks| (user, tasks)))
    }

    pub fn http(&self) -> Option<&HttpBehavior> {
        self.http.as_ref()
    }

    pub fn ws(&self) -> Option<&WsSession> {
        self.ws.as_ref()
    }
}

#[async_trait]
impl Behavior for VirtualUser {
    async fn run_task(&mut self, task: Task) -> Result<TaskOutcome, RegistryError> {
        match task {
            Task::Friendship => match self.http.as_mut() {
                Some(http) => http.attempt_friendship().await,
                None => Ok(TaskOutcome::Continue),
            },
            Task::Echo => {
                let outcome = match self.ws.as_mut() {
                    Some(ws) => ws.send_echo().await,
                    None => TaskOutcome::Stop,
                };

                // A lost connection only ends echo traffic
                if outcome == TaskOutcome::Stop && self.http.is_some() {
                    Ok(TaskOutcome::Unschedule)
                } else {
                    Ok(outcome)
                }
            }
        }
    }

    async fn stop(&mut self) {
        if let Some(ws) = self.ws.as_mut() {
            ws.close().await;
        }
    }
}

/// Whole lifetime of one virtual user: setup, then tasks until stopped
pub async fn run_virtual_user(
    state: LoadTestState,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut rng = SmallRng::from_entropy();
    let local_name = generate_name(&mut rng);

    let (mut user, tasks) = match VirtualUser::setup(&state, local_name.clone(), &mut rng).await? {
        Some(setup) => setup,
        None => {
            ::log::info!("{} does not participate", local_name);

            return Ok(());
        }
    };

    let think_time = ThinkTime::from_config(&state.config.think_time);

    let exit = run_task_loop(&mut user, &tasks, think_time, &mut rng, &mut shutdown).await?;

    ::log::debug!("{} left task loop: {:?}", local_name, exit);

    Ok(())
}
