use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use nearby_protocol::{
    path_possible_friends, FriendRequest, RegisterRequest, User, PATH_FRIENDSHIP, PATH_REGISTER,
};
use rand::prelude::*;

use crate::api::{ApiClient, ApiResponse, StatusCode};
use crate::metrics::*;
use crate::registry::{RegistryError, UserRegistry};
use crate::scheduler::TaskOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpState {
    Unregistered,
    Registered,
    Discovering,
    Requesting,
    Stopped,
}

enum Discovery {
    Candidates(Vec<User>),
    /// Conflict from the backend: no more friendships to be made
    Exhausted,
    Skip,
}

/// Registration and friend request flows of one virtual user
pub struct HttpBehavior {
    local_name: String,
    remote_user: Option<User>,
    state: HttpState,
    api: ApiClient,
    registry: Arc<UserRegistry>,
    sink: Arc<dyn MetricsSink>,
    rng: SmallRng,
}

impl HttpBehavior {
    pub fn new(
        local_name: String,
        api: ApiClient,
        registry: Arc<UserRegistry>,
        sink: Arc<dyn MetricsSink>,
        rng: SmallRng,
    ) -> Self {
        Self {
            local_name,
            remote_user: None,
            state: HttpState::Unregistered,
            api,
            registry,
            sink,
            rng,
        }
    }

    pub fn state(&self) -> HttpState {
        self.state
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn remote_user(&self) -> Option<&User> {
        self.remote_user.as_ref()
    }

    /// Register with the backend and join the registry. Only the first call
    /// does anything. Failure is not retried: the user moves to `Stopped`.
    pub async fn register(&mut self) -> Result<(), RegistryError> {
        if self.state != HttpState::Unregistered {
            return Ok(());
        }

        let request = RegisterRequest {
            name: self.local_name.clone(),
        };

        let response = self
            .timed(
                LABEL_REGISTER,
                StatusCode::CREATED,
                self.api.post_json(PATH_REGISTER, &request),
            )
            .await;

        let user = match response {
            Some(response) if response.status == StatusCode::CREATED => {
                match response.json::<User>() {
                    Ok(user) => user,
                    Err(err) => {
                        ::log::warn!("registration of {}: {:#}", self.local_name, err);

                        self.state = HttpState::Stopped;

                        return Ok(());
                    }
                }
            }
            Some(response) => {
                ::log::warn!(
                    "registration of {} got non-success status {}",
                    self.local_name,
                    response.status
                );

                self.state = HttpState::Stopped;

                return Ok(());
            }
            None => {
                self.state = HttpState::Stopped;

                return Ok(());
            }
        };

        ::log::info!("registered {} as user {}", user.name, user.id);

        self.registry.admit(user.clone())?;
        self.remote_user = Some(user);
        self.state = HttpState::Registered;

        Ok(())
    }

    /// Let a random registered user request friendship with one of its
    /// possible friends.
    ///
    /// The acting user is drawn from the whole registry and need not be the
    /// user this engine registered.
    pub async fn attempt_friendship(&mut self) -> Result<TaskOutcome, RegistryError> {
        match self.state {
            HttpState::Stopped => return Ok(TaskOutcome::Stop),
            HttpState::Unregistered => {
                ::log::debug!("{} is not registered yet", self.local_name);

                return Ok(TaskOutcome::Continue);
            }
            _ => (),
        }

        if self.registry.len() < 2 {
            ::log::debug!("not enough users registered yet");

            return Ok(TaskOutcome::Continue);
        }

        let requester = match self.registry.pick_random(&mut self.rng) {
            Some(user) => user,
            None => return Ok(TaskOutcome::Continue),
        };

        self.state = HttpState::Discovering;

        let candidates = match self.discover(&requester).await {
            Discovery::Candidates(candidates) => candidates,
            Discovery::Exhausted => {
                ::log::info!(
                    "possible friends of {} exhausted, stopping {}",
                    requester.id,
                    self.local_name
                );

                self.state = HttpState::Stopped;

                return Ok(TaskOutcome::Stop);
            }
            Discovery::Skip => {
                self.state = HttpState::Registered;

                return Ok(TaskOutcome::Continue);
            }
        };

        let friend = match candidates.choose(&mut self.rng) {
            Some(friend) => friend.clone(),
            None => {
                self.state = HttpState::Registered;

                return Ok(TaskOutcome::Continue);
            }
        };

        self.state = HttpState::Requesting;

        let result = self.request_friendship(requester, friend).await;

        self.state = HttpState::Registered;

        result.map(|()| TaskOutcome::Continue)
    }

    async fn discover(&self, requester: &User) -> Discovery {
        let path = path_possible_friends(requester.id);

        let response = match self
            .timed(LABEL_POSSIBLE_FRIENDS, StatusCode::OK, self.api.get(&path))
            .await
        {
            Some(response) => response,
            None => return Discovery::Skip,
        };

        match response.status {
            StatusCode::OK => {
                // The backend encodes an empty list as null
                match response.json::<Option<Vec<User>>>() {
                    Ok(Some(candidates)) if !candidates.is_empty() => {
                        Discovery::Candidates(candidates)
                    }
                    Ok(_) => {
                        ::log::debug!("no possible friends for user {}", requester.id);

                        Discovery::Skip
                    }
                    Err(err) => {
                        ::log::warn!("possible friends of user {}: {:#}", requester.id, err);

                        Discovery::Skip
                    }
                }
            }
            StatusCode::CONFLICT => Discovery::Exhausted,
            status => {
                ::log::warn!(
                    "possible friends of user {} got unhandled status {}",
                    requester.id,
                    status
                );

                Discovery::Skip
            }
        }
    }

    async fn request_friendship(&self, requester: User, friend: User) -> Result<(), RegistryError> {
        let requester_id = requester.id;
        let request = FriendRequest {
            user: requester,
            friend,
        };

        ::log::debug!(
            "user {} requests friendship with user {}",
            requester_id,
            request.friend.id
        );

        let response = self
            .timed(
                LABEL_FRIENDSHIP,
                StatusCode::CREATED,
                self.api.post_json(PATH_FRIENDSHIP, &request),
            )
            .await;

        match response {
            Some(response) if response.status == StatusCode::CREATED => {
                self.registry.increment_friend_count(requester_id)?;
            }
            Some(response) => {
                ::log::warn!(
                    "friendship of {} and {} got non-success status {}",
                    requester_id,
                    request.friend.id,
                    response.status
                );
            }
            None => (),
        }

        Ok(())
    }

    /// Await an HTTP call and report its duration and outcome. Transport
    /// errors are logged and turn into None.
    async fn timed<F>(&self, label: &'static str, expected: StatusCode, call: F) -> Option<ApiResponse>
    where
        F: Future<Output = anyhow::Result<ApiResponse>>,
    {
        let start = Instant::now();
        let result = call.await;
        let elapsed = start.elapsed();

        match result {
            Ok(response) => {
                let kind = if response.status == expected {
                    EventKind::Success
                } else {
                    EventKind::Failure
                };

                self.sink
                    .fire(MetricsEvent::new(kind, label, elapsed, response.body.len()));

                Some(response)
            }
            Err(err) => {
                ::log::warn!("{} request failed: {:#}", label, err);

                self.sink
                    .fire(MetricsEvent::new(EventKind::Failure, label, elapsed, 0));

                None
            }
        }
    }
}
