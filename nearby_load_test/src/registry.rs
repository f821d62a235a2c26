use hashbrown::HashMap;
use nearby_protocol::{User, UserId};
use parking_lot::Mutex;
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("user {0} was admitted twice")]
    DuplicateAdmission(UserId),
    #[error("user {0} is not a registry member")]
    UnknownUser(UserId),
}

#[derive(Default)]
struct Members {
    /// In registration order. Only used for random indexing.
    users: Vec<User>,
    friend_counts: HashMap<UserId, usize>,
}

/// Registered users of the whole load test and the number of successful
/// friend requests made by each of them
///
/// Shared by all virtual users. Every operation takes the lock, so each
/// call observes the effects of all calls that returned before it.
#[derive(Default)]
pub struct UserRegistry {
    members: Mutex<Members>,
}

impl UserRegistry {
    pub fn admit(&self, user: User) -> Result<(), RegistryError> {
        let mut members = self.members.lock();

        if members.friend_counts.contains_key(&user.id) {
            return Err(RegistryError::DuplicateAdmission(user.id));
        }

        members.friend_counts.insert(user.id, 0);
        members.users.push(user);

        Ok(())
    }

    /// Uniformly select a member. Members are not removed, so repeated
    /// calls may return the same user.
    pub fn pick_random(&self, rng: &mut impl Rng) -> Option<User> {
        let members = self.members.lock();

        if members.users.is_empty() {
            return None;
        }

        let index = rng.gen_range(0..members.users.len());

        Some(members.users[index].clone())
    }

    pub fn increment_friend_count(&self, user_id: UserId) -> Result<usize, RegistryError> {
        let mut members = self.members.lock();

        let count = members
            .friend_counts
            .get_mut(&user_id)
            .ok_or(RegistryError::UnknownUser(user_id))?;

        *count += 1;

        Ok(*count)
    }

    pub fn friend_count(&self, user_id: UserId) -> Option<usize> {
        self.members.lock().friend_counts.get(&user_id).copied()
    }

    /// Sum of friend counts over all members
    pub fn total_friend_count(&self) -> usize {
        self.members.lock().friend_counts.values().sum()
    }

    pub fn len(&self) -> usize {
        self.members.lock().users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use hashbrown::HashSet;
    use quickcheck::TestResult;
    use quickcheck_macros::quickcheck;
    use rand::{rngs::SmallRng, SeedableRng};

    use super::*;

    fn user(id: i64) -> User {
        User {
            id: UserId(id),
            name: format!("User{}", id),
        }
    }

    #[test]
    fn test_admit_and_count() {
        let registry = UserRegistry::default();

        assert!(registry.is_empty());
        assert_eq!(registry.pick_random(&mut SmallRng::seed_from_u64(0)), None);

        registry.admit(user(1)).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.friend_count(UserId(1)), Some(0));
        assert_eq!(registry.increment_friend_count(UserId(1)), Ok(1));
        assert_eq!(registry.increment_friend_count(UserId(1)), Ok(2));
        assert_eq!(registry.friend_count(UserId(1)), Some(2));
    }

    #[test]
    fn test_invariant_violations() {
        let registry = UserRegistry::default();

        registry.admit(user(1)).unwrap();

        assert_eq!(
            registry.admit(user(1)),
            Err(RegistryError::DuplicateAdmission(UserId(1)))
        );
        assert_eq!(
            registry.increment_friend_count(UserId(2)),
            Err(RegistryError::UnknownUser(UserId(2)))
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.friend_count(UserId(2)), None);
    }

    #[quickcheck]
    fn quickcheck_size_and_pick_random(ids: Vec<i16>, seed: u64) -> TestResult {
        let registry = UserRegistry::default();
        let mut distinct = HashSet::new();

        for id in ids {
            let result = registry.admit(user(id.into()));

            if distinct.insert(id) != result.is_ok() {
                return TestResult::failed();
            }
        }

        if registry.len() != distinct.len() {
            return TestResult::failed();
        }

        let mut rng = SmallRng::seed_from_u64(seed);

        for _ in 0..32 {
            match registry.pick_random(&mut rng) {
                Some(picked) => {
                    let id = picked.id.0 as i16;

                    if !distinct.contains(&id) || picked != user(id.into()) {
                        return TestResult::failed();
                    }
                }
                None if distinct.is_empty() => (),
                None => return TestResult::failed(),
            }
        }

        TestResult::passed()
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        const NUM_THREADS: usize = 16;
        const INCREMENTS_PER_THREAD: usize = 1_000;

        let registry = Arc::new(UserRegistry::default());

        registry.admit(user(1)).unwrap();
        registry.admit(user(2)).unwrap();

        let handles: Vec<_> = (0..NUM_THREADS)
            .map(|_| {
                let registry = registry.clone();

                thread::spawn(move || {
                    for _ in 0..INCREMENTS_PER_THREAD {
                        registry.increment_friend_count(UserId(1)).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(
            registry.friend_count(UserId(1)),
            Some(NUM_THREADS * INCREMENTS_PER_THREAD)
        );
        assert_eq!(registry.friend_count(UserId(2)), Some(0));
        assert_eq!(registry.total_friend_count(), NUM_THREADS * INCREMENTS_PER_THREAD);
    }
}
