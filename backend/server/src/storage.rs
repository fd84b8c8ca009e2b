//! # Store
//!
//! One API, two engines:
//!
//! - [`RedisStore`]: durable, see [`crate::database`] for the key layout
//! - [`MemoryStore`]: process-local maps, used by tests and `STORAGE=memory`
//!
//! Callers hold a [`Store`] and never care which engine is behind it.
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    config::{Config, StorageKind},
    database::{RedisStore, init_redis},
    error::StorageError,
    memory::MemoryStore,
    models::{Appeal, College, Feedback, LeaderboardEntry, PeriodType, Rating, Session, User},
};

pub type StoreResult<T> = Result<T, StorageError>;

pub enum Store {
    Memory(MemoryStore),
    Redis(RedisStore),
}

macro_rules! dispatch {
    ($self:ident, $store:ident => $call:expr) => {
        match $self {
            Store::Memory($store) => $call.await,
            Store::Redis($store) => $call.await,
        }
    };
}

impl Store {
    pub async fn connect(config: &Config) -> StoreResult<Self> {
        match config.storage {
            StorageKind::Memory => Ok(Store::Memory(MemoryStore::default())),
            StorageKind::Redis => {
                let connection = init_redis(&config.redis_url).await?;
                Ok(Store::Redis(RedisStore::new(connection)))
            }
        }
    }

    pub fn memory() -> Self {
        Store::Memory(MemoryStore::default())
    }

    pub fn engine(&self) -> &'static str {
        match self {
            Store::Memory(_) => "memory",
            Store::Redis(_) => "redis",
        }
    }

    pub async fn ping(&self) -> StoreResult<()> {
        dispatch!(self, s => s.ping())
    }

    pub async fn list_colleges(&self) -> StoreResult<Vec<College>> {
        let mut colleges: Vec<College> = dispatch!(self, s => s.all_colleges())?
            .into_iter()
            .filter(|college| college.is_active)
            .collect();
        colleges.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(colleges)
    }

    pub async fn get_college(&self, id: Uuid) -> StoreResult<Option<College>> {
        dispatch!(self, s => s.get_college(id))
    }

    pub async fn get_college_by_domain(&self, domain: &str) -> StoreResult<Option<College>> {
        dispatch!(self, s => s.get_college_by_domain(domain))
    }

    pub async fn create_college(&self, college: College) -> StoreResult<College> {
        dispatch!(self, s => s.create_college(college))
    }

    pub async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        dispatch!(self, s => s.get_user(id))
    }

    pub async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        dispatch!(self, s => s.get_user_by_email(email))
    }

    pub async fn create_user(&self, user: User) -> StoreResult<User> {
        dispatch!(self, s => s.create_user(user))
    }

    /// Full overwrite of the profile fields. Rating stats are owned by
    /// [`Store::insert_rating`] and survive whatever the caller passes.
    pub async fn save_user(&self, mut user: User) -> StoreResult<User> {
        user.updated_at = Utc::now();
        dispatch!(self, s => s.save_user(user))
    }

    pub async fn college_users(&self, college_id: Uuid) -> StoreResult<Vec<User>> {
        dispatch!(self, s => s.college_users(college_id))
    }

    pub async fn create_session(&self, session: Session) -> StoreResult<()> {
        dispatch!(self, s => s.create_session(session))
    }

    /// Expired sessions read as absent and are dropped.
    pub async fn get_session(&self, id: &str) -> StoreResult<Option<Session>> {
        let Some(session) = dispatch!(self, s => s.get_session(id))? else {
            return Ok(None);
        };

        if session.is_expired(Utc::now()) {
            self.delete_session(id).await?;
            return Ok(None);
        }

        Ok(Some(session))
    }

    pub async fn delete_session(&self, id: &str) -> StoreResult<()> {
        dispatch!(self, s => s.delete_session(id))
    }

    pub async fn has_rated(&self, rater_hash: &str, target: Uuid) -> StoreResult<bool> {
        Ok(self.rated_targets(rater_hash).await?.contains(&target))
    }

    pub async fn rated_targets(&self, rater_hash: &str) -> StoreResult<HashSet<Uuid>> {
        dispatch!(self, s => s.rated_targets(rater_hash))
    }

    /// Stores the rating and folds its score into the target's stats. A second
    /// rating of the same target under the same rater hash is
    /// [`StorageError::Duplicate`]. Returns the refreshed target.
    pub async fn insert_rating(&self, rating: Rating) -> StoreResult<User> {
        dispatch!(self, s => s.insert_rating(rating))
    }

    pub async fn get_rating(&self, id: Uuid) -> StoreResult<Option<Rating>> {
        dispatch!(self, s => s.get_rating(id))
    }

    /// Newest first.
    pub async fn ratings_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Rating>> {
        let mut ratings = dispatch!(self, s => s.ratings_for_user(user_id))?;
        newest_first(&mut ratings, |rating| rating.created_at);

        Ok(ratings)
    }

    pub async fn college_ratings_since(
        &self,
        college_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Rating>> {
        let ratings = dispatch!(self, s => s.college_ratings(college_id))?;

        Ok(ratings
            .into_iter()
            .filter(|rating| rating.created_at >= since)
            .collect())
    }

    pub async fn replace_leaderboard(
        &self,
        college_id: Uuid,
        period: PeriodType,
        entries: Vec<LeaderboardEntry>,
    ) -> StoreResult<()> {
        dispatch!(self, s => s.replace_leaderboard(college_id, period, entries))
    }

    pub async fn get_leaderboard(
        &self,
        college_id: Uuid,
        period: PeriodType,
    ) -> StoreResult<Vec<LeaderboardEntry>> {
        dispatch!(self, s => s.get_leaderboard(college_id, period))
    }

    pub async fn create_appeal(&self, appeal: Appeal) -> StoreResult<Appeal> {
        dispatch!(self, s => s.create_appeal(appeal))
    }

    pub async fn appeals_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Appeal>> {
        let mut appeals = dispatch!(self, s => s.appeals_for_user(user_id))?;
        newest_first(&mut appeals, |appeal| appeal.created_at);

        Ok(appeals)
    }

    pub async fn create_feedback(&self, feedback: Feedback) -> StoreResult<Feedback> {
        dispatch!(self, s => s.create_feedback(feedback))
    }

    pub async fn feedback_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Feedback>> {
        let mut feedback = dispatch!(self, s => s.feedback_for_user(user_id))?;
        newest_first(&mut feedback, |item| item.created_at);

        Ok(feedback)
    }

    pub async fn all_feedback(&self, limit: usize) -> StoreResult<Vec<Feedback>> {
        let mut feedback = match self {
            Store::Memory(s) => s.all_feedback().await?,
            Store::Redis(s) => s.all_feedback(limit).await?,
        };
        newest_first(&mut feedback, |item| item.created_at);
        feedback.truncate(limit);

        Ok(feedback)
    }
}

fn newest_first<T>(items: &mut [T], created_at: impl Fn(&T) -> DateTime<Utc>) {
    items.sort_by_key(|item| std::cmp::Reverse(created_at(item)));
}
