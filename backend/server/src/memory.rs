use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    error::StorageError,
    models::{Appeal, College, Feedback, LeaderboardEntry, PeriodType, Rating, Session, User},
    storage::StoreResult,
};

#[derive(Default)]
struct Tables {
    colleges: HashMap<Uuid, College>,
    users: HashMap<Uuid, User>,
    sessions: HashMap<String, Session>,
    ratings: Vec<Rating>,
    rated: HashMap<String, HashSet<Uuid>>,
    leaderboards: HashMap<(Uuid, PeriodType), Vec<LeaderboardEntry>>,
    appeals: Vec<Appeal>,
    feedback: Vec<Feedback>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    pub async fn all_colleges(&self) -> StoreResult<Vec<College>> {
        Ok(self.tables.read().await.colleges.values().cloned().collect())
    }

    pub async fn get_college(&self, id: Uuid) -> StoreResult<Option<College>> {
        Ok(self.tables.read().await.colleges.get(&id).cloned())
    }

    pub async fn get_college_by_domain(&self, domain: &str) -> StoreResult<Option<College>> {
        Ok(self
            .tables
            .read()
            .await
            .colleges
            .values()
            .find(|college| college.email_domain == domain)
            .cloned())
    }

    pub async fn create_college(&self, college: College) -> StoreResult<College> {
        let mut tables = self.tables.write().await;

        if tables
            .colleges
            .values()
            .any(|existing| existing.email_domain == college.email_domain)
        {
            return Err(StorageError::Duplicate("college"));
        }

        tables.colleges.insert(college.id, college.clone());
        Ok(college)
    }

    pub async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    pub async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    pub async fn create_user(&self, user: User) -> StoreResult<User> {
        let mut tables = self.tables.write().await;

        if tables.users.values().any(|existing| existing.email == user.email) {
            return Err(StorageError::Duplicate("email"));
        }

        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    pub async fn save_user(&self, mut user: User) -> StoreResult<User> {
        let mut tables = self.tables.write().await;

        let existing = tables
            .users
            .get_mut(&user.id)
            .ok_or(StorageError::Missing("user"))?;

        user.ratings_received = existing.ratings_received;
        user.score_total = existing.score_total;
        user.average_score = existing.average_score;
        *existing = user.clone();

        Ok(user)
    }

    pub async fn college_users(&self, college_id: Uuid) -> StoreResult<Vec<User>> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .filter(|user| user.college_id == Some(college_id))
            .cloned()
            .collect())
    }

    pub async fn create_session(&self, session: Session) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .sessions
            .insert(session.id.clone(), session);
        Ok(())
    }

    pub async fn get_session(&self, id: &str) -> StoreResult<Option<Session>> {
        Ok(self.tables.read().await.sessions.get(id).cloned())
    }

    pub async fn delete_session(&self, id: &str) -> StoreResult<()> {
        self.tables.write().await.sessions.remove(id);
        Ok(())
    }

    pub async fn rated_targets(&self, rater_hash: &str) -> StoreResult<HashSet<Uuid>> {
        Ok(self
            .tables
            .read()
            .await
            .rated
            .get(rater_hash)
            .cloned()
            .unwrap_or_default())
    }

    pub async fn insert_rating(&self, rating: Rating) -> StoreResult<User> {
        let mut tables = self.tables.write().await;
        let tables = &mut *tables;

        let target = tables
            .users
            .get_mut(&rating.target_user_id)
            .ok_or(StorageError::Missing("user"))?;

        let rated = tables.rated.entry(rating.rater_id_hash.clone()).or_default();
        if !rated.insert(rating.target_user_id) {
            return Err(StorageError::Duplicate("rating"));
        }

        target.record_score(rating.score);
        let target = target.clone();
        tables.ratings.push(rating);

        Ok(target)
    }

    pub async fn get_rating(&self, id: Uuid) -> StoreResult<Option<Rating>> {
        Ok(self
            .tables
            .read()
            .await
            .ratings
            .iter()
            .find(|rating| rating.id == id)
            .cloned())
    }

    pub async fn ratings_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Rating>> {
        Ok(self
            .tables
            .read()
            .await
            .ratings
            .iter()
            .filter(|rating| rating.target_user_id == user_id)
            .cloned()
            .collect())
    }

    pub async fn college_ratings(&self, college_id: Uuid) -> StoreResult<Vec<Rating>> {
        Ok(self
            .tables
            .read()
            .await
            .ratings
            .iter()
            .filter(|rating| rating.college_id == Some(college_id))
            .cloned()
            .collect())
    }

    pub async fn replace_leaderboard(
        &self,
        college_id: Uuid,
        period: PeriodType,
        entries: Vec<LeaderboardEntry>,
    ) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .leaderboards
            .insert((college_id, period), entries);
        Ok(())
    }

    pub async fn get_leaderboard(
        &self,
        college_id: Uuid,
        period: PeriodType,
    ) -> StoreResult<Vec<LeaderboardEntry>> {
        Ok(self
            .tables
            .read()
            .await
            .leaderboards
            .get(&(college_id, period))
            .cloned()
            .unwrap_or_default())
    }

    pub async fn create_appeal(&self, appeal: Appeal) -> StoreResult<Appeal> {
        self.tables.write().await.appeals.push(appeal.clone());
        Ok(appeal)
    }

    pub async fn appeals_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Appeal>> {
        Ok(self
            .tables
            .read()
            .await
            .appeals
            .iter()
            .filter(|appeal| appeal.user_id == user_id)
            .cloned()
            .collect())
    }

    pub async fn create_feedback(&self, feedback: Feedback) -> StoreResult<Feedback> {
        self.tables.write().await.feedback.push(feedback.clone());
        Ok(feedback)
    }

    pub async fn feedback_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Feedback>> {
        Ok(self
            .tables
            .read()
            .await
            .feedback
            .iter()
            .filter(|item| item.user_id == user_id)
            .cloned()
            .collect())
    }

    /// Sorting and the limit are applied by the caller.
    pub async fn all_feedback(&self) -> StoreResult<Vec<Feedback>> {
        Ok(self.tables.read().await.feedback.clone())
    }
}
