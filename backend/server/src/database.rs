//! # Redis
//!
//! Durable store.
//!
//! Core purpose is to hold every record as JSON and keep the uniqueness and
//! counting rules atomic on the server side.
//!
//! ## Requirements
//!
//! - One college to a few thousand users
//! - O(1) lookups by id, email and email domain
//! - A rater may rate a target once, even under concurrent requests
//! - Rating stats must never lose an increment
//!
//! ## Layout
//!
//! - `colleges`: hash, id to college JSON
//! - `college_domains`: hash, email domain to college id (`HSETNX` for uniqueness)
//! - `users`: hash, id to user JSON
//! - `user_emails`: hash, email to user id (`HSETNX` for uniqueness)
//! - `college:{id}:users`: set of member user ids
//! - `user:{id}:stats`: hash with `count` and `total`, only touched by `HINCRBY`
//! - `session:{id}`: string, session JSON with a matching `EX`
//! - `ratings`: hash, id to rating JSON
//! - `user:{id}:ratings` / `college:{id}:ratings`: lists of rating ids, newest first
//! - `rater:{hash}:targets`: set of user ids a rater hash has rated
//! - `leaderboard:{college}:{period}`: string, entries JSON
//! - `appeals` / `feedback`: hashes, id to JSON, with `user:{id}:appeals`,
//!   `user:{id}:feedback` and `feedback:all` id lists
//!
//! Rating insertion runs as a single Lua script so the pair check, the rating
//! write and the stat increments happen together. Colleges and users go in
//! the same way: the uniqueness claim never exists without its record.
use std::{collections::HashSet, time::Duration};

use chrono::Utc;
use redis::{
    AsyncCommands, Client, Script,
    aio::{ConnectionManager, ConnectionManagerConfig},
    cmd,
};
use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{
    error::StorageError,
    models::{
        Appeal, College, Feedback, LeaderboardEntry, PeriodType, Rating, Session, User, round2,
    },
    storage::StoreResult,
};

const COLLEGES: &str = "colleges";
const COLLEGE_DOMAINS: &str = "college_domains";
const USERS: &str = "users";
const USER_EMAILS: &str = "user_emails";
const RATINGS: &str = "ratings";
const APPEALS: &str = "appeals";
const FEEDBACK: &str = "feedback";
const FEEDBACK_ALL: &str = "feedback:all";

const INSERT_RATING: &str = r#"
if redis.call('SADD', KEYS[1], ARGV[1]) == 0 then
    return -1
end
redis.call('HSET', KEYS[2], ARGV[2], ARGV[3])
redis.call('LPUSH', KEYS[3], ARGV[2])
redis.call('LPUSH', KEYS[4], ARGV[2])
redis.call('HINCRBY', KEYS[5], 'total', ARGV[4])
return redis.call('HINCRBY', KEYS[5], 'count', 1)
"#;

const INSERT_UNIQUE: &str = r#"
if redis.call('HSETNX', KEYS[1], ARGV[1], ARGV[2]) == 0 then
    return 0
end
redis.call('HSET', KEYS[2], ARGV[2], ARGV[3])
if KEYS[3] then
    redis.call('SADD', KEYS[3], ARGV[2])
end
return 1
"#;

pub async fn init_redis(redis_url: &str) -> Result<ConnectionManager, redis::RedisError> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(100));

    let client = Client::open(redis_url)?;

    client.get_connection_manager_with_config(config).await
}

fn college_users_key(id: Uuid) -> String {
    format!("college:{id}:users")
}

fn college_ratings_key(id: Option<Uuid>) -> String {
    match id {
        Some(id) => format!("college:{id}:ratings"),
        None => "college:none:ratings".to_string(),
    }
}

fn user_ratings_key(id: Uuid) -> String {
    format!("user:{id}:ratings")
}

fn user_stats_key(id: Uuid) -> String {
    format!("user:{id}:stats")
}

fn user_appeals_key(id: Uuid) -> String {
    format!("user:{id}:appeals")
}

fn user_feedback_key(id: Uuid) -> String {
    format!("user:{id}:feedback")
}

fn rater_key(rater_hash: &str) -> String {
    format!("rater:{rater_hash}:targets")
}

fn session_key(id: &str) -> String {
    format!("session:{id}")
}

fn leaderboard_key(college_id: Uuid, period: PeriodType) -> String {
    format!("leaderboard:{college_id}:{period}")
}

fn decode<T: DeserializeOwned>(raw: &str) -> StoreResult<T> {
    Ok(serde_json::from_str(raw)?)
}

fn encode<T: Serialize>(value: &T) -> StoreResult<String> {
    Ok(serde_json::to_string(value)?)
}

/// Applies the authoritative counters onto a decoded user.
fn apply_stats(user: &mut User, count: Option<u32>, total: Option<u64>) {
    user.ratings_received = count.unwrap_or(0);
    user.score_total = total.unwrap_or(0);
    user.average_score = (user.ratings_received > 0)
        .then(|| round2(user.score_total as f64 / f64::from(user.ratings_received)));
}

pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    pub async fn ping(&self) -> StoreResult<()> {
        let mut con = self.connection.clone();
        let _: String = cmd("PING").query_async(&mut con).await?;

        Ok(())
    }

    pub async fn all_colleges(&self) -> StoreResult<Vec<College>> {
        let mut con = self.connection.clone();
        let raw: Vec<String> = con.hvals(COLLEGES).await?;

        raw.iter().map(|college| decode(college)).collect()
    }

    pub async fn get_college(&self, id: Uuid) -> StoreResult<Option<College>> {
        let mut con = self.connection.clone();
        let raw: Option<String> = con.hget(COLLEGES, id.to_string()).await?;

        raw.as_deref().map(decode).transpose()
    }

    pub async fn get_college_by_domain(&self, domain: &str) -> StoreResult<Option<College>> {
        let mut con = self.connection.clone();
        let id: Option<String> = con.hget(COLLEGE_DOMAINS, domain).await?;

        let Some(id) = id else {
            return Ok(None);
        };
        let raw: Option<String> = con.hget(COLLEGES, id).await?;

        raw.as_deref().map(decode).transpose()
    }

    pub async fn create_college(&self, college: College) -> StoreResult<College> {
        let inserted = self
            .insert_unique(
                (COLLEGE_DOMAINS, college.email_domain.as_str()),
                COLLEGES,
                &college.id.to_string(),
                encode(&college)?,
                None,
            )
            .await?;

        if !inserted {
            return Err(StorageError::Duplicate("college"));
        }

        Ok(college)
    }

    /// Claims `unique` in the index hash and writes the record (plus an
    /// optional set membership) in one script. `false` if already claimed.
    async fn insert_unique(
        &self,
        (index, unique): (&str, &str),
        table: &str,
        id: &str,
        record: String,
        member_of: Option<String>,
    ) -> StoreResult<bool> {
        let mut con = self.connection.clone();

        let script = Script::new(INSERT_UNIQUE);
        let mut invocation = script.key(index);
        invocation.key(table);
        if let Some(set) = member_of {
            invocation.key(set);
        }
        let inserted: i64 = invocation
            .arg(unique)
            .arg(id)
            .arg(record)
            .invoke_async(&mut con)
            .await?;

        Ok(inserted == 1)
    }

    async fn hydrate(&self, raw: Vec<Option<String>>) -> StoreResult<Vec<User>> {
        let mut users: Vec<User> = raw
            .iter()
            .flatten()
            .map(|user| decode(user))
            .collect::<StoreResult<_>>()?;

        if users.is_empty() {
            return Ok(users);
        }

        let mut con = self.connection.clone();
        let mut pipe = redis::pipe();
        for user in &users {
            pipe.cmd("HMGET")
                .arg(user_stats_key(user.id))
                .arg("count")
                .arg("total");
        }
        let stats: Vec<(Option<u32>, Option<u64>)> = pipe.query_async(&mut con).await?;

        for (user, (count, total)) in users.iter_mut().zip(stats) {
            apply_stats(user, count, total);
        }

        Ok(users)
    }

    pub async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let mut con = self.connection.clone();
        let raw: Option<String> = con.hget(USERS, id.to_string()).await?;

        Ok(self.hydrate(vec![raw]).await?.pop())
    }

    pub async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let mut con = self.connection.clone();
        let id: Option<String> = con.hget(USER_EMAILS, email).await?;

        let Some(id) = id else {
            return Ok(None);
        };
        let raw: Option<String> = con.hget(USERS, id).await?;

        Ok(self.hydrate(vec![raw]).await?.pop())
    }

    pub async fn create_user(&self, user: User) -> StoreResult<User> {
        let inserted = self
            .insert_unique(
                (USER_EMAILS, user.email.as_str()),
                USERS,
                &user.id.to_string(),
                encode(&user)?,
                user.college_id.map(college_users_key),
            )
            .await?;

        if !inserted {
            return Err(StorageError::Duplicate("email"));
        }

        Ok(user)
    }

    pub async fn save_user(&self, user: User) -> StoreResult<User> {
        let mut con = self.connection.clone();
        let id = user.id.to_string();

        let previous: Option<String> = con.hget(USERS, &id).await?;
        let previous: User = previous
            .as_deref()
            .map(decode)
            .transpose()?
            .ok_or(StorageError::Missing("user"))?;

        let mut pipe = redis::pipe();
        pipe.atomic().hset(USERS, &id, encode(&user)?).ignore();
        if previous.college_id != user.college_id {
            if let Some(old) = previous.college_id {
                pipe.srem(college_users_key(old), &id).ignore();
            }
            if let Some(new) = user.college_id {
                pipe.sadd(college_users_key(new), &id).ignore();
            }
        }
        let _: () = pipe.query_async(&mut con).await?;

        self.get_user(user.id)
            .await?
            .ok_or(StorageError::Missing("user"))
    }

    pub async fn college_users(&self, college_id: Uuid) -> StoreResult<Vec<User>> {
        let mut con = self.connection.clone();
        let ids: Vec<String> = con.smembers(college_users_key(college_id)).await?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let raw: Vec<Option<String>> = cmd("HMGET").arg(USERS).arg(&ids).query_async(&mut con).await?;

        self.hydrate(raw).await
    }

    pub async fn create_session(&self, session: Session) -> StoreResult<()> {
        let mut con = self.connection.clone();
        let ttl = (session.expires_at - Utc::now()).num_seconds().max(1) as u64;

        let _: () = con
            .set_ex(session_key(&session.id), encode(&session)?, ttl)
            .await?;

        Ok(())
    }

    pub async fn get_session(&self, id: &str) -> StoreResult<Option<Session>> {
        let mut con = self.connection.clone();
        let raw: Option<String> = con.get(session_key(id)).await?;

        raw.as_deref().map(decode).transpose()
    }

    pub async fn delete_session(&self, id: &str) -> StoreResult<()> {
        let mut con = self.connection.clone();
        let _: () = con.del(session_key(id)).await?;

        Ok(())
    }

    pub async fn rated_targets(&self, rater_hash: &str) -> StoreResult<HashSet<Uuid>> {
        let mut con = self.connection.clone();
        let ids: Vec<String> = con.smembers(rater_key(rater_hash)).await?;

        Ok(ids.iter().filter_map(|id| Uuid::parse_str(id).ok()).collect())
    }

    pub async fn insert_rating(&self, rating: Rating) -> StoreResult<User> {
        let mut con = self.connection.clone();

        let exists: bool = con
            .hexists(USERS, rating.target_user_id.to_string())
            .await?;
        if !exists {
            return Err(StorageError::Missing("user"));
        }

        let script = Script::new(INSERT_RATING);
        let inserted: i64 = script
            .key(rater_key(&rating.rater_id_hash))
            .key(RATINGS)
            .key(user_ratings_key(rating.target_user_id))
            .key(college_ratings_key(rating.college_id))
            .key(user_stats_key(rating.target_user_id))
            .arg(rating.target_user_id.to_string())
            .arg(rating.id.to_string())
            .arg(encode(&rating)?)
            .arg(i64::from(rating.score))
            .invoke_async(&mut con)
            .await?;

        if inserted < 0 {
            return Err(StorageError::Duplicate("rating"));
        }

        self.get_user(rating.target_user_id)
            .await?
            .ok_or(StorageError::Missing("user"))
    }

    async fn ratings_by_ids(&self, ids: Vec<String>) -> StoreResult<Vec<Rating>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut con = self.connection.clone();
        let raw: Vec<Option<String>> = cmd("HMGET").arg(RATINGS).arg(&ids).query_async(&mut con).await?;

        raw.iter().flatten().map(|rating| decode(rating)).collect()
    }

    pub async fn get_rating(&self, id: Uuid) -> StoreResult<Option<Rating>> {
        let mut con = self.connection.clone();
        let raw: Option<String> = con.hget(RATINGS, id.to_string()).await?;

        raw.as_deref().map(decode).transpose()
    }

    pub async fn ratings_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Rating>> {
        let mut con = self.connection.clone();
        let ids: Vec<String> = con.lrange(user_ratings_key(user_id), 0, -1).await?;

        self.ratings_by_ids(ids).await
    }

    pub async fn college_ratings(&self, college_id: Uuid) -> StoreResult<Vec<Rating>> {
        let mut con = self.connection.clone();
        let ids: Vec<String> = con
            .lrange(college_ratings_key(Some(college_id)), 0, -1)
            .await?;

        self.ratings_by_ids(ids).await
    }

    pub async fn replace_leaderboard(
        &self,
        college_id: Uuid,
        period: PeriodType,
        entries: Vec<LeaderboardEntry>,
    ) -> StoreResult<()> {
        let mut con = self.connection.clone();
        let _: () = con
            .set(leaderboard_key(college_id, period), encode(&entries)?)
            .await?;

        Ok(())
    }

    pub async fn get_leaderboard(
        &self,
        college_id: Uuid,
        period: PeriodType,
    ) -> StoreResult<Vec<LeaderboardEntry>> {
        let mut con = self.connection.clone();
        let raw: Option<String> = con.get(leaderboard_key(college_id, period)).await?;

        Ok(raw.as_deref().map(decode).transpose()?.unwrap_or_default())
    }

    pub async fn create_appeal(&self, appeal: Appeal) -> StoreResult<Appeal> {
        let mut con = self.connection.clone();
        let id = appeal.id.to_string();

        let _: () = redis::pipe()
            .atomic()
            .hset(APPEALS, &id, encode(&appeal)?)
            .ignore()
            .lpush(user_appeals_key(appeal.user_id), &id)
            .ignore()
            .query_async(&mut con)
            .await?;

        Ok(appeal)
    }

    pub async fn appeals_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Appeal>> {
        let mut con = self.connection.clone();
        let ids: Vec<String> = con.lrange(user_appeals_key(user_id), 0, -1).await?;

        self.records(APPEALS, ids).await
    }

    pub async fn create_feedback(&self, feedback: Feedback) -> StoreResult<Feedback> {
        let mut con = self.connection.clone();
        let id = feedback.id.to_string();

        let _: () = redis::pipe()
            .atomic()
            .hset(FEEDBACK, &id, encode(&feedback)?)
            .ignore()
            .lpush(user_feedback_key(feedback.user_id), &id)
            .ignore()
            .lpush(FEEDBACK_ALL, &id)
            .ignore()
            .query_async(&mut con)
            .await?;

        Ok(feedback)
    }

    pub async fn feedback_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Feedback>> {
        let mut con = self.connection.clone();
        let ids: Vec<String> = con.lrange(user_feedback_key(user_id), 0, -1).await?;

        self.records(FEEDBACK, ids).await
    }

    pub async fn all_feedback(&self, limit: usize) -> StoreResult<Vec<Feedback>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut con = self.connection.clone();
        let ids: Vec<String> = con.lrange(FEEDBACK_ALL, 0, limit as isize - 1).await?;

        self.records(FEEDBACK, ids).await
    }

    async fn records<T: DeserializeOwned>(&self, hash: &str, ids: Vec<String>) -> StoreResult<Vec<T>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut con = self.connection.clone();
        let raw: Vec<Option<String>> = cmd("HMGET").arg(hash).arg(&ids).query_async(&mut con).await?;

        raw.iter().flatten().map(|record| decode(record)).collect()
    }
}
