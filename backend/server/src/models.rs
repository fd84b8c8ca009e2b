//! # Records
//!
//! Everything the store persists, serialized as camelCase JSON both on the
//! wire and inside Redis values.
//!
//! ## Anonymity
//!
//! - A rating never holds the rater's user id, only `sha256(rater_id + salt)`
//! - Stored records keep the rater, IP and device hashes; clients only ever get
//!   the view types ([`UserView`], [`RatingView`], [`PublicProfile`])
//! - Other users only ever receive a [`PublicProfile`], never an email
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "male" => Some(Gender::Male),
            "female" => Some(Gender::Female),
            "other" => Some(Gender::Other),
            _ => None,
        }
    }

    /// `Other` has no counterpart for discovery or rating.
    pub fn opposite(self) -> Option<Self> {
        match self {
            Gender::Male => Some(Gender::Female),
            Gender::Female => Some(Gender::Male),
            Gender::Other => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    #[default]
    Unverified,
    Pending,
    Verified,
    Rejected,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    Email,
    IdUpload,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct College {
    pub id: Uuid,
    pub name: String,
    pub email_domain: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl College {
    pub fn new(name: impl Into<String>, email_domain: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            email_domain: email_domain.trim().to_ascii_lowercase(),
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,

    pub college_id: Option<Uuid>,
    pub gender: Option<Gender>,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    #[serde(default)]
    pub verification_status: VerificationStatus,
    pub verification_method: Option<VerificationMethod>,

    #[serde(default)]
    pub ratings_received: u32,
    pub average_score: Option<f64>,
    /// Running total of scores so the average can be refreshed without a scan.
    #[serde(default)]
    pub score_total: u64,

    pub last_active_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub device_hash: Option<String>,
    #[serde(default)]
    pub ip_hash: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: &str) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            email: email.to_string(),
            first_name: None,
            last_name: None,
            profile_image_url: None,
            college_id: None,
            gender: None,
            display_name: None,
            bio: None,
            verification_status: VerificationStatus::Unverified,
            verification_method: None,
            ratings_received: 0,
            average_score: None,
            score_total: 0,
            last_active_at: None,
            device_hash: None,
            ip_hash: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.verification_status == VerificationStatus::Verified
    }

    pub fn has_profile(&self) -> bool {
        self.college_id.is_some() && self.gender.is_some()
    }

    /// Folds one more score into the stored stats.
    pub fn record_score(&mut self, score: u8) {
        self.ratings_received += 1;
        self.score_total += u64::from(score);
        self.average_score = Some(round2(
            self.score_total as f64 / f64::from(self.ratings_received),
        ));
        self.updated_at = Utc::now();
    }

    /// The signed-in user's own view of their record.
    pub fn view(&self) -> UserView {
        UserView {
            id: self.id,
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            profile_image_url: self.profile_image_url.clone(),
            college_id: self.college_id,
            gender: self.gender,
            display_name: self.display_name.clone(),
            bio: self.bio.clone(),
            verification_status: self.verification_status,
            verification_method: self.verification_method,
            ratings_received: self.ratings_received,
            average_score: self.average_score,
            last_active_at: self.last_active_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn public(&self) -> PublicProfile {
        PublicProfile {
            id: self.id,
            first_name: self.first_name.clone(),
            display_name: self.display_name.clone(),
            bio: self.bio.clone(),
            profile_image_url: self.profile_image_url.clone(),
            gender: self.gender,
            college_id: self.college_id,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
    pub college_id: Option<Uuid>,
    pub gender: Option<Gender>,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub verification_status: VerificationStatus,
    pub verification_method: Option<VerificationMethod>,
    pub ratings_received: u32,
    pub average_score: Option<f64>,
    pub last_active_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicProfile {
    pub id: Uuid,
    pub first_name: Option<String>,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub profile_image_url: Option<String>,
    pub gender: Option<Gender>,
    pub college_id: Option<Uuid>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RatingStatus {
    #[default]
    Active,
    Appealed,
    Removed,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub id: Uuid,
    pub rater_id_hash: String,
    pub target_user_id: Uuid,
    pub score: u8,
    pub college_id: Option<Uuid>,
    pub ip_hash: Option<String>,
    pub device_hash: Option<String>,
    #[serde(default)]
    pub status: RatingStatus,
    pub created_at: DateTime<Utc>,
}

/// What a rater gets back, and what a rated user sees of their ratings.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RatingView {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<Uuid>,
    pub score: u8,
    pub status: RatingStatus,
    pub created_at: DateTime<Utc>,
}

impl Rating {
    pub fn for_rater(&self) -> RatingView {
        RatingView {
            id: self.id,
            target_user_id: Some(self.target_user_id),
            score: self.score,
            status: self.status,
            created_at: self.created_at,
        }
    }

    pub fn for_target(&self) -> RatingView {
        RatingView {
            target_user_id: None,
            ..self.for_rater()
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    Weekly,
    AllTime,
}

impl PeriodType {
    pub const ALL: [PeriodType; 2] = [PeriodType::Weekly, PeriodType::AllTime];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "weekly" => Some(PeriodType::Weekly),
            "all_time" => Some(PeriodType::AllTime),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PeriodType::Weekly => "weekly",
            PeriodType::AllTime => "all_time",
        }
    }
}

impl fmt::Display for PeriodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub id: Uuid,
    pub college_id: Uuid,
    pub user_id: Uuid,
    pub rank: u32,
    pub average_score: f64,
    pub total_ratings: u32,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub period_type: PeriodType,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<PublicProfile>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppealReason {
    Inappropriate,
    FakeRating,
    Harassment,
    Spam,
    Other,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppealStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Appeal {
    pub id: Uuid,
    pub user_id: Uuid,
    pub rating_id: Option<Uuid>,
    pub reason: AppealReason,
    pub description: Option<String>,
    #[serde(default)]
    pub status: AppealStatus,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackType {
    Bug,
    Feature,
    Improvement,
    Other,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub kind: FeedbackType,
    pub category: Option<String>,
    pub title: String,
    pub description: String,
    pub rating: Option<u8>,
    pub status: String,
    pub priority: String,
    pub device_info: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
