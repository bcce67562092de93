use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use serde::{Serialize, Deserialize};
use chrono::prelude::*;
use uuid::Uuid;

pub mod error;
pub mod auth;
pub mod policy;
pub mod api;
pub mod cache;
pub mod store;
pub mod db;
pub mod seed;
pub mod progression;
pub mod aggregate;
pub mod workouts;
pub mod users;
pub mod exercises;
pub mod checkins;
pub mod advice;
pub mod suggestions;
pub mod config;
pub mod routes;

pub use error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Trainer,
    Member,
}

/// user representation matching `users` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub roles: BTreeSet<Role>,
    pub active: bool,
    #[serde(default)]
    pub assigned_trainer: Option<Uuid>,
    /// ed25519 public key used to verify signed requests
    #[serde(skip)]
    pub public_key: [u8; 32],
    pub created: DateTime<Utc>,
}

impl User {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MuscleGroup {
    Chest,
    Back,
    Shoulders,
    Biceps,
    Triceps,
    Legs,
    Abs,
    Forearms,
}

impl MuscleGroup {
    pub const ALL: [MuscleGroup; 8] = [
        MuscleGroup::Chest,
        MuscleGroup::Back,
        MuscleGroup::Shoulders,
        MuscleGroup::Biceps,
        MuscleGroup::Triceps,
        MuscleGroup::Legs,
        MuscleGroup::Abs,
        MuscleGroup::Forearms,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MuscleGroup::Chest => "chest",
            MuscleGroup::Back => "back",
            MuscleGroup::Shoulders => "shoulders",
            MuscleGroup::Biceps => "biceps",
            MuscleGroup::Triceps => "triceps",
            MuscleGroup::Legs => "legs",
            MuscleGroup::Abs => "abs",
            MuscleGroup::Forearms => "forearms",
        }
    }
}

impl fmt::Display for MuscleGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MuscleGroup {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MuscleGroup::ALL.iter()
            .find(|g| g.as_str().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| AppError::Validation(format!("unknown muscle group: {}", s)))
    }
}

/// exercise reference data matching `exercise_templates` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseTemplate {
    pub id: Uuid,
    pub name: String,
    pub primary_muscle_group: MuscleGroup,
    #[serde(default)]
    pub secondary_muscle_group: Option<MuscleGroup>,
    #[serde(default)]
    pub description: Option<String>,
    pub requires_weight: bool,
}

/// a single set of one exercise, embedded in its parent `Workout`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutSet {
    pub id: Uuid,
    /// `None` only for documents whose exercise reference was lost
    pub exercise_id: Option<Uuid>,
    pub exercise_name: String,
    pub reps: u32,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
    pub completed: bool,
}

impl WorkoutSet {
    pub fn new(exercise: &ExerciseTemplate, reps: u32, weight: Option<f64>, notes: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            exercise_id: Some(exercise.id),
            exercise_name: exercise.name.clone(),
            reps,
            weight,
            notes,
            completed: false,
        }
    }

    /// reps × weight, missing weight counts as zero
    pub fn volume(&self) -> f64 {
        self.reps as f64 * self.weight.unwrap_or(0.0)
    }
}

/// workout representation matching `workouts` table (sets stored as a json document)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workout {
    pub id: Uuid,
    pub member_id: Uuid,
    #[serde(default)]
    pub trainer_id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub scheduled_date: DateTime<Utc>,
    #[serde(default)]
    pub completed_date: Option<DateTime<Utc>>,
    pub completed: bool,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub target_muscle_groups: BTreeSet<MuscleGroup>,
    #[serde(default)]
    pub sets: Vec<WorkoutSet>,
}

impl Workout {
    pub fn new(name: impl Into<String>, member_id: Uuid, scheduled_date: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            member_id,
            trainer_id: None,
            name: name.into(),
            description: None,
            scheduled_date,
            completed_date: None,
            completed: false,
            notes: None,
            target_muscle_groups: BTreeSet::new(),
            sets: Vec::new(),
        }
    }
}

/// a gym visit, matching `checkins` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkin {
    pub id: Uuid,
    pub user_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}
