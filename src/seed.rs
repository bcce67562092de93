use std::collections::BTreeSet;
use chrono::prelude::*;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;
use crate::auth::{gen_keypair, PrivateKey};
use crate::store::Store;
use crate::{AppError, ExerciseTemplate, MuscleGroup, Role, User};

const EXERCISES_CSV: &str = include_str!("../data/exercises.csv");

#[derive(Debug, Deserialize)]
struct ExerciseRow {
    name: String,
    primary_muscle_group: String,
    secondary_muscle_group: Option<String>,
    requires_weight: bool,
    description: Option<String>,
}

impl ExerciseRow {
    fn into_template(self) -> Result<ExerciseTemplate, AppError> {
        let secondary = match self.secondary_muscle_group.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(s) => Some(s.parse::<MuscleGroup>()?),
        };
        Ok(ExerciseTemplate {
            id: Uuid::new_v4(),
            name: self.name.trim().to_string(),
            primary_muscle_group: self.primary_muscle_group.parse::<MuscleGroup>()?,
            secondary_muscle_group: secondary,
            description: self.description.filter(|d| !d.trim().is_empty()),
            requires_weight: self.requires_weight,
        })
    }
}

/// parse exercise templates from csv with header
/// `name,primary_muscle_group,secondary_muscle_group,requires_weight,description`
pub fn parse_exercises(csv_data: &str) -> Result<Vec<ExerciseTemplate>, AppError> {
    let mut rdr = csv::Reader::from_reader(csv_data.as_bytes());
    let mut out = Vec::new();
    for (i, row) in rdr.deserialize::<ExerciseRow>().enumerate() {
        // line 1 is the header
        let row = row.map_err(|e| AppError::Validation(format!("exercises csv line {}: {}", i + 2, e)))?;
        out.push(row.into_template()?);
    }
    Ok(out)
}

/// insert the built-in exercise catalogue when the store has none
pub async fn seed_exercises(store: &dyn Store) -> Result<usize, AppError> {
    if !store.list_exercises().await?.is_empty() {
        return Ok(0)
    }
    let exercises = parse_exercises(EXERCISES_CSV)?;
    for exercise in &exercises {
        store.insert_exercise(exercise).await?;
    }
    info!(n = exercises.len(), "seeded exercise templates");
    Ok(exercises.len())
}

/// create an admin with a fresh keypair when the store has no users at all
///
/// the private key is only ever returned (and logged) here
pub async fn seed_admin(store: &dyn Store) -> Result<Option<(User, PrivateKey)>, AppError> {
    if store.count_users().await? > 0 {
        return Ok(None)
    }
    let (priv_key, public_key) = gen_keypair();
    let admin = User {
        id: Uuid::new_v4(),
        username: "admin".to_string(),
        email: "admin@gymkeeper.local".to_string(),
        first_name: "Admin".to_string(),
        last_name: "User".to_string(),
        roles: vec![Role::Admin].into_iter().collect::<BTreeSet<_>>(),
        active: true,
        assigned_trainer: None,
        public_key,
        created: Utc::now(),
    };
    store.insert_user(&admin).await?;
    warn!(
        user_id = %admin.id,
        private_key = %base64::encode(&priv_key[..]),
        "no users found, created admin; store this key, it is not shown again",
    );
    Ok(Some((admin, priv_key)))
}
