//! Rule-based progressive overload.
//!
//! Given what a member lifted recently for one exercise, suggest the three sets
//! of their next session: one lighter set with an extra rep, one at the usual
//! reps with a small weight bump, one heavier set with a rep less.

use serde::{Serialize, Deserialize};
use chrono::prelude::*;
use uuid::Uuid;
use crate::Workout;

pub const WEIGHT_INCREMENT: f64 = 1.25;
pub const MIN_REPS: u32 = 6;
/// how many of the most recent observations feed the averages
pub const RECENT_OBSERVATIONS: usize = 3;

const DEFAULT_REPS: u32 = 10;
const DEFAULT_WEIGHT: f64 = 20.0;
const DEFAULT_WEIGHT_STEP: f64 = 2.5;

/// one performed set of the exercise being progressed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub reps: u32,
    pub weight: Option<f64>,
    pub performed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SuggestedSet {
    pub reps: u32,
    pub weight: f64,
}

/// the suggestion used when there is no history: 10 reps at 20.0, then one rep
/// less (never below `MIN_REPS`) and 2.5 more per set
pub fn default_ramp() -> [SuggestedSet; 3] {
    let mut reps = DEFAULT_REPS;
    let mut weight = DEFAULT_WEIGHT;
    let mut sets = [SuggestedSet { reps, weight }; 3];
    for set in sets.iter_mut() {
        *set = SuggestedSet { reps, weight };
        reps = reps.saturating_sub(1).max(MIN_REPS);
        weight += DEFAULT_WEIGHT_STEP;
    }
    sets
}

pub fn suggest_next_sets(history: &[Observation]) -> [SuggestedSet; 3] {
    if history.is_empty() {
        return default_ramp()
    }

    let mut latest: Vec<&Observation> = history.iter().collect();
    // stable, so equal timestamps keep their input order
    latest.sort_by(|a, b| b.performed_at.cmp(&a.performed_at));
    latest.truncate(RECENT_OBSERVATIONS);

    let n = latest.len() as f64;
    let avg_weight = latest.iter().map(|o| o.weight.unwrap_or(0.0)).sum::<f64>() / n;
    let avg_reps = latest.iter().map(|o| o.reps as f64).sum::<f64>() / n;
    let starting_reps = avg_reps.ceil() as u32;

    [
        SuggestedSet { reps: starting_reps.saturating_add(1), weight: avg_weight },
        SuggestedSet { reps: starting_reps, weight: avg_weight + WEIGHT_INCREMENT },
        SuggestedSet {
            reps: starting_reps.saturating_sub(1).max(MIN_REPS),
            weight: avg_weight + WEIGHT_INCREMENT * 2.0,
        },
    ]
}

/// every set of `exercise_id` in `workouts`, dated by the workout's schedule
pub fn observations_for<'a>(workouts: impl IntoIterator<Item = &'a Workout>, exercise_id: Uuid) -> Vec<Observation> {
    workouts.into_iter()
        .flat_map(|w| {
            w.sets.iter()
                .filter(move |s| s.exercise_id == Some(exercise_id))
                .map(move |s| Observation { reps: s.reps, weight: s.weight, performed_at: w.scheduled_date })
        })
        .collect()
}

/// the `limit` most recent observations, newest first
pub fn most_recent(mut observations: Vec<Observation>, limit: usize) -> Vec<Observation> {
    observations.sort_by(|a, b| b.performed_at.cmp(&a.performed_at));
    observations.truncate(limit);
    observations
}
