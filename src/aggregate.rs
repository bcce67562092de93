use serde::{Serialize, Deserialize};
use hashbrown::HashMap;
use uuid::Uuid;
use crate::WorkoutSet;

/// reps and weight of one set inside an `ExerciseAggregate`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimpleSet {
    pub reps: u32,
    pub weight: Option<f64>,
}

/// per-exercise rollup of a workout's sets, rebuilt on every read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseAggregate {
    pub exercise_id: Uuid,
    pub exercise_name: String,
    pub sets: Vec<SimpleSet>,
    pub total_volume: f64,
}

/// group `sets` by exercise, in order of each exercise's first appearance
///
/// sets without an exercise reference are skipped
pub fn aggregate(sets: &[WorkoutSet]) -> Vec<ExerciseAggregate> {
    let mut out: Vec<ExerciseAggregate> = Vec::new();
    let mut slot: HashMap<Uuid, usize> = HashMap::new();

    for set in sets {
        let exercise_id = match set.exercise_id {
            Some(id) => id,
            None => continue,
        };
        let i = *slot.entry(exercise_id).or_insert_with(|| {
            out.push(ExerciseAggregate {
                exercise_id,
                exercise_name: set.exercise_name.clone(),
                sets: Vec::new(),
                total_volume: 0.0,
            });
            out.len() - 1
        });
        let entry = &mut out[i];
        entry.sets.push(SimpleSet { reps: set.reps, weight: set.weight });
        entry.total_volume += set.volume();
    }

    out
}
