use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use async_trait::async_trait;
use chrono::prelude::*;
use hashbrown::HashMap;
use uuid::Uuid;
use crate::{AppError, Checkin, ExerciseTemplate, Role, User, Workout};

/// persistence seam for users, exercise templates, workouts and check-ins
///
/// Workout and check-in lists are returned newest first. Sets are part
/// of the workout document, so `save_workout` writes a workout and its sets in
/// one operation.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, AppError>;

    /// insert or replace; fails with `Validation` if another user has the same username or email
    async fn insert_user(&self, user: &User) -> Result<(), AppError>;

    /// users holding `role`, ordered by username
    async fn users_with_role(&self, role: Role, active_only: bool) -> Result<Vec<User>, AppError>;

    async fn count_users(&self) -> Result<usize, AppError>;

    async fn get_exercise(&self, exercise_id: Uuid) -> Result<Option<ExerciseTemplate>, AppError>;

    async fn list_exercises(&self) -> Result<Vec<ExerciseTemplate>, AppError>;

    /// fails with `Validation` if another template already has the same name
    async fn insert_exercise(&self, exercise: &ExerciseTemplate) -> Result<(), AppError>;

    /// returns false if no such template existed
    async fn delete_exercise(&self, exercise_id: Uuid) -> Result<bool, AppError>;

    async fn get_workout(&self, workout_id: Uuid) -> Result<Option<Workout>, AppError>;

    /// insert or replace
    async fn save_workout(&self, workout: &Workout) -> Result<(), AppError>;

    /// returns false if no such workout existed
    async fn delete_workout(&self, workout_id: Uuid) -> Result<bool, AppError>;

    async fn workouts_by_member(&self, member_id: Uuid) -> Result<Vec<Workout>, AppError>;

    /// workouts scheduled within `start..=end`
    async fn workouts_by_member_between(
        &self,
        member_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Workout>, AppError>;

    async fn count_workouts(&self) -> Result<usize, AppError>;

    async fn insert_checkin(&self, checkin: &Checkin) -> Result<(), AppError>;

    /// the `limit` latest check-ins of `user_id`, or of everyone when `None`
    async fn recent_checkins(&self, user_id: Option<Uuid>, limit: usize) -> Result<Vec<Checkin>, AppError>;

    /// check-ins within `start..=end`
    async fn checkins_between(
        &self,
        user_id: Option<Uuid>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Checkin>, AppError>;
}

type MemberWorkouts = BTreeMap<(DateTime<Utc>, Uuid), Workout>;

#[derive(Default)]
struct Workouts {
    by_member: HashMap<Uuid, MemberWorkouts>,
    /// workout_id -> (member_id, scheduled_date), the key into `by_member`
    index: HashMap<Uuid, (Uuid, DateTime<Utc>)>,
}

/// in-process store, used for tests and for running without a database
#[derive(Clone, Default)]
pub struct MemoryStore {
    users: Arc<RwLock<HashMap<Uuid, User>>>,
    exercises: Arc<RwLock<HashMap<Uuid, ExerciseTemplate>>>,
    workouts: Arc<RwLock<Workouts>>,
    checkins: Arc<RwLock<BTreeMap<(DateTime<Utc>, Uuid), Checkin>>>,
}

fn newest_first<'a>(it: impl DoubleEndedIterator<Item = (&'a (DateTime<Utc>, Uuid), &'a Workout)>) -> Vec<Workout> {
    it.rev().map(|(_, w)| w.clone()).collect()
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        Ok(users.get(&user_id).cloned())
    }

    async fn insert_user(&self, user: &User) -> Result<(), AppError> {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        for other in users.values().filter(|u| u.id != user.id) {
            if other.username == user.username {
                return Err(AppError::Validation(format!("username already taken: {}", user.username)))
            }
            if other.email.eq_ignore_ascii_case(&user.email) {
                return Err(AppError::Validation(format!("email already registered: {}", user.email)))
            }
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn users_with_role(&self, role: Role, active_only: bool) -> Result<Vec<User>, AppError> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        let mut found: Vec<User> = users.values()
            .filter(|u| u.has_role(role) && (u.active || !active_only))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(found)
    }

    async fn count_users(&self) -> Result<usize, AppError> {
        Ok(self.users.read().unwrap_or_else(PoisonError::into_inner).len())
    }

    async fn get_exercise(&self, exercise_id: Uuid) -> Result<Option<ExerciseTemplate>, AppError> {
        let exercises = self.exercises.read().unwrap_or_else(PoisonError::into_inner);
        Ok(exercises.get(&exercise_id).cloned())
    }

    async fn list_exercises(&self) -> Result<Vec<ExerciseTemplate>, AppError> {
        let exercises = self.exercises.read().unwrap_or_else(PoisonError::into_inner);
        let mut items: Vec<ExerciseTemplate> = exercises.values().cloned().collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    async fn insert_exercise(&self, exercise: &ExerciseTemplate) -> Result<(), AppError> {
        let mut exercises = self.exercises.write().unwrap_or_else(PoisonError::into_inner);
        if exercises.values().any(|e| e.name == exercise.name && e.id != exercise.id) {
            return Err(AppError::Validation(format!("exercise already exists: {}", exercise.name)))
        }
        exercises.insert(exercise.id, exercise.clone());
        Ok(())
    }

    async fn delete_exercise(&self, exercise_id: Uuid) -> Result<bool, AppError> {
        let mut exercises = self.exercises.write().unwrap_or_else(PoisonError::into_inner);
        Ok(exercises.remove(&exercise_id).is_some())
    }

    async fn get_workout(&self, workout_id: Uuid) -> Result<Option<Workout>, AppError> {
        let workouts = self.workouts.read().unwrap_or_else(PoisonError::into_inner);
        let found = workouts.index.get(&workout_id)
            .and_then(|(member_id, scheduled)| {
                workouts.by_member.get(member_id)?.get(&(*scheduled, workout_id))
            })
            .cloned();
        Ok(found)
    }

    async fn save_workout(&self, workout: &Workout) -> Result<(), AppError> {
        let mut workouts = self.workouts.write().unwrap_or_else(PoisonError::into_inner);
        let Workouts { by_member, index } = &mut *workouts;

        // the scheduled date (or member) may have changed, drop the old entry first
        if let Some((member_id, scheduled)) = index.remove(&workout.id) {
            if let Some(member_workouts) = by_member.get_mut(&member_id) {
                member_workouts.remove(&(scheduled, workout.id));
            }
        }

        by_member.entry(workout.member_id)
            .or_default()
            .insert((workout.scheduled_date, workout.id), workout.clone());
        index.insert(workout.id, (workout.member_id, workout.scheduled_date));
        Ok(())
    }

    async fn delete_workout(&self, workout_id: Uuid) -> Result<bool, AppError> {
        let mut workouts = self.workouts.write().unwrap_or_else(PoisonError::into_inner);
        let Workouts { by_member, index } = &mut *workouts;
        match index.remove(&workout_id) {
            Some((member_id, scheduled)) => {
                if let Some(member_workouts) = by_member.get_mut(&member_id) {
                    member_workouts.remove(&(scheduled, workout_id));
                }
                Ok(true)
            }

            None => Ok(false)
        }
    }

    async fn workouts_by_member(&self, member_id: Uuid) -> Result<Vec<Workout>, AppError> {
        let workouts = self.workouts.read().unwrap_or_else(PoisonError::into_inner);
        Ok(workouts.by_member.get(&member_id)
            .map(|kv| newest_first(kv.iter()))
            .unwrap_or_default())
    }

    async fn workouts_by_member_between(
        &self,
        member_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Workout>, AppError> {
        if start > end {
            return Ok(Vec::new())
        }
        let workouts = self.workouts.read().unwrap_or_else(PoisonError::into_inner);
        let lo = (start, Uuid::nil());
        let hi = (end, Uuid::from_u128(u128::MAX));
        Ok(workouts.by_member.get(&member_id)
            .map(|kv| newest_first(kv.range(lo..=hi)))
            .unwrap_or_default())
    }

    async fn count_workouts(&self) -> Result<usize, AppError> {
        Ok(self.workouts.read().unwrap_or_else(PoisonError::into_inner).index.len())
    }

    async fn insert_checkin(&self, checkin: &Checkin) -> Result<(), AppError> {
        let mut checkins = self.checkins.write().unwrap_or_else(PoisonError::into_inner);
        checkins.insert((checkin.occurred_at, checkin.id), checkin.clone());
        Ok(())
    }

    async fn recent_checkins(&self, user_id: Option<Uuid>, limit: usize) -> Result<Vec<Checkin>, AppError> {
        let checkins = self.checkins.read().unwrap_or_else(PoisonError::into_inner);
        Ok(checkins.values()
            .rev()
            .filter(|c| user_id.map(|id| c.user_id == id).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn checkins_between(
        &self,
        user_id: Option<Uuid>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Checkin>, AppError> {
        if start > end {
            return Ok(Vec::new())
        }
        let checkins = self.checkins.read().unwrap_or_else(PoisonError::into_inner);
        let lo = (start, Uuid::nil());
        let hi = (end, Uuid::from_u128(u128::MAX));
        Ok(checkins.range(lo..=hi)
            .rev()
            .map(|(_, c)| c)
            .filter(|c| user_id.map(|id| c.user_id == id).unwrap_or(true))
            .cloned()
            .collect())
    }
}
