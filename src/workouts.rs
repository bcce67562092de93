use std::sync::Arc;
use chrono::prelude::*;
use tracing::{debug, info};
use uuid::Uuid;
use crate::api::{day_range, midnight, SetDto, WorkoutExerciseRequest, WorkoutRequest, WorkoutSetRequest};
use crate::cache::{Clock, SuggestionCache};
use crate::policy::{self, Action, Ownership};
use crate::store::Store;
use crate::{AppError, ExerciseTemplate, MuscleGroup, Role, User, Workout, WorkoutSet};

// completion state machine
impl Workout {
    /// moves between complete and incomplete, stamping `completed_date` on the way in
    fn set_completed(&mut self, completed: bool, now: DateTime<Utc>) {
        match (self.completed, completed) {
            (false, true) => {
                self.completed = true;
                self.completed_date = Some(now);
            }
            (true, false) => {
                self.completed = false;
                self.completed_date = None;
            }
            _ => {}
        }
    }

    pub fn all_sets_completed(&self) -> bool {
        !self.sets.is_empty() && self.sets.iter().all(|s| s.completed)
    }

    /// re-derive workout completion from its sets
    pub fn refresh_completion(&mut self, now: DateTime<Utc>) {
        let all = self.all_sets_completed();
        self.set_completed(all, now);
    }

    fn set_mut(&mut self, set_id: Uuid) -> Result<&mut WorkoutSet, AppError> {
        let workout_id = self.id;
        self.sets.iter_mut()
            .find(|s| s.id == set_id)
            .ok_or_else(|| AppError::NotFound(format!("set {} not found in workout {}", set_id, workout_id)))
    }

    pub fn complete_set(&mut self, set_id: Uuid, now: DateTime<Utc>) -> Result<(), AppError> {
        self.set_mut(set_id)?.completed = true;
        self.refresh_completion(now);
        Ok(())
    }

    pub fn uncomplete_set(&mut self, set_id: Uuid, now: DateTime<Utc>) -> Result<(), AppError> {
        self.set_mut(set_id)?.completed = false;
        self.refresh_completion(now);
        Ok(())
    }

    /// completes every set and the workout itself, even one without sets
    pub fn complete_all(&mut self, now: DateTime<Utc>) {
        for set in self.sets.iter_mut() {
            set.completed = true;
        }
        self.set_completed(true, now);
    }

    pub fn replace_sets(&mut self, sets: Vec<WorkoutSet>, now: DateTime<Utc>) {
        self.sets = sets;
        self.refresh_completion(now);
    }
}

/// workout use cases: access checks, set construction, persistence and
/// invalidation of the member's cached suggestions
#[derive(Clone)]
pub struct WorkoutService {
    store: Arc<dyn Store>,
    cache: SuggestionCache,
    clock: Arc<dyn Clock>,
}

impl WorkoutService {
    pub fn new(store: Arc<dyn Store>, cache: SuggestionCache, clock: Arc<dyn Clock>) -> Self {
        Self { store, cache, clock }
    }

    async fn load(&self, workout_id: Uuid) -> Result<Workout, AppError> {
        self.store.get_workout(workout_id).await?
            .ok_or_else(|| AppError::not_found("workout", workout_id))
    }

    async fn load_user(&self, user_id: Uuid, what: &str) -> Result<User, AppError> {
        self.store.get_user(user_id).await?
            .ok_or_else(|| AppError::not_found(what, user_id))
    }

    async fn load_exercise(&self, exercise_id: Uuid) -> Result<ExerciseTemplate, AppError> {
        self.store.get_exercise(exercise_id).await?
            .ok_or_else(|| AppError::not_found("exercise", exercise_id))
    }

    async fn authorize_workout(&self, actor: &User, workout: &Workout, action: Action) -> Result<(), AppError> {
        // the member's assigned trainer only matters for trainer writes
        let member = if action == Action::Write
            && workout.trainer_id != Some(actor.id)
            && actor.has_role(Role::Trainer)
            && actor.id != workout.member_id
        {
            self.store.get_user(workout.member_id).await?
        } else {
            None
        };
        policy::authorize(actor, &Ownership::of_workout(workout, member.as_ref()), action)
    }

    async fn load_for(&self, actor: &User, workout_id: Uuid, action: Action) -> Result<Workout, AppError> {
        let workout = self.load(workout_id).await?;
        self.authorize_workout(actor, &workout, action).await?;
        Ok(workout)
    }

    async fn build_sets(&self, requests: &[WorkoutSetRequest]) -> Result<Vec<WorkoutSet>, AppError> {
        let mut sets = Vec::with_capacity(requests.len());
        for req in requests {
            let exercise = self.load_exercise(req.exercise_id).await?;
            sets.push(WorkoutSet::new(&exercise, req.reps, req.weight, req.notes.clone()));
        }
        Ok(sets)
    }

    fn sets_from_dtos(exercise: &ExerciseTemplate, dtos: &[SetDto]) -> Vec<WorkoutSet> {
        dtos.iter()
            .map(|s| WorkoutSet::new(exercise, s.reps, s.weight, None))
            .collect()
    }

    async fn save(&self, workout: &Workout) -> Result<(), AppError> {
        self.store.save_workout(workout).await?;
        self.cache.invalidate_user(workout.member_id);
        Ok(())
    }

    /// members whose workouts `actor` may list when asking for `member_id`
    async fn resolve_member(&self, actor: &User, member_id: Option<Uuid>) -> Result<Uuid, AppError> {
        match member_id {
            Some(id) if id != actor.id && policy::can_act_for_others(actor) => {
                Ok(self.load_user(id, "member").await?.id)
            }
            // members asking for someone else get their own workouts
            _ => Ok(actor.id),
        }
    }

    pub async fn create(&self, actor: &User, req: WorkoutRequest) -> Result<Workout, AppError> {
        req.validate()?;
        let member_id = req.member_id.unwrap_or(actor.id);
        if member_id != actor.id {
            if !policy::can_act_for_others(actor) {
                return Err(AppError::Forbidden("members may only create their own workouts".into()))
            }
            self.load_user(member_id, "member").await?;
        }

        let trainer_id = match req.trainer_id {
            Some(id) => Some(self.load_user(id, "trainer").await?.id),
            None if member_id != actor.id && actor.has_role(Role::Trainer) => Some(actor.id),
            None => None,
        };

        let now = self.clock.now();
        let mut workout = Workout::new(req.name.trim(), member_id, req.schedule().unwrap_or(now));
        workout.trainer_id = trainer_id;
        workout.description = req.description.clone();
        workout.notes = req.notes.clone();
        workout.target_muscle_groups = req.target_muscle_groups.clone().unwrap_or_default();
        if let Some(sets) = &req.sets {
            workout.sets = self.build_sets(sets).await?;
        }

        self.save(&workout).await?;
        info!(workout_id = %workout.id, %member_id, n_sets = workout.sets.len(), "created workout");
        Ok(workout)
    }

    pub async fn get(&self, actor: &User, workout_id: Uuid) -> Result<Workout, AppError> {
        self.load_for(actor, workout_id, Action::Read).await
    }

    pub async fn list(&self, actor: &User, member_id: Option<Uuid>) -> Result<Vec<Workout>, AppError> {
        let resolved = self.resolve_member(actor, member_id).await?;
        let workouts = self.store.workouts_by_member(resolved).await?;
        debug!(caller = %actor.id, requested = ?member_id, %resolved, n = workouts.len(), "listed workouts");
        Ok(workouts)
    }

    /// the caller's workouts scheduled on any day from `start` through `end`
    pub async fn list_between(&self, actor: &User, start: NaiveDate, end: NaiveDate) -> Result<Vec<Workout>, AppError> {
        let (from, to) = day_range(start, end)?;
        self.store.workouts_by_member_between(actor.id, from, to).await
    }

    pub async fn list_by_muscle_group(&self, actor: &User, group: MuscleGroup) -> Result<Vec<Workout>, AppError> {
        let workouts = self.store.workouts_by_member(actor.id).await?;
        Ok(workouts.into_iter()
            .filter(|w| w.target_muscle_groups.contains(&group))
            .collect())
    }

    pub async fn update(&self, actor: &User, workout_id: Uuid, req: WorkoutRequest) -> Result<Workout, AppError> {
        req.validate()?;
        let mut workout = self.load_for(actor, workout_id, Action::Write).await?;
        let now = self.clock.now();

        workout.name = req.name.trim().to_string();
        workout.description = req.description.clone();
        workout.notes = req.notes.clone();
        if let Some(scheduled) = req.schedule() {
            workout.scheduled_date = scheduled;
        }
        if let Some(trainer_id) = req.trainer_id {
            workout.trainer_id = Some(self.load_user(trainer_id, "trainer").await?.id);
        }
        if let Some(groups) = &req.target_muscle_groups {
            workout.target_muscle_groups = groups.clone();
        }
        if let Some(sets) = &req.sets {
            let sets = self.build_sets(sets).await?;
            workout.replace_sets(sets, now);
        }

        self.save(&workout).await?;
        Ok(workout)
    }

    /// same content on a new day, every set open again
    pub async fn copy(&self, actor: &User, workout_id: Uuid, new_date: NaiveDate) -> Result<Workout, AppError> {
        let original = self.load_for(actor, workout_id, Action::Write).await?;
        let mut copy = Workout::new(original.name.clone(), original.member_id, midnight(new_date));
        copy.trainer_id = original.trainer_id;
        copy.description = original.description.clone();
        copy.notes = original.notes.clone();
        copy.target_muscle_groups = original.target_muscle_groups.clone();
        copy.sets = original.sets.iter()
            .map(|s| WorkoutSet { id: Uuid::new_v4(), completed: false, ..s.clone() })
            .collect();

        self.save(&copy).await?;
        info!(from = %original.id, to = %copy.id, "copied workout");
        Ok(copy)
    }

    pub async fn delete(&self, actor: &User, workout_id: Uuid) -> Result<(), AppError> {
        let workout = self.load_for(actor, workout_id, Action::Write).await?;
        self.store.delete_workout(workout.id).await?;
        self.cache.invalidate_user(workout.member_id);
        info!(%workout_id, "deleted workout");
        Ok(())
    }

    pub async fn add_exercise(&self, actor: &User, workout_id: Uuid, req: WorkoutExerciseRequest) -> Result<Workout, AppError> {
        req.validate()?;
        let exercise_id = req.exercise_template_id
            .ok_or_else(|| AppError::Validation("exerciseTemplateId is required".into()))?;
        let mut workout = self.load_for(actor, workout_id, Action::Write).await?;
        let exercise = self.load_exercise(exercise_id).await?;

        let mut sets = workout.sets.clone();
        sets.extend(Self::sets_from_dtos(&exercise, &req.sets));
        workout.replace_sets(sets, self.clock.now());

        self.save(&workout).await?;
        Ok(workout)
    }

    /// replace every set of `exercise_id` with the requested ones, appended last
    pub async fn replace_exercise(
        &self,
        actor: &User,
        workout_id: Uuid,
        exercise_id: Uuid,
        req: WorkoutExerciseRequest,
    ) -> Result<Workout, AppError> {
        req.validate()?;
        let mut workout = self.load_for(actor, workout_id, Action::Write).await?;
        let exercise = self.load_exercise(exercise_id).await?;

        let mut sets: Vec<WorkoutSet> = workout.sets.iter()
            .filter(|s| s.exercise_id != Some(exercise_id))
            .cloned()
            .collect();
        sets.extend(Self::sets_from_dtos(&exercise, &req.sets));
        workout.replace_sets(sets, self.clock.now());

        self.save(&workout).await?;
        Ok(workout)
    }

    pub async fn remove_exercise(&self, actor: &User, workout_id: Uuid, exercise_id: Uuid) -> Result<Workout, AppError> {
        let mut workout = self.load_for(actor, workout_id, Action::Write).await?;
        let sets: Vec<WorkoutSet> = workout.sets.iter()
            .filter(|s| s.exercise_id != Some(exercise_id))
            .cloned()
            .collect();
        workout.replace_sets(sets, self.clock.now());

        self.save(&workout).await?;
        Ok(workout)
    }

    pub async fn complete_set(&self, actor: &User, workout_id: Uuid, set_id: Uuid) -> Result<Workout, AppError> {
        let mut workout = self.load_for(actor, workout_id, Action::Write).await?;
        workout.complete_set(set_id, self.clock.now())?;
        self.save(&workout).await?;
        Ok(workout)
    }

    pub async fn uncomplete_set(&self, actor: &User, workout_id: Uuid, set_id: Uuid) -> Result<Workout, AppError> {
        let mut workout = self.load_for(actor, workout_id, Action::Write).await?;
        workout.uncomplete_set(set_id, self.clock.now())?;
        self.save(&workout).await?;
        Ok(workout)
    }

    pub async fn complete_workout(&self, actor: &User, workout_id: Uuid) -> Result<Workout, AppError> {
        let mut workout = self.load_for(actor, workout_id, Action::Write).await?;
        workout.complete_all(self.clock.now());
        self.save(&workout).await?;
        Ok(workout)
    }
}

#[allow(unused)]
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crate::cache::{CachedSuggestion, ManualClock, SuggestionKey};
    use crate::store::MemoryStore;

    fn user(name: &str, roles: &[Role]) -> User {
        User {
            id: Uuid::new_v4(),
            username: name.into(),
            email: format!("{}@example.com", name),
            first_name: name.into(),
            last_name: "Test".into(),
            roles: roles.iter().copied().collect(),
            active: true,
            assigned_trainer: None,
            public_key: [0u8; 32],
            created: Utc::now(),
        }
    }

    fn exercise(name: &str) -> ExerciseTemplate {
        ExerciseTemplate {
            id: Uuid::new_v4(),
            name: name.into(),
            primary_muscle_group: MuscleGroup::Legs,
            secondary_muscle_group: None,
            description: None,
            requires_weight: true,
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        cache: SuggestionCache,
        service: WorkoutService,
        member: User,
        trainer: User,
        other: User,
        squat: ExerciseTemplate,
        deadlift: ExerciseTemplate,
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::default();
        let clock = Arc::new(ManualClock::new(Utc.ymd(2024, 6, 3).and_hms(9, 0, 0)));
        let cache = SuggestionCache::new(clock.clone());
        let member = user("mia", &[Role::Member]);
        let trainer = user("theo", &[Role::Trainer]);
        let other = user("otto", &[Role::Member]);
        for u in &[&member, &trainer, &other] {
            store.insert_user(u).await.unwrap();
        }
        let squat = exercise("Squat");
        let deadlift = exercise("Deadlift");
        store.insert_exercise(&squat).await.unwrap();
        store.insert_exercise(&deadlift).await.unwrap();
        let service = WorkoutService::new(Arc::new(store), cache.clone(), clock.clone());
        Fixture { clock, cache, service, member, trainer, other, squat, deadlift }
    }

    fn request(name: &str, sets: Vec<WorkoutSetRequest>) -> WorkoutRequest {
        WorkoutRequest {
            member_id: None,
            trainer_id: None,
            name: name.into(),
            description: None,
            scheduled_date: None,
            date: None,
            notes: None,
            target_muscle_groups: None,
            sets: Some(sets),
        }
    }

    fn set(exercise: &ExerciseTemplate, reps: u32, weight: f64) -> WorkoutSetRequest {
        WorkoutSetRequest { exercise_id: exercise.id, reps, weight: Some(weight), notes: None }
    }

    #[test]
    fn completing_last_open_set_completes_workout() {
        let t = Utc.ymd(2024, 6, 3).and_hms(9, 0, 0);
        let squat = exercise("Squat");
        let mut w = Workout::new("legs", Uuid::new_v4(), t);
        for _ in 0..3 {
            w.sets.push(WorkoutSet::new(&squat, 5, Some(100.0), None));
        }
        let ids: Vec<Uuid> = w.sets.iter().map(|s| s.id).collect();

        w.complete_set(ids[0], t).unwrap();
        w.complete_set(ids[1], t).unwrap();
        assert!(!w.completed);
        assert_eq!(w.completed_date, None);

        let done_at = t + Duration::minutes(45);
        w.complete_set(ids[2], done_at).unwrap();
        assert!(w.completed);
        assert_eq!(w.completed_date, Some(done_at));

        // completing again does not move the timestamp
        w.complete_set(ids[2], done_at + Duration::minutes(5)).unwrap();
        assert_eq!(w.completed_date, Some(done_at));

        w.uncomplete_set(ids[1], done_at).unwrap();
        assert!(!w.completed);
        assert_eq!(w.completed_date, None);

        assert!(matches!(w.complete_set(Uuid::new_v4(), t), Err(AppError::NotFound(_))));
    }

    #[test]
    fn complete_all_forces_every_set() {
        let t = Utc::now();
        let mut empty = Workout::new("rest", Uuid::new_v4(), t);
        empty.complete_all(t);
        assert!(empty.completed);
        assert_eq!(empty.completed_date, Some(t));

        let squat = exercise("Squat");
        let mut w = Workout::new("legs", Uuid::new_v4(), t);
        w.sets.push(WorkoutSet::new(&squat, 5, Some(100.0), None));
        w.sets.push(WorkoutSet::new(&squat, 5, Some(100.0), None));
        w.complete_all(t);
        assert!(w.completed && w.sets.iter().all(|s| s.completed));
    }

    #[tokio::test]
    async fn create_then_complete_through_service() {
        let f = fixture().await;
        let w = f.service.create(&f.member, request("legs", vec![set(&f.squat, 5, 100.0), set(&f.squat, 5, 105.0)])).await.unwrap();
        assert_eq!(w.member_id, f.member.id);
        assert_eq!(w.scheduled_date, f.clock.now());
        assert_eq!(w.sets[0].exercise_name, "Squat");

        let w = f.service.complete_set(&f.member, w.id, w.sets[0].id).await.unwrap();
        assert!(!w.completed);
        f.clock.advance(Duration::minutes(30));
        let w = f.service.complete_set(&f.member, w.id, w.sets[1].id).await.unwrap();
        assert!(w.completed);
        assert_eq!(w.completed_date, Some(f.clock.now()));

        let stored = f.service.get(&f.member, w.id).await.unwrap();
        assert_eq!(stored, w);
    }

    #[tokio::test]
    async fn unknown_exercise_is_not_found() {
        let f = fixture().await;
        let bogus = exercise("Nope");
        let res = f.service.create(&f.member, request("legs", vec![set(&bogus, 5, 100.0)])).await;
        assert!(matches!(res, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn members_cannot_touch_other_members_workouts() {
        let f = fixture().await;
        let w = f.service.create(&f.member, request("legs", vec![set(&f.squat, 5, 100.0)])).await.unwrap();
        assert!(matches!(f.service.get(&f.other, w.id).await, Err(AppError::Forbidden(_))));
        assert!(matches!(f.service.delete(&f.other, w.id).await, Err(AppError::Forbidden(_))));

        let mut for_member = request("sneaky", vec![]);
        for_member.member_id = Some(f.member.id);
        assert!(matches!(f.service.create(&f.other, for_member).await, Err(AppError::Forbidden(_))));

        // asking for someone else's list falls back to your own
        assert!(f.service.list(&f.other, Some(f.member.id)).await.unwrap().is_empty());
        assert_eq!(f.service.list(&f.trainer, Some(f.member.id)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn trainer_creating_for_member_becomes_trainer() {
        let f = fixture().await;
        let mut req = request("assigned", vec![set(&f.deadlift, 3, 140.0)]);
        req.member_id = Some(f.member.id);
        let w = f.service.create(&f.trainer, req).await.unwrap();
        assert_eq!(w.trainer_id, Some(f.trainer.id));
        assert_eq!(w.member_id, f.member.id);
        // and may therefore edit it
        f.service.complete_workout(&f.trainer, w.id).await.unwrap();

        let own = f.service.create(&f.member, request("solo", vec![])).await.unwrap();
        assert!(matches!(f.service.complete_workout(&f.trainer, own.id).await, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn exercise_level_edits() {
        let f = fixture().await;
        let w = f.service.create(&f.member, request("pull", vec![set(&f.deadlift, 5, 120.0), set(&f.squat, 5, 90.0)])).await.unwrap();
        let w = f.service.complete_workout(&f.member, w.id).await.unwrap();
        assert!(w.completed);

        let add = WorkoutExerciseRequest {
            exercise_template_id: Some(f.deadlift.id),
            sets: vec![SetDto { reps: 3, weight: Some(130.0) }],
        };
        let w = f.service.add_exercise(&f.member, w.id, add).await.unwrap();
        assert_eq!(w.sets.len(), 3);
        // the new set is open, so the workout is no longer complete
        assert!(!w.completed);
        assert_eq!(w.completed_date, None);

        let replace = WorkoutExerciseRequest {
            exercise_template_id: None,
            sets: vec![SetDto { reps: 1, weight: Some(150.0) }],
        };
        let w = f.service.replace_exercise(&f.member, w.id, f.deadlift.id, replace).await.unwrap();
        let deadlift_sets: Vec<&WorkoutSet> = w.sets.iter().filter(|s| s.exercise_id == Some(f.deadlift.id)).collect();
        assert_eq!(deadlift_sets.len(), 1);
        assert_eq!(deadlift_sets[0].weight, Some(150.0));
        assert_eq!(w.sets.last().map(|s| s.exercise_id), Some(Some(f.deadlift.id)));

        let w = f.service.remove_exercise(&f.member, w.id, f.deadlift.id).await.unwrap();
        assert_eq!(w.sets.len(), 1);
        // only the completed squat set remains
        assert!(w.completed);

        let missing = WorkoutExerciseRequest { exercise_template_id: None, sets: vec![] };
        assert!(matches!(f.service.add_exercise(&f.member, w.id, missing).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn copy_update_and_date_queries() {
        let f = fixture().await;
        let w = f.service.create(&f.member, request("legs", vec![set(&f.squat, 5, 100.0)])).await.unwrap();
        let w = f.service.complete_workout(&f.member, w.id).await.unwrap();

        let next_week = NaiveDate::from_ymd(2024, 6, 10);
        let copy = f.service.copy(&f.member, w.id, next_week).await.unwrap();
        assert_ne!(copy.id, w.id);
        assert_ne!(copy.sets[0].id, w.sets[0].id);
        assert!(!copy.completed && !copy.sets[0].completed);
        assert_eq!(copy.scheduled_date, midnight(next_week));

        let in_range = f.service.list_between(&f.member, NaiveDate::from_ymd(2024, 6, 10), NaiveDate::from_ymd(2024, 6, 10)).await.unwrap();
        assert_eq!(in_range.iter().map(|w| w.id).collect::<Vec<_>>(), vec![copy.id]);
        assert!(matches!(
            f.service.list_between(&f.member, next_week, NaiveDate::from_ymd(2024, 6, 1)).await,
            Err(AppError::Validation(_))
        ));

        let mut upd = request("leg day", vec![set(&f.squat, 8, 80.0), set(&f.deadlift, 5, 120.0)]);
        upd.target_muscle_groups = Some(vec![MuscleGroup::Legs, MuscleGroup::Back].into_iter().collect());
        let updated = f.service.update(&f.member, w.id, upd).await.unwrap();
        assert_eq!(updated.name, "leg day");
        assert_eq!(updated.sets.len(), 2);
        assert!(!updated.completed);
        assert_eq!(updated.scheduled_date, w.scheduled_date);

        let back = f.service.list_by_muscle_group(&f.member, MuscleGroup::Back).await.unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].id, w.id);

        f.service.delete(&f.member, copy.id).await.unwrap();
        assert!(matches!(f.service.get(&f.member, copy.id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn writes_invalidate_member_suggestions() {
        let f = fixture().await;
        let key = SuggestionKey::Weekly { user_id: f.member.id };
        f.cache.put(key.clone(), CachedSuggestion::Weekly(vec!["squat more".into()]));
        f.service.create(&f.member, request("legs", vec![])).await.unwrap();
        assert_eq!(f.cache.get(&key), None);
    }
}
