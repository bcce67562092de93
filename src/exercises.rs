use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use crate::api::ExerciseRequest;
use crate::policy;
use crate::store::Store;
use crate::{AppError, ExerciseTemplate, MuscleGroup, Role, User};

/// roles allowed to edit the exercise catalogue
const EDITORS: [Role; 2] = [Role::Admin, Role::Trainer];

/// exercise template catalogue; everyone reads, staff edit
#[derive(Clone)]
pub struct ExerciseService {
    store: Arc<dyn Store>,
}

fn template(id: Uuid, req: ExerciseRequest) -> ExerciseTemplate {
    ExerciseTemplate {
        id,
        name: req.name.trim().to_string(),
        primary_muscle_group: req.primary_muscle_group,
        secondary_muscle_group: req.secondary_muscle_group,
        description: req.description,
        requires_weight: req.requires_weight,
    }
}

impl ExerciseService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn list(&self) -> Result<Vec<ExerciseTemplate>, AppError> {
        self.store.list_exercises().await
    }

    pub async fn get(&self, exercise_id: Uuid) -> Result<ExerciseTemplate, AppError> {
        self.store.get_exercise(exercise_id).await?
            .ok_or_else(|| AppError::not_found("exercise", exercise_id))
    }

    /// templates training `group` as either their primary or secondary muscle group
    pub async fn by_muscle_group(&self, group: MuscleGroup) -> Result<Vec<ExerciseTemplate>, AppError> {
        let all = self.store.list_exercises().await?;
        Ok(all.into_iter()
            .filter(|e| e.primary_muscle_group == group || e.secondary_muscle_group == Some(group))
            .collect())
    }

    pub async fn create(&self, actor: &User, req: ExerciseRequest) -> Result<ExerciseTemplate, AppError> {
        policy::require_role(actor, &EDITORS)?;
        req.validate()?;
        let exercise = template(Uuid::new_v4(), req);
        self.store.insert_exercise(&exercise).await?;
        info!(exercise_id = %exercise.id, name = %exercise.name, user_id = %actor.id, "exercise created");
        Ok(exercise)
    }

    pub async fn update(&self, actor: &User, exercise_id: Uuid, req: ExerciseRequest) -> Result<ExerciseTemplate, AppError> {
        policy::require_role(actor, &EDITORS)?;
        req.validate()?;
        self.get(exercise_id).await?;
        let exercise = template(exercise_id, req);
        self.store.insert_exercise(&exercise).await?;
        Ok(exercise)
    }

    /// workouts keep the exercise name already copied into their sets
    pub async fn delete(&self, actor: &User, exercise_id: Uuid) -> Result<(), AppError> {
        policy::require_role(actor, &EDITORS)?;
        if !self.store.delete_exercise(exercise_id).await? {
            return Err(AppError::not_found("exercise", exercise_id))
        }
        info!(%exercise_id, user_id = %actor.id, "exercise deleted");
        Ok(())
    }

    /// creates each template in turn, skipping the ones that fail
    pub async fn bulk_create(&self, actor: &User, reqs: Vec<ExerciseRequest>) -> Result<Vec<ExerciseTemplate>, AppError> {
        policy::require_role(actor, &EDITORS)?;
        let n_requested = reqs.len();
        let mut created = Vec::with_capacity(n_requested);
        for req in reqs {
            let name = req.name.clone();
            match self.create(actor, req).await {
                Ok(exercise) => created.push(exercise),
                Err(e) => warn!(%name, error = %e, "skipping exercise in bulk create"),
            }
        }
        info!(n_requested, n_created = created.len(), "bulk exercise create");
        Ok(created)
    }
}

#[allow(unused)]
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::store::MemoryStore;

    fn account(role: Role) -> User {
        User {
            id: Uuid::new_v4(),
            username: format!("{:?}", role).to_lowercase(),
            email: format!("{:?}@example.com", role).to_lowercase(),
            first_name: "Test".into(),
            last_name: "User".into(),
            roles: vec![role].into_iter().collect(),
            active: true,
            assigned_trainer: None,
            public_key: [0u8; 32],
            created: Utc::now(),
        }
    }

    fn request(name: &str, primary: MuscleGroup, secondary: Option<MuscleGroup>) -> ExerciseRequest {
        ExerciseRequest {
            name: name.into(),
            primary_muscle_group: primary,
            secondary_muscle_group: secondary,
            description: None,
            requires_weight: true,
        }
    }

    fn service() -> ExerciseService {
        ExerciseService::new(Arc::new(MemoryStore::default()))
    }

    #[tokio::test]
    async fn staff_manage_the_catalogue() {
        let svc = service();
        let trainer = account(Role::Trainer);
        let admin = account(Role::Admin);
        let member = account(Role::Member);

        let dips = svc.create(&trainer, request(" Dips ", MuscleGroup::Triceps, Some(MuscleGroup::Chest))).await.unwrap();
        assert_eq!(dips.name, "Dips");
        assert_eq!(svc.get(dips.id).await.unwrap(), dips);
        assert!(matches!(
            svc.create(&member, request("Curl", MuscleGroup::Biceps, None)).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            svc.create(&admin, request("Dips", MuscleGroup::Triceps, None)).await,
            Err(AppError::Validation(_))
        ));

        let mut edit = request("Bench Dips", MuscleGroup::Triceps, None);
        edit.requires_weight = false;
        let updated = svc.update(&admin, dips.id, edit).await.unwrap();
        assert_eq!(updated.id, dips.id);
        assert!(!updated.requires_weight);
        assert_eq!(svc.list().await.unwrap(), vec![updated]);
        assert!(matches!(
            svc.update(&admin, Uuid::new_v4(), request("Ghost", MuscleGroup::Abs, None)).await,
            Err(AppError::NotFound(_))
        ));

        assert!(matches!(svc.delete(&member, dips.id).await, Err(AppError::Forbidden(_))));
        svc.delete(&trainer, dips.id).await.unwrap();
        assert!(matches!(svc.delete(&trainer, dips.id).await, Err(AppError::NotFound(_))));
        assert!(matches!(svc.get(dips.id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn muscle_group_matches_primary_or_secondary() {
        let svc = service();
        let admin = account(Role::Admin);
        svc.create(&admin, request("Bench Press", MuscleGroup::Chest, Some(MuscleGroup::Triceps))).await.unwrap();
        svc.create(&admin, request("Skull Crusher", MuscleGroup::Triceps, None)).await.unwrap();
        svc.create(&admin, request("Squat", MuscleGroup::Legs, None)).await.unwrap();

        let names = |es: Vec<ExerciseTemplate>| es.into_iter().map(|e| e.name).collect::<Vec<_>>();
        assert_eq!(names(svc.by_muscle_group(MuscleGroup::Triceps).await.unwrap()), vec!["Bench Press", "Skull Crusher"]);
        assert_eq!(names(svc.by_muscle_group(MuscleGroup::Chest).await.unwrap()), vec!["Bench Press"]);
        assert!(svc.by_muscle_group(MuscleGroup::Forearms).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bulk_create_skips_failures() {
        let svc = service();
        let admin = account(Role::Admin);
        let reqs = vec![
            request("Row", MuscleGroup::Back, None),
            request("", MuscleGroup::Back, None),
            request("Row", MuscleGroup::Back, None),
            request("Plank", MuscleGroup::Abs, None),
        ];
        let created = svc.bulk_create(&admin, reqs).await.unwrap();
        let names: Vec<&str> = created.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Row", "Plank"]);
        assert!(matches!(svc.bulk_create(&account(Role::Member), Vec::new()).await, Err(AppError::Forbidden(_))));
    }
}
