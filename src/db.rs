use std::collections::BTreeSet;
use std::convert::TryInto;
use async_trait::async_trait;
use sqlx::Pool;
use sqlx::postgres::Postgres;
use sqlx::types::Json;
use chrono::prelude::*;
use uuid::Uuid;
use crate::auth::PublicKey;
use crate::store::Store;
use crate::{AppError, Checkin, ExerciseTemplate, MuscleGroup, Role, User, Workout, WorkoutSet};

type UserRow = (Uuid, String, String, String, String, Json<BTreeSet<Role>>, bool, Option<Uuid>, Vec<u8>, DateTime<Utc>);

type CheckinRow = (Uuid, Uuid, DateTime<Utc>);

type ExerciseRow = (Uuid, String, String, Option<String>, Option<String>, bool);

type WorkoutRow = (
    Uuid,
    Uuid,
    Option<Uuid>,
    String,
    Option<String>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    bool,
    Option<String>,
    Json<BTreeSet<MuscleGroup>>,
    Json<Vec<WorkoutSet>>,
);

const USER_COLUMNS: &str =
    "id, username, email, first_name, last_name, roles, active, assigned_trainer, key, created";

const EXERCISE_COLUMNS: &str =
    "id, name, primary_muscle_group, secondary_muscle_group, description, requires_weight";

const WORKOUT_COLUMNS: &str =
    "id, member_id, trainer_id, name, description, scheduled_date, completed_date, \
     completed, notes, target_muscle_groups, sets";

/// wrapper around postgres connection pool to encapsulate db-related functionality
#[derive(Clone)]
pub struct DataBase {
    pool: Pool<Postgres>,
}

fn user_from_row(row: UserRow) -> Result<User, AppError> {
    let (id, username, email, first_name, last_name, Json(roles), active, assigned_trainer, key, created) = row;
    let public_key: PublicKey = key.try_into()
        .map_err(|_| AppError::Unexpected(format!("stored public key for user {} is not 32 bytes", id)))?;
    Ok(User { id, username, email, first_name, last_name, roles, active, assigned_trainer, public_key, created })
}

fn exercise_from_row(row: ExerciseRow) -> Result<ExerciseTemplate, AppError> {
    let (id, name, primary, secondary, description, requires_weight) = row;
    Ok(ExerciseTemplate {
        id,
        name,
        primary_muscle_group: primary.parse::<MuscleGroup>()?,
        secondary_muscle_group: secondary.map(|s| s.parse::<MuscleGroup>()).transpose()?,
        description,
        requires_weight,
    })
}

fn workout_from_row(row: WorkoutRow) -> Workout {
    let (
        id, member_id, trainer_id, name, description, scheduled_date,
        completed_date, completed, notes, Json(target_muscle_groups), Json(sets),
    ) = row;
    Workout {
        id, member_id, trainer_id, name, description, scheduled_date,
        completed_date, completed, notes, target_muscle_groups, sets,
    }
}

fn checkin_from_row((id, user_id, occurred_at): CheckinRow) -> Checkin {
    Checkin { id, user_id, occurred_at }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|d| d.code())
        .map(|code| code == "23505")
        .unwrap_or(false)
}

impl DataBase {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = Pool::<Postgres>::connect(database_url).await?;
        Ok(Self { pool })
    }

    async fn fetch_workouts(&self, sql: &str, member_id: Uuid, range: Option<(DateTime<Utc>, DateTime<Utc>)>) -> Result<Vec<Workout>, AppError> {
        let mut query = sqlx::query_as::<_, WorkoutRow>(sql).bind(member_id);
        if let Some((start, end)) = range {
            query = query.bind(start).bind(end);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(workout_from_row).collect())
    }
}

#[async_trait]
impl Store for DataBase {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        let row: Option<UserRow> = sqlx::query_as(&format!("select {} from users where id = $1", USER_COLUMNS))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(user_from_row).transpose()
    }

    async fn insert_user(&self, user: &User) -> Result<(), AppError> {
        sqlx::query(
            "insert into users (id, username, email, first_name, last_name, roles, active, assigned_trainer, key, created) \
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             on conflict (id) do update set \
                username = excluded.username, email = excluded.email, \
                first_name = excluded.first_name, last_name = excluded.last_name, \
                roles = excluded.roles, active = excluded.active, \
                assigned_trainer = excluded.assigned_trainer, key = excluded.key")
            .bind(user.id)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(Json(&user.roles))
            .bind(user.active)
            .bind(user.assigned_trainer)
            .bind(&user.public_key[..])
            .bind(user.created)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::Validation(format!("username or email already taken: {} <{}>", user.username, user.email))
                } else {
                    AppError::from(e)
                }
            })?;
        Ok(())
    }

    async fn users_with_role(&self, role: Role, active_only: bool) -> Result<Vec<User>, AppError> {
        let sql = format!(
            "select {} from users where roles @> $1 and (active or not $2) order by username",
            USER_COLUMNS,
        );
        let rows: Vec<UserRow> = sqlx::query_as(&sql)
            .bind(Json([role]))
            .bind(active_only)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(user_from_row).collect()
    }

    async fn count_users(&self) -> Result<usize, AppError> {
        let (n,): (i64,) = sqlx::query_as("select count(*) from users")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn get_exercise(&self, exercise_id: Uuid) -> Result<Option<ExerciseTemplate>, AppError> {
        let row: Option<ExerciseRow> = sqlx::query_as(&format!("select {} from exercise_templates where id = $1", EXERCISE_COLUMNS))
            .bind(exercise_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(exercise_from_row).transpose()
    }

    async fn list_exercises(&self) -> Result<Vec<ExerciseTemplate>, AppError> {
        let rows: Vec<ExerciseRow> = sqlx::query_as(&format!("select {} from exercise_templates order by name", EXERCISE_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(exercise_from_row).collect()
    }

    async fn insert_exercise(&self, exercise: &ExerciseTemplate) -> Result<(), AppError> {
        sqlx::query(
            "insert into exercise_templates (id, name, primary_muscle_group, secondary_muscle_group, description, requires_weight) \
             values ($1, $2, $3, $4, $5, $6) \
             on conflict (id) do update set \
                name = excluded.name, primary_muscle_group = excluded.primary_muscle_group, \
                secondary_muscle_group = excluded.secondary_muscle_group, \
                description = excluded.description, requires_weight = excluded.requires_weight")
            .bind(exercise.id)
            .bind(&exercise.name)
            .bind(exercise.primary_muscle_group.as_str())
            .bind(exercise.secondary_muscle_group.map(|g| g.as_str()))
            .bind(&exercise.description)
            .bind(exercise.requires_weight)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::Validation(format!("exercise already exists: {}", exercise.name))
                } else {
                    AppError::from(e)
                }
            })?;
        Ok(())
    }

    async fn delete_exercise(&self, exercise_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("delete from exercise_templates where id = $1")
            .bind(exercise_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_workout(&self, workout_id: Uuid) -> Result<Option<Workout>, AppError> {
        let row: Option<WorkoutRow> = sqlx::query_as(&format!("select {} from workouts where id = $1", WORKOUT_COLUMNS))
            .bind(workout_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(workout_from_row))
    }

    async fn save_workout(&self, w: &Workout) -> Result<(), AppError> {
        sqlx::query(
            "insert into workouts (id, member_id, trainer_id, name, description, scheduled_date, \
                 completed_date, completed, notes, target_muscle_groups, sets) \
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             on conflict (id) do update set \
                member_id = excluded.member_id, trainer_id = excluded.trainer_id, \
                name = excluded.name, description = excluded.description, \
                scheduled_date = excluded.scheduled_date, completed_date = excluded.completed_date, \
                completed = excluded.completed, notes = excluded.notes, \
                target_muscle_groups = excluded.target_muscle_groups, sets = excluded.sets")
            .bind(w.id)
            .bind(w.member_id)
            .bind(w.trainer_id)
            .bind(&w.name)
            .bind(&w.description)
            .bind(w.scheduled_date)
            .bind(w.completed_date)
            .bind(w.completed)
            .bind(&w.notes)
            .bind(Json(&w.target_muscle_groups))
            .bind(Json(&w.sets))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_workout(&self, workout_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("delete from workouts where id = $1")
            .bind(workout_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn workouts_by_member(&self, member_id: Uuid) -> Result<Vec<Workout>, AppError> {
        let sql = format!(
            "select {} from workouts where member_id = $1 order by scheduled_date desc, id desc",
            WORKOUT_COLUMNS,
        );
        self.fetch_workouts(&sql, member_id, None).await
    }

    async fn workouts_by_member_between(
        &self,
        member_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Workout>, AppError> {
        let sql = format!(
            "select {} from workouts \
             where member_id = $1 and scheduled_date >= $2 and scheduled_date <= $3 \
             order by scheduled_date desc, id desc",
            WORKOUT_COLUMNS,
        );
        self.fetch_workouts(&sql, member_id, Some((start, end))).await
    }

    async fn count_workouts(&self) -> Result<usize, AppError> {
        let (n,): (i64,) = sqlx::query_as("select count(*) from workouts")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn insert_checkin(&self, checkin: &Checkin) -> Result<(), AppError> {
        sqlx::query("insert into checkins (id, user_id, occurred_at) values ($1, $2, $3)")
            .bind(checkin.id)
            .bind(checkin.user_id)
            .bind(checkin.occurred_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recent_checkins(&self, user_id: Option<Uuid>, limit: usize) -> Result<Vec<Checkin>, AppError> {
        let rows: Vec<CheckinRow> = sqlx::query_as(
            "select id, user_id, occurred_at from checkins \
             where ($1::uuid is null or user_id = $1) \
             order by occurred_at desc, id desc limit $2")
            .bind(user_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(checkin_from_row).collect())
    }

    async fn checkins_between(
        &self,
        user_id: Option<Uuid>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Checkin>, AppError> {
        let rows: Vec<CheckinRow> = sqlx::query_as(
            "select id, user_id, occurred_at from checkins \
             where ($1::uuid is null or user_id = $1) and occurred_at >= $2 and occurred_at <= $3 \
             order by occurred_at desc, id desc")
            .bind(user_id)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(checkin_from_row).collect())
    }
}
