use std::collections::BTreeSet;
use serde::{Serialize, Deserialize};
use chrono::prelude::*;
use uuid::Uuid;
use crate::aggregate::{aggregate, ExerciseAggregate};
use crate::progression::SuggestedSet;
use crate::{AppError, Checkin, MuscleGroup, Role, User, Workout, WorkoutSet};

pub const USER_HEADER       : &str = "x-gymkeeper-user";
pub const SIG_HEADER        : &str = "x-gymkeeper-access-signature";
pub const TIMESTAMP_HEADER  : &str = "x-gymkeeper-access-timestamp";

/// api response of both set-suggestion endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionResponse {
    pub sets: Vec<SuggestedSet>,
}

impl From<[SuggestedSet; 3]> for SuggestionResponse {
    fn from(sets: [SuggestedSet; 3]) -> Self {
        Self { sets: sets.to_vec() }
    }
}

/// query string of `GET /api/ai-workout/suggest/{exerciseId}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestQuery {
    #[serde(default)]
    pub history_days: Option<u32>,
}

/// one set in a `WorkoutRequest`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutSetRequest {
    pub exercise_id: Uuid,
    pub reps: u32,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// api request to create or update a workout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutRequest {
    /// defaults to the caller
    #[serde(default)]
    pub member_id: Option<Uuid>,
    #[serde(default)]
    pub trainer_id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// takes precedence over `date`
    #[serde(default)]
    pub scheduled_date: Option<DateTime<Utc>>,
    /// scheduled at midnight utc of this day
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub target_muscle_groups: Option<BTreeSet<MuscleGroup>>,
    /// on update, `None` keeps the existing sets
    #[serde(default)]
    pub sets: Option<Vec<WorkoutSetRequest>>,
}

/// upper bound on reps in a single set
pub const MAX_REPS: u32 = 1000;

pub fn validate_set(reps: u32, weight: Option<f64>) -> Result<(), AppError> {
    if reps == 0 {
        return Err(AppError::Validation("reps must be greater than zero".into()))
    }
    if reps > MAX_REPS {
        return Err(AppError::Validation(format!("reps must be at most {}, got {}", MAX_REPS, reps)))
    }
    match weight {
        Some(w) if !w.is_finite() || w < 0.0 => {
            Err(AppError::Validation(format!("weight must be a non-negative number, got {}", w)))
        }
        _ => Ok(()),
    }
}

impl WorkoutRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::Validation("workout name must not be empty".into()))
        }
        for set in self.sets.iter().flatten() {
            validate_set(set.reps, set.weight)?;
        }
        Ok(())
    }

    /// scheduled datetime requested, if any
    pub fn schedule(&self) -> Option<DateTime<Utc>> {
        self.scheduled_date.or_else(|| self.date.map(midnight))
    }
}

pub fn midnight(date: NaiveDate) -> DateTime<Utc> {
    DateTime::<Utc>::from_utc(date.and_hms(0, 0, 0), Utc)
}

/// start of `start` through the last instant of `end`, both days inclusive
pub fn day_range(start: NaiveDate, end: NaiveDate) -> Result<(DateTime<Utc>, DateTime<Utc>), AppError> {
    if start > end {
        return Err(AppError::Validation(format!("start {} is after end {}", start, end)))
    }
    let next = end.succ_opt()
        .ok_or_else(|| AppError::Validation(format!("date out of range: {}", end)))?;
    Ok((midnight(start), midnight(next) - chrono::Duration::nanoseconds(1)))
}

/// reps and weight of a set added through the exercise endpoints
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SetDto {
    pub reps: u32,
    #[serde(default)]
    pub weight: Option<f64>,
}

/// api request to add or replace the sets of one exercise in a workout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutExerciseRequest {
    /// required when adding; the path decides when replacing
    #[serde(default)]
    pub exercise_template_id: Option<Uuid>,
    #[serde(default)]
    pub sets: Vec<SetDto>,
}

impl WorkoutExerciseRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        for set in &self.sets {
            validate_set(set.reps, set.weight)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListWorkoutsQuery {
    #[serde(default)]
    pub member_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeQuery {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyWorkoutQuery {
    pub new_date: NaiveDate,
}

/// a set as listed in `WorkoutResponse::sets`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutSetResponse {
    pub id: Uuid,
    pub exercise_id: Option<Uuid>,
    pub exercise_name: String,
    pub reps: u32,
    pub weight: Option<f64>,
    pub notes: Option<String>,
    pub completed: bool,
    pub volume: f64,
}

impl<'a> From<&'a WorkoutSet> for WorkoutSetResponse {
    fn from(set: &'a WorkoutSet) -> Self {
        Self {
            id: set.id,
            exercise_id: set.exercise_id,
            exercise_name: set.exercise_name.clone(),
            reps: set.reps,
            weight: set.weight,
            notes: set.notes.clone(),
            completed: set.completed,
            volume: set.volume(),
        }
    }
}

/// api representation of a workout: raw sets plus the per-exercise rollup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutResponse {
    pub id: Uuid,
    pub member_id: Uuid,
    pub trainer_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub sets: Vec<WorkoutSetResponse>,
    pub exercises: Vec<ExerciseAggregate>,
    pub scheduled_date: DateTime<Utc>,
    pub date: NaiveDate,
    pub day_of_week: String,
    pub completed_date: Option<DateTime<Utc>>,
    pub completed: bool,
    pub notes: Option<String>,
    pub target_muscle_groups: BTreeSet<MuscleGroup>,
}

fn day_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MONDAY",
        Weekday::Tue => "TUESDAY",
        Weekday::Wed => "WEDNESDAY",
        Weekday::Thu => "THURSDAY",
        Weekday::Fri => "FRIDAY",
        Weekday::Sat => "SATURDAY",
        Weekday::Sun => "SUNDAY",
    }
}

impl<'a> From<&'a Workout> for WorkoutResponse {
    fn from(w: &'a Workout) -> Self {
        let date = w.scheduled_date.date().naive_utc();
        Self {
            id: w.id,
            member_id: w.member_id,
            trainer_id: w.trainer_id,
            name: w.name.clone(),
            description: w.description.clone(),
            sets: w.sets.iter().map(WorkoutSetResponse::from).collect(),
            exercises: aggregate(&w.sets),
            scheduled_date: w.scheduled_date,
            date,
            day_of_week: day_name(date.weekday()).to_string(),
            completed_date: w.completed_date,
            completed: w.completed,
            notes: w.notes.clone(),
            target_muscle_groups: w.target_muscle_groups.clone(),
        }
    }
}

/// api response of `GET /api/users/me`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub roles: BTreeSet<Role>,
    pub active: bool,
    pub assigned_trainer: Option<Uuid>,
}

impl<'a> From<&'a User> for UserSummary {
    fn from(u: &'a User) -> Self {
        Self {
            id: u.id,
            username: u.username.clone(),
            email: u.email.clone(),
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
            roles: u.roles.clone(),
            active: u.active,
            assigned_trainer: u.assigned_trainer,
        }
    }
}

fn is_email(s: &str) -> bool {
    let mut parts = s.splitn(2, '@');
    match (parts.next(), parts.next()) {
        (Some(local), Some(domain)) => !local.is_empty() && domain.contains('.') && !domain.contains('@'),
        _ => false,
    }
}

/// api request of `POST /api/auth/signup`
///
/// The caller generates its own ed25519 keypair and registers the public half
/// (base64). New accounts are inactive until an admin activates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// `member` unless given; `admin` is refused
    #[serde(default)]
    pub role: Option<Role>,
    pub public_key: String,
}

impl SignupRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.username.trim().is_empty() {
            return Err(AppError::Validation("username must not be empty".into()))
        }
        if !is_email(self.email.trim()) {
            return Err(AppError::Validation(format!("invalid email: {}", self.email)))
        }
        if self.role == Some(Role::Admin) {
            return Err(AppError::Validation("admin accounts cannot be created by signup".into()))
        }
        Ok(())
    }
}

/// api request of `PUT /api/users/profile`, absent fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRequest {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl ProfileRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        match &self.email {
            Some(email) if !is_email(email.trim()) => {
                Err(AppError::Validation(format!("invalid email: {}", email)))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignTrainerRequest {
    pub trainer_id: Uuid,
}

/// api request to create or update an exercise template
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseRequest {
    pub name: String,
    pub primary_muscle_group: MuscleGroup,
    #[serde(default)]
    pub secondary_muscle_group: Option<MuscleGroup>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_requires_weight")]
    pub requires_weight: bool,
}

fn default_requires_weight() -> bool {
    true
}

impl ExerciseRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::Validation("exercise name must not be empty".into()))
        }
        Ok(())
    }
}

/// query string of `POST /api/checkins`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckinQuery {
    #[serde(default)]
    pub user_id: Option<Uuid>,
    /// defaults to now
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentCheckinsQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckinRangeQuery {
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckinResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

impl<'a> From<&'a Checkin> for CheckinResponse {
    fn from(c: &'a Checkin) -> Self {
        Self { id: c.id, user_id: c.user_id, occurred_at: c.occurred_at }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[allow(unused)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExerciseTemplate};

    #[test]
    fn workout_response_embeds_sets_and_exercise_rollup() {
        let bench = ExerciseTemplate {
            id: Uuid::new_v4(),
            name: "Bench Press".into(),
            primary_muscle_group: MuscleGroup::Chest,
            secondary_muscle_group: None,
            description: None,
            requires_weight: true,
        };
        let scheduled = Utc.ymd(2024, 6, 3).and_hms(17, 30, 0); // a monday
        let mut w = Workout::new("push", Uuid::new_v4(), scheduled);
        w.sets.push(WorkoutSet::new(&bench, 8, Some(60.0), None));
        w.sets.push(WorkoutSet::new(&bench, 6, Some(70.0), None));

        let resp = WorkoutResponse::from(&w);
        assert_eq!(resp.sets.len(), 2);
        assert_eq!(resp.sets[1].volume, 420.0);
        assert_eq!(resp.exercises.len(), 1);
        assert_eq!(resp.exercises[0].total_volume, 900.0);
        assert_eq!(resp.date, NaiveDate::from_ymd(2024, 6, 3));
        assert_eq!(resp.day_of_week, "MONDAY");

        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("exercises").is_some());
        assert!(json.get("dayOfWeek").is_some());
        assert_eq!(json["exercises"][0]["totalVolume"], 900.0);
    }

    #[test]
    fn workout_request_validation() {
        let parse = |s: &str| serde_json::from_str::<WorkoutRequest>(s).unwrap();
        let ok = parse(r#"{"name":"legs","date":"2024-06-03","sets":[{"exerciseId":"3a2cbc79-00e5-4598-a5b2-74c5059724af","reps":5,"weight":100}]}"#);
        assert!(ok.validate().is_ok());
        assert_eq!(ok.schedule(), Some(Utc.ymd(2024, 6, 3).and_hms(0, 0, 0)));

        let blank = parse(r#"{"name":"  "}"#);
        assert!(matches!(blank.validate(), Err(AppError::Validation(_))));
        assert_eq!(blank.schedule(), None);

        let zero_reps = parse(r#"{"name":"legs","sets":[{"exerciseId":"3a2cbc79-00e5-4598-a5b2-74c5059724af","reps":0}]}"#);
        assert!(matches!(zero_reps.validate(), Err(AppError::Validation(_))));

        let negative = parse(r#"{"name":"legs","sets":[{"exerciseId":"3a2cbc79-00e5-4598-a5b2-74c5059724af","reps":5,"weight":-2.5}]}"#);
        assert!(matches!(negative.validate(), Err(AppError::Validation(_))));

        let huge = parse(r#"{"name":"legs","sets":[{"exerciseId":"3a2cbc79-00e5-4598-a5b2-74c5059724af","reps":4294967295}]}"#);
        assert!(matches!(huge.validate(), Err(AppError::Validation(_))));
        assert!(validate_set(MAX_REPS, None).is_ok());
        assert!(matches!(validate_set(MAX_REPS + 1, None), Err(AppError::Validation(_))));
    }

    #[test]
    fn signup_and_profile_validation() {
        let parse = |s: &str| serde_json::from_str::<SignupRequest>(s).unwrap();
        let ok = parse(r#"{"username":"mia","email":"mia@example.com","firstName":"Mia","lastName":"K","publicKey":"AAAA"}"#);
        assert!(ok.validate().is_ok());
        assert_eq!(ok.role, None);

        let trainer = parse(r#"{"username":"tom","email":"tom@example.com","firstName":"Tom","lastName":"K","role":"trainer","publicKey":"AAAA"}"#);
        assert_eq!(trainer.role, Some(Role::Trainer));

        let admin = SignupRequest { role: Some(Role::Admin), ..ok.clone() };
        assert!(matches!(admin.validate(), Err(AppError::Validation(_))));
        let blank = SignupRequest { username: " ".into(), ..ok.clone() };
        assert!(matches!(blank.validate(), Err(AppError::Validation(_))));
        for email in &["mia", "@example.com", "mia@localhost", "a@b@c.com"] {
            let bad = SignupRequest { email: email.to_string(), ..ok.clone() };
            assert!(matches!(bad.validate(), Err(AppError::Validation(_))), "{}", email);
        }

        assert!(ProfileRequest::default().validate().is_ok());
        let bad = ProfileRequest { email: Some("nope".into()), ..Default::default() };
        assert!(matches!(bad.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn exercise_request_defaults_to_weighted() {
        let req: ExerciseRequest = serde_json::from_str(r#"{"name":"Dips","primaryMuscleGroup":"triceps"}"#).unwrap();
        assert!(req.requires_weight);
        assert_eq!(req.secondary_muscle_group, None);
        assert!(req.validate().is_ok());
        let blank: ExerciseRequest = serde_json::from_str(r#"{"name":"","primaryMuscleGroup":"abs"}"#).unwrap();
        assert!(matches!(blank.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn day_range_covers_whole_days() {
        let d = |day| NaiveDate::from_ymd(2024, 6, day);
        let (from, to) = day_range(d(3), d(4)).unwrap();
        assert_eq!(from, Utc.ymd(2024, 6, 3).and_hms(0, 0, 0));
        assert_eq!(to, Utc.ymd(2024, 6, 4).and_hms_nano(23, 59, 59, 999_999_999));
        assert!(day_range(d(3), d(3)).is_ok());
        assert!(matches!(day_range(d(4), d(3)), Err(AppError::Validation(_))));
        assert!(matches!(day_range(d(1), chrono::naive::MAX_DATE), Err(AppError::Validation(_))));
    }

    #[test]
    fn suggestion_response_shape() {
        let resp = SuggestionResponse::from(crate::progression::default_ramp());
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"sets":[{"reps":10,"weight":20.0},{"reps":9,"weight":22.5},{"reps":8,"weight":25.0}]}"#);
    }
}
