use std::io;
use chrono::prelude::*;
use uuid::Uuid;
use gymkeeper::*;
use gymkeeper::api::*;
use gymkeeper::error::ErrorMsg;
use gymkeeper::auth::gen_keypair;
use gymkeeper::checkins::MAX_RECENT_LIMIT;
use gymkeeper::progression::{default_ramp, suggest_next_sets, Observation};
use gymkeeper::suggestions::MAX_HISTORY_DAYS;

const API_DOCS_TEMPLATE: &str = include_str!("../static/api-documentation.tera.md");
const OUTPUT_PATH: &str = "./README.md";
const SCHEMA_SQL: &str = include_str!("../sql/schema-postgresql.sql");

fn pretty<T: serde::Serialize>(value: &T) -> Result<String, io::Error> {
    serde_json::to_string_pretty(value).map_err(io::Error::from)
}

fn main() -> Result<(), io::Error> {
    let mut tera = tera::Tera::default();
    tera.add_raw_template("api-documentation.md", API_DOCS_TEMPLATE)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut ctx = tera::Context::new();
    let current_time = Utc::now().to_rfc2822();
    ctx.insert("current_time", &current_time);
    ctx.insert("version", env!("CARGO_PKG_VERSION"));
    ctx.insert("user_header", USER_HEADER);
    ctx.insert("sig_header", SIG_HEADER);
    ctx.insert("timestamp_header", TIMESTAMP_HEADER);
    ctx.insert("max_skew_secs", &auth::MAX_TIMESTAMP_SKEW_SECS);
    ctx.insert("schema_sql", SCHEMA_SQL);
    ctx.insert("max_history_days", &MAX_HISTORY_DAYS);
    ctx.insert("max_reps", &MAX_REPS);
    ctx.insert("max_recent", &MAX_RECENT_LIMIT);
    let groups: Vec<&str> = MuscleGroup::ALL.iter().map(|g| g.as_str()).collect();
    ctx.insert("muscle_groups", &groups);

    let member_id = Uuid::new_v4();
    let squat = ExerciseTemplate {
        id: Uuid::new_v4(),
        name: "Back Squat".to_string(),
        primary_muscle_group: MuscleGroup::Legs,
        secondary_muscle_group: None,
        description: Some("High bar back squat to depth".to_string()),
        requires_weight: true,
    };
    let bench = ExerciseTemplate {
        id: Uuid::new_v4(),
        name: "Bench Press".to_string(),
        primary_muscle_group: MuscleGroup::Chest,
        secondary_muscle_group: Some(MuscleGroup::Triceps),
        description: None,
        requires_weight: true,
    };
    ctx.insert("exercise_json", &pretty(&squat)?);

    let workout_req = WorkoutRequest {
        member_id: None,
        trainer_id: None,
        name: "Lower body A".to_string(),
        description: None,
        scheduled_date: None,
        date: Some(NaiveDate::from_ymd(2024, 6, 3)),
        notes: Some("keep rest under 3 minutes".to_string()),
        target_muscle_groups: Some(vec![MuscleGroup::Legs].into_iter().collect()),
        sets: Some(vec![
            WorkoutSetRequest { exercise_id: squat.id, reps: 5, weight: Some(100.0), notes: None },
            WorkoutSetRequest { exercise_id: squat.id, reps: 5, weight: Some(105.0), notes: None },
            WorkoutSetRequest { exercise_id: bench.id, reps: 8, weight: Some(60.0), notes: None },
        ]),
    };
    ctx.insert("workout_request_json", &pretty(&workout_req)?);

    let mut workout = Workout::new("Lower body A", member_id, midnight(NaiveDate::from_ymd(2024, 6, 3)));
    workout.notes = workout_req.notes.clone();
    workout.target_muscle_groups = workout_req.target_muscle_groups.clone().unwrap_or_default();
    workout.sets = vec![
        WorkoutSet::new(&squat, 5, Some(100.0), None),
        WorkoutSet::new(&squat, 5, Some(105.0), None),
        WorkoutSet::new(&bench, 8, Some(60.0), None),
    ];
    ctx.insert("workout_id", &workout.id);
    ctx.insert("set_id", &workout.sets[0].id);
    ctx.insert("exercise_id", &squat.id);
    ctx.insert("workout_response_json", &pretty(&WorkoutResponse::from(&workout))?);

    let add_exercise = WorkoutExerciseRequest {
        exercise_template_id: Some(bench.id),
        sets: vec![SetDto { reps: 8, weight: Some(60.0) }, SetDto { reps: 8, weight: Some(62.5) }],
    };
    ctx.insert("exercise_request_json", &pretty(&add_exercise)?);

    let history = [
        Observation { reps: 8, weight: Some(50.0), performed_at: Utc.ymd(2024, 5, 19).and_hms(18, 0, 0) },
        Observation { reps: 9, weight: Some(47.5), performed_at: Utc.ymd(2024, 5, 18).and_hms(18, 0, 0) },
        Observation { reps: 10, weight: Some(45.0), performed_at: Utc.ymd(2024, 5, 17).and_hms(18, 0, 0) },
    ];
    ctx.insert("suggestion_json", &pretty(&SuggestionResponse::from(suggest_next_sets(&history)))?);
    ctx.insert("default_suggestion_json", &pretty(&SuggestionResponse::from(default_ramp()))?);

    let weekly = vec![
        "Monday: Back Squat 3x5 at 107.5".to_string(),
        "Wednesday: Bench Press 3x8 at 62.5".to_string(),
    ];
    ctx.insert("weekly_json", &pretty(&weekly)?);

    let (_, public_key) = gen_keypair();
    let signup = SignupRequest {
        username: "mia".to_string(),
        email: "mia@example.com".to_string(),
        first_name: "Mia".to_string(),
        last_name: "Kowalski".to_string(),
        role: Some(Role::Member),
        public_key: base64::encode(&public_key[..]),
    };
    ctx.insert("signup_json", &pretty(&signup)?);
    let user = User {
        id: member_id,
        username: signup.username.clone(),
        email: signup.email.clone(),
        first_name: signup.first_name.clone(),
        last_name: signup.last_name.clone(),
        roles: vec![Role::Member].into_iter().collect(),
        active: false,
        assigned_trainer: None,
        public_key,
        created: Utc::now(),
    };
    ctx.insert("user_json", &pretty(&UserSummary::from(&user))?);

    let checkin = Checkin { id: Uuid::new_v4(), user_id: member_id, occurred_at: Utc.ymd(2024, 6, 3).and_hms(6, 45, 0) };
    ctx.insert("checkin_json", &pretty(&vec![CheckinResponse::from(&checkin)])?);

    let err = AppError::not_found("workout", workout.id);
    ctx.insert("error_json", &pretty(&ErrorMsg::from(&err))?);

    let api_docs = tera.render("api-documentation.md", &ctx)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    std::fs::write(OUTPUT_PATH, &api_docs)?;
    Ok(())
}
