use std::convert::Infallible;
use std::sync::Arc;
use bytes::Bytes;
use http::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, error};
use uuid::Uuid;
use warp::{Filter, Rejection, Reply, filters::path::FullPath};
use crate::api::{
    AssignTrainerRequest, CheckinQuery, CheckinRangeQuery, CheckinResponse, CopyWorkoutQuery,
    DateRangeQuery, ExerciseRequest, HealthResponse, ListWorkoutsQuery, ProfileRequest,
    RecentCheckinsQuery, SignupRequest, SuggestQuery, UserSummary, WorkoutExerciseRequest,
    WorkoutRequest, WorkoutResponse,
};
use crate::auth;
use crate::cache::Clock;
use crate::checkins::CheckinService;
use crate::error::ErrorMsg;
use crate::exercises::ExerciseService;
use crate::store::Store;
use crate::suggestions::SuggestionService;
use crate::users::UserService;
use crate::workouts::WorkoutService;
use crate::{AppError, Checkin, MuscleGroup, User, Workout};

/// everything a request handler needs, cloned into each request
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub workouts: WorkoutService,
    pub suggestions: SuggestionService,
    pub users: UserService,
    pub exercises: ExerciseService,
    pub checkins: CheckinService,
}

impl AppState {
    /// every service over the same store and clock
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, workouts: WorkoutService, suggestions: SuggestionService) -> Self {
        Self {
            users: UserService::new(store.clone(), clock.clone()),
            exercises: ExerciseService::new(store.clone()),
            checkins: CheckinService::new(store.clone(), clock.clone()),
            store,
            clock,
            workouts,
            suggestions,
        }
    }
}

/// the authenticated user of a request along with its raw body
pub struct Caller {
    pub user: User,
    body: Bytes,
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("failed to parse json body: {}", e)))
}

impl Caller {
    fn json<T: DeserializeOwned>(&self) -> Result<T, AppError> {
        parse_json(&self.body[..])
    }
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// the query string as sent, or "" when there is none
fn raw_query() -> impl Filter<Extract = (String,), Error = Infallible> + Clone {
    warp::query::raw()
        .or(warp::any().map(String::new))
        .unify()
}

/// rebuilds the incoming request so its signature can be checked over the exact bytes sent
fn http_request() -> impl Filter<Extract = (http::Request<Bytes>,), Error = Rejection> + Clone {
    warp::any()
        .and(warp::method())
        .and(warp::filters::path::full())
        .and(raw_query())
        .and(warp::header::headers_cloned())
        .and(warp::body::bytes())
        .and_then(|method: http::Method, path: FullPath, query: String, headers: http::HeaderMap, body: Bytes| async move {
            let path_and_query = if query.is_empty() {
                path.as_str().to_string()
            } else {
                format!("{}?{}", path.as_str(), query)
            };
            let uri = http::uri::Builder::new()
                .path_and_query(path_and_query.as_str())
                .build()
                .map_err(|e| AppError::Validation(format!("invalid uri: {}", e)))?;

            let mut request = http::Request::builder()
                .method(method)
                .uri(uri)
                .body(body)
                .map_err(|e| AppError::Validation(format!("invalid request: {}", e)))?;

            *request.headers_mut() = headers;

            Ok::<http::Request<Bytes>, Rejection>(request)
        })
}

fn authenticated(state: AppState) -> impl Filter<Extract = (AppState, Caller), Error = Rejection> + Clone {
    with_state(state)
        .and(http_request())
        .and_then(|state: AppState, req: http::Request<Bytes>| async move {
            let user = auth::authenticate(state.store.as_ref(), &req, state.clock.now()).await?;
            debug!(user_id = %user.id, method = %req.method(), path = %req.uri(), "authenticated request");
            let caller = Caller { user, body: req.into_body() };
            Ok::<(AppState, Caller), Rejection>((state, caller))
        })
        .untuple_one()
}

fn workout_json(w: &Workout) -> warp::reply::Json {
    warp::reply::json(&WorkoutResponse::from(w))
}

fn workouts_json(ws: &[Workout]) -> warp::reply::Json {
    let items: Vec<WorkoutResponse> = ws.iter().map(WorkoutResponse::from).collect();
    warp::reply::json(&items)
}

fn user_json(u: &User) -> warp::reply::Json {
    warp::reply::json(&UserSummary::from(u))
}

fn users_json(us: &[User]) -> warp::reply::Json {
    let items: Vec<UserSummary> = us.iter().map(UserSummary::from).collect();
    warp::reply::json(&items)
}

fn checkins_json(cs: &[Checkin]) -> warp::reply::Json {
    let items: Vec<CheckinResponse> = cs.iter().map(CheckinResponse::from).collect();
    warp::reply::json(&items)
}

// suggestions

async fn suggest(exercise_id: Uuid, query: SuggestQuery, state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    let resp = state.suggestions.suggested_parameters(&caller.user, exercise_id, query.history_days).await?;
    Ok(warp::reply::json(&resp))
}

async fn progressive_overload(exercise_id: Uuid, state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    let resp = state.suggestions.progressive_overload(&caller.user, exercise_id).await?;
    Ok(warp::reply::json(&resp))
}

async fn weekly_suggestions(state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    let lines = state.suggestions.weekly_suggestions(&caller.user).await?;
    Ok(warp::reply::json(&lines))
}

// workouts

async fn list_workouts(query: ListWorkoutsQuery, state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    let ws = state.workouts.list(&caller.user, query.member_id).await?;
    Ok(workouts_json(&ws))
}

async fn workouts_by_date_range(query: DateRangeQuery, state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    let ws = state.workouts.list_between(&caller.user, query.start_date, query.end_date).await?;
    Ok(workouts_json(&ws))
}

async fn workouts_by_muscle_group(group: String, state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    let group: MuscleGroup = group.parse()?;
    let ws = state.workouts.list_by_muscle_group(&caller.user, group).await?;
    Ok(workouts_json(&ws))
}

async fn get_workout(workout_id: Uuid, state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    let w = state.workouts.get(&caller.user, workout_id).await?;
    Ok(workout_json(&w))
}

async fn create_workout(state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    let req: WorkoutRequest = caller.json()?;
    let w = state.workouts.create(&caller.user, req).await?;
    Ok(warp::reply::with_status(workout_json(&w), StatusCode::CREATED))
}

async fn update_workout(workout_id: Uuid, state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    let req: WorkoutRequest = caller.json()?;
    let w = state.workouts.update(&caller.user, workout_id, req).await?;
    Ok(workout_json(&w))
}

async fn delete_workout(workout_id: Uuid, state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    state.workouts.delete(&caller.user, workout_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn copy_workout(workout_id: Uuid, query: CopyWorkoutQuery, state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    let w = state.workouts.copy(&caller.user, workout_id, query.new_date).await?;
    Ok(warp::reply::with_status(workout_json(&w), StatusCode::CREATED))
}

async fn add_exercise(workout_id: Uuid, state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    let req: WorkoutExerciseRequest = caller.json()?;
    let w = state.workouts.add_exercise(&caller.user, workout_id, req).await?;
    Ok(workout_json(&w))
}

async fn replace_exercise(workout_id: Uuid, exercise_id: Uuid, state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    let req: WorkoutExerciseRequest = caller.json()?;
    let w = state.workouts.replace_exercise(&caller.user, workout_id, exercise_id, req).await?;
    Ok(workout_json(&w))
}

async fn remove_exercise(workout_id: Uuid, exercise_id: Uuid, state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    let w = state.workouts.remove_exercise(&caller.user, workout_id, exercise_id).await?;
    Ok(workout_json(&w))
}

async fn complete_set(workout_id: Uuid, set_id: Uuid, state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    let w = state.workouts.complete_set(&caller.user, workout_id, set_id).await?;
    Ok(workout_json(&w))
}

async fn uncomplete_set(workout_id: Uuid, set_id: Uuid, state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    let w = state.workouts.uncomplete_set(&caller.user, workout_id, set_id).await?;
    Ok(workout_json(&w))
}

async fn complete_workout(workout_id: Uuid, state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    let w = state.workouts.complete_workout(&caller.user, workout_id).await?;
    Ok(workout_json(&w))
}

// exercise templates

async fn list_exercises(state: AppState, _caller: Caller) -> Result<impl Reply, Rejection> {
    let exercises = state.exercises.list().await?;
    Ok(warp::reply::json(&exercises))
}

async fn get_exercise(exercise_id: Uuid, state: AppState, _caller: Caller) -> Result<impl Reply, Rejection> {
    let exercise = state.exercises.get(exercise_id).await?;
    Ok(warp::reply::json(&exercise))
}

async fn exercises_by_muscle_group(group: String, state: AppState, _caller: Caller) -> Result<impl Reply, Rejection> {
    let group: MuscleGroup = group.parse()?;
    let exercises = state.exercises.by_muscle_group(group).await?;
    Ok(warp::reply::json(&exercises))
}

async fn create_exercise(state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    let req: ExerciseRequest = caller.json()?;
    let exercise = state.exercises.create(&caller.user, req).await?;
    Ok(warp::reply::with_status(warp::reply::json(&exercise), StatusCode::CREATED))
}

async fn bulk_create_exercises(state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    let reqs: Vec<ExerciseRequest> = caller.json()?;
    let created = state.exercises.bulk_create(&caller.user, reqs).await?;
    Ok(warp::reply::with_status(warp::reply::json(&created), StatusCode::CREATED))
}

async fn update_exercise(exercise_id: Uuid, state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    let req: ExerciseRequest = caller.json()?;
    let exercise = state.exercises.update(&caller.user, exercise_id, req).await?;
    Ok(warp::reply::json(&exercise))
}

async fn delete_exercise(exercise_id: Uuid, state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    state.exercises.delete(&caller.user, exercise_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// users

async fn signup(state: AppState, body: Bytes) -> Result<impl Reply, Rejection> {
    let req: SignupRequest = parse_json(&body[..])?;
    let user = state.users.signup(req).await?;
    Ok(warp::reply::with_status(user_json(&user), StatusCode::CREATED))
}

async fn me(_state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    Ok(user_json(&caller.user))
}

async fn get_user(user_id: Uuid, state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    let user = state.users.get(&caller.user, user_id).await?;
    Ok(user_json(&user))
}

async fn list_trainers(state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    let users = state.users.list_trainers(&caller.user).await?;
    Ok(users_json(&users))
}

async fn list_members(state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    let users = state.users.list_members(&caller.user).await?;
    Ok(users_json(&users))
}

async fn activate_user(user_id: Uuid, state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    let user = state.users.set_active(&caller.user, user_id, true).await?;
    Ok(user_json(&user))
}

async fn deactivate_user(user_id: Uuid, state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    let user = state.users.set_active(&caller.user, user_id, false).await?;
    Ok(user_json(&user))
}

async fn assign_trainer(member_id: Uuid, state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    let req: AssignTrainerRequest = caller.json()?;
    let member = state.users.assign_trainer(&caller.user, member_id, req.trainer_id).await?;
    Ok(user_json(&member))
}

async fn update_profile(state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    let req: ProfileRequest = caller.json()?;
    let user = state.users.update_profile(&caller.user, req).await?;
    Ok(user_json(&user))
}

// check-ins

async fn check_in(query: CheckinQuery, state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    let checkin = state.checkins.check_in(&caller.user, query.user_id, query.occurred_at).await?;
    Ok(warp::reply::with_status(warp::reply::json(&CheckinResponse::from(&checkin)), StatusCode::CREATED))
}

async fn recent_checkins(query: RecentCheckinsQuery, state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    let checkins = state.checkins.recent(&caller.user, query.user_id, query.limit).await?;
    Ok(checkins_json(&checkins))
}

async fn checkins_between(query: CheckinRangeQuery, state: AppState, caller: Caller) -> Result<impl Reply, Rejection> {
    let checkins = state.checkins.between(&caller.user, query.start, query.end, query.user_id).await?;
    Ok(checkins_json(&checkins))
}

fn suggestion_routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let suggest = warp::path!("api" / "ai-workout" / "suggest" / Uuid)
        .and(warp::get())
        .and(warp::query::<SuggestQuery>())
        .and(authenticated(state.clone()))
        .and_then(suggest);

    let progressive = warp::path!("api" / "ai-workout" / "progressive-overload" / Uuid)
        .and(warp::get())
        .and(authenticated(state.clone()))
        .and_then(progressive_overload);

    let weekly = warp::path!("api" / "ai-workout" / "weekly-suggestions")
        .and(warp::get())
        .and(authenticated(state))
        .and_then(weekly_suggestions);

    suggest.or(progressive).or(weekly)
}

fn workout_routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let list = warp::path!("api" / "workouts")
        .and(warp::get())
        .and(warp::query::<ListWorkoutsQuery>())
        .and(authenticated(state.clone()))
        .and_then(list_workouts);

    let by_date_range = warp::path!("api" / "workouts" / "by-date-range")
        .and(warp::get())
        .and(warp::query::<DateRangeQuery>())
        .and(authenticated(state.clone()))
        .and_then(workouts_by_date_range);

    let by_muscle_group = warp::path!("api" / "workouts" / "by-muscle-group" / String)
        .and(warp::get())
        .and(authenticated(state.clone()))
        .and_then(workouts_by_muscle_group);

    let get = warp::path!("api" / "workouts" / Uuid)
        .and(warp::get())
        .and(authenticated(state.clone()))
        .and_then(get_workout);

    let create = warp::path!("api" / "workouts")
        .and(warp::post())
        .and(authenticated(state.clone()))
        .and_then(create_workout);

    let update = warp::path!("api" / "workouts" / Uuid)
        .and(warp::put())
        .and(authenticated(state.clone()))
        .and_then(update_workout);

    let delete = warp::path!("api" / "workouts" / Uuid)
        .and(warp::delete())
        .and(authenticated(state.clone()))
        .and_then(delete_workout);

    let copy = warp::path!("api" / "workouts" / Uuid / "copy")
        .and(warp::post())
        .and(warp::query::<CopyWorkoutQuery>())
        .and(authenticated(state.clone()))
        .and_then(copy_workout);

    let add_ex = warp::path!("api" / "workouts" / Uuid / "exercises")
        .and(warp::post())
        .and(authenticated(state.clone()))
        .and_then(add_exercise);

    let replace_ex = warp::path!("api" / "workouts" / Uuid / "exercises" / Uuid)
        .and(warp::put())
        .and(authenticated(state.clone()))
        .and_then(replace_exercise);

    let remove_ex = warp::path!("api" / "workouts" / Uuid / "exercises" / Uuid)
        .and(warp::delete())
        .and(authenticated(state.clone()))
        .and_then(remove_exercise);

    let complete = warp::path!("api" / "workouts" / Uuid / "sets" / Uuid / "complete")
        .and(warp::post())
        .and(authenticated(state.clone()))
        .and_then(complete_set);

    let uncomplete = warp::path!("api" / "workouts" / Uuid / "sets" / Uuid / "uncomplete")
        .and(warp::post())
        .and(authenticated(state.clone()))
        .and_then(uncomplete_set);

    let complete_all = warp::path!("api" / "workouts" / Uuid / "complete")
        .and(warp::post())
        .and(authenticated(state))
        .and_then(complete_workout);

    list
        .or(by_date_range)
        .or(by_muscle_group)
        .or(get)
        .or(create)
        .or(update)
        .or(delete)
        .or(copy)
        .or(add_ex)
        .or(replace_ex)
        .or(remove_ex)
        .or(complete)
        .or(uncomplete)
        .or(complete_all)
}

fn exercise_routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let list = warp::path!("api" / "exercises")
        .and(warp::get())
        .and(authenticated(state.clone()))
        .and_then(list_exercises);

    let get = warp::path!("api" / "exercises" / Uuid)
        .and(warp::get())
        .and(authenticated(state.clone()))
        .and_then(get_exercise);

    let by_muscle_group = warp::path!("api" / "exercises" / "by-muscle-group" / String)
        .and(warp::get())
        .and(authenticated(state.clone()))
        .and_then(exercises_by_muscle_group);

    let create = warp::path!("api" / "exercises")
        .and(warp::post())
        .and(authenticated(state.clone()))
        .and_then(create_exercise);

    let bulk = warp::path!("api" / "exercises" / "bulk")
        .and(warp::post())
        .and(authenticated(state.clone()))
        .and_then(bulk_create_exercises);

    let update = warp::path!("api" / "exercises" / Uuid)
        .and(warp::put())
        .and(authenticated(state.clone()))
        .and_then(update_exercise);

    let delete = warp::path!("api" / "exercises" / Uuid)
        .and(warp::delete())
        .and(authenticated(state))
        .and_then(delete_exercise);

    list
        .or(get)
        .or(by_muscle_group)
        .or(create)
        .or(bulk)
        .or(update)
        .or(delete)
}

fn user_routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let signup = warp::path!("api" / "auth" / "signup")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(warp::body::bytes())
        .and_then(signup);

    let me = warp::path!("api" / "users" / "me")
        .and(warp::get())
        .and(authenticated(state.clone()))
        .and_then(me);

    let trainers = warp::path!("api" / "users" / "trainers")
        .and(warp::get())
        .and(authenticated(state.clone()))
        .and_then(list_trainers);

    let members = warp::path!("api" / "users" / "members")
        .and(warp::get())
        .and(authenticated(state.clone()))
        .and_then(list_members);

    let get = warp::path!("api" / "users" / Uuid)
        .and(warp::get())
        .and(authenticated(state.clone()))
        .and_then(get_user);

    let activate = warp::path!("api" / "users" / Uuid / "activate")
        .and(warp::put())
        .and(authenticated(state.clone()))
        .and_then(activate_user);

    let deactivate = warp::path!("api" / "users" / Uuid / "deactivate")
        .and(warp::put())
        .and(authenticated(state.clone()))
        .and_then(deactivate_user);

    let assign = warp::path!("api" / "users" / "member" / Uuid / "assign-trainer")
        .and(warp::put())
        .and(authenticated(state.clone()))
        .and_then(assign_trainer);

    let profile = warp::path!("api" / "users" / "profile")
        .and(warp::put())
        .and(authenticated(state))
        .and_then(update_profile);

    signup
        .or(me)
        .or(trainers)
        .or(members)
        .or(get)
        .or(activate)
        .or(deactivate)
        .or(assign)
        .or(profile)
}

fn checkin_routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let create = warp::path!("api" / "checkins")
        .and(warp::post())
        .and(warp::query::<CheckinQuery>())
        .and(authenticated(state.clone()))
        .and_then(check_in);

    let recent = warp::path!("api" / "checkins" / "recent")
        .and(warp::get())
        .and(warp::query::<RecentCheckinsQuery>())
        .and(authenticated(state.clone()))
        .and_then(recent_checkins);

    let between = warp::path!("api" / "checkins" / "between")
        .and(warp::get())
        .and(warp::query::<CheckinRangeQuery>())
        .and(authenticated(state))
        .and_then(checkins_between);

    create.or(recent).or(between)
}

/// every route of the api, with errors rendered as `ErrorMsg`
pub fn routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let health = warp::path!("api" / "health")
        .and(warp::get())
        .map(|| warp::reply::json(&HealthResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }));

    health
        .or(suggestion_routes(state.clone()))
        .or(workout_routes(state.clone()))
        .or(exercise_routes(state.clone()))
        .or(user_routes(state.clone()))
        .or(checkin_routes(state))
        .recover(handle_rejection)
        .with(warp::trace::request())
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (code, message) = if let Some(e) = err.find::<AppError>() {
        match e {
            AppError::Database(_) | AppError::Unexpected(_) => error!(error = %e, "request failed"),
            _ => debug!(error = %e, "request rejected"),
        }
        (e.status(), e.public_message())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else if let Some(e) = err.find::<warp::reject::PayloadTooLarge>() {
        (StatusCode::PAYLOAD_TOO_LARGE, e.to_string())
    } else {
        error!(?err, "unhandled rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
    };

    let json = warp::reply::json(&ErrorMsg {
        status: code.as_u16(),
        error: message,
    });

    Ok(warp::reply::with_status(json, code))
}
