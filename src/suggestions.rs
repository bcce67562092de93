use std::sync::Arc;
use chrono::{DateTime, Duration, Utc};
use itertools::Itertools;
use tracing::{debug, info};
use uuid::Uuid;
use crate::advice::AdviceClient;
use crate::api::SuggestionResponse;
use crate::cache::{CachedSuggestion, Clock, SuggestionCache, SuggestionKey};
use crate::progression::{most_recent, observations_for, suggest_next_sets};
use crate::store::Store;
use crate::{AppError, User, Workout};

pub const DEFAULT_HISTORY_DAYS: u32 = 30;
pub const DEFAULT_WEEKLY_WINDOW_DAYS: u32 = 7;
/// longest history window a caller may ask for
pub const MAX_HISTORY_DAYS: u32 = 3650;
/// sets considered by the progressive overload endpoint
pub const PROGRESSIVE_SETS: usize = 5;

fn window_start(now: DateTime<Utc>, days: u32) -> Result<DateTime<Utc>, AppError> {
    if days < 1 || days > MAX_HISTORY_DAYS {
        return Err(AppError::Validation(format!("historyDays must be between 1 and {}, got {}", MAX_HISTORY_DAYS, days)))
    }
    now.checked_sub_signed(Duration::days(days as i64))
        .ok_or_else(|| AppError::Validation(format!("historyDays out of range: {}", days)))
}

/// prompt describing a member's recent workouts, oldest first
pub fn format_weekly_history(workouts: &[Workout]) -> String {
    let mut prompt = String::from("Last week's workout schedule:\n");
    for w in workouts.iter().sorted_by_key(|w| w.scheduled_date) {
        let exercises = w.sets.iter()
            .map(|s| s.exercise_name.as_str())
            .unique()
            .join(", ");
        prompt.push_str(&format!(
            "Date: {}, Workout: {}, Exercises: {}\n",
            w.scheduled_date.format("%Y-%m-%d"),
            w.name,
            exercises,
        ));
    }
    prompt.push_str("\nSuggest a workout schedule for next week following progressive overload principles.");
    prompt
}

/// non-blank, trimmed lines of a completion
pub fn parse_weekly_suggestions(text: &str) -> impl Iterator<Item = String> + '_ {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
}

/// the three suggestion flavours, memoized per member in `SuggestionCache`
#[derive(Clone)]
pub struct SuggestionService {
    store: Arc<dyn Store>,
    cache: SuggestionCache,
    clock: Arc<dyn Clock>,
    advice: Arc<dyn AdviceClient>,
    default_history_days: u32,
    weekly_window_days: u32,
}

impl SuggestionService {
    pub fn new(
        store: Arc<dyn Store>,
        cache: SuggestionCache,
        clock: Arc<dyn Clock>,
        advice: Arc<dyn AdviceClient>,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
            advice,
            default_history_days: DEFAULT_HISTORY_DAYS,
            weekly_window_days: DEFAULT_WEEKLY_WINDOW_DAYS,
        }
    }

    pub fn with_windows(mut self, default_history_days: u32, weekly_window_days: u32) -> Self {
        self.default_history_days = default_history_days.max(1).min(MAX_HISTORY_DAYS);
        self.weekly_window_days = weekly_window_days.max(1).min(MAX_HISTORY_DAYS);
        self
    }

    async fn ensure_exercise(&self, exercise_id: Uuid) -> Result<(), AppError> {
        match self.store.get_exercise(exercise_id).await? {
            Some(_) => Ok(()),
            None => Err(AppError::not_found("exercise", exercise_id)),
        }
    }

    fn cached_sets(&self, key: &SuggestionKey) -> Option<SuggestionResponse> {
        match self.cache.get(key) {
            Some(CachedSuggestion::Sets(resp)) => Some(resp),
            _ => None,
        }
    }

    /// next-session sets from every set of `exercise_id` scheduled in the last `history_days`
    pub async fn suggested_parameters(
        &self,
        user: &User,
        exercise_id: Uuid,
        history_days: Option<u32>,
    ) -> Result<SuggestionResponse, AppError> {
        let window_days = history_days.unwrap_or(self.default_history_days);
        let now = self.clock.now();
        let start = window_start(now, window_days)?;
        let key = SuggestionKey::Parameters { user_id: user.id, exercise_id, window_days };
        if let Some(hit) = self.cached_sets(&key) {
            return Ok(hit)
        }

        self.ensure_exercise(exercise_id).await?;
        let workouts = self.store.workouts_by_member_between(user.id, start, now).await?;
        let history = observations_for(&workouts, exercise_id);
        debug!(user_id = %user.id, %exercise_id, window_days, n_observations = history.len(), "computing suggested parameters");

        let resp = SuggestionResponse::from(suggest_next_sets(&history));
        self.cache.put(key, CachedSuggestion::Sets(resp.clone()));
        Ok(resp)
    }

    /// next-session sets from the most recent sets of `exercise_id`, regardless of age
    pub async fn progressive_overload(&self, user: &User, exercise_id: Uuid) -> Result<SuggestionResponse, AppError> {
        let key = SuggestionKey::Progressive { user_id: user.id, exercise_id };
        if let Some(hit) = self.cached_sets(&key) {
            return Ok(hit)
        }

        self.ensure_exercise(exercise_id).await?;
        let workouts = self.store.workouts_by_member(user.id).await?;
        let history = most_recent(observations_for(&workouts, exercise_id), PROGRESSIVE_SETS);
        debug!(user_id = %user.id, %exercise_id, n_observations = history.len(), "computing progressive overload");

        let resp = SuggestionResponse::from(suggest_next_sets(&history));
        self.cache.put(key, CachedSuggestion::Sets(resp.clone()));
        Ok(resp)
    }

    /// free-text advice for next week; empty when the advice service is unavailable
    pub async fn weekly_suggestions(&self, user: &User) -> Result<Vec<String>, AppError> {
        let key = SuggestionKey::Weekly { user_id: user.id };
        if let Some(CachedSuggestion::Weekly(lines)) = self.cache.get(&key) {
            return Ok(lines)
        }

        let now = self.clock.now();
        let start = window_start(now, self.weekly_window_days)?;
        let workouts = self.store.workouts_by_member_between(user.id, start, now).await?;
        let prompt = format_weekly_history(&workouts);

        match self.advice.complete(&prompt).await {
            Some(text) => {
                let lines: Vec<String> = parse_weekly_suggestions(&text).collect();
                info!(user_id = %user.id, n_workouts = workouts.len(), n_lines = lines.len(), "weekly suggestions generated");
                self.cache.put(key, CachedSuggestion::Weekly(lines.clone()));
                Ok(lines)
            }
            None => Ok(Vec::new()),
        }
    }
}
