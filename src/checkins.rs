use std::sync::Arc;
use chrono::prelude::*;
use tracing::debug;
use uuid::Uuid;
use crate::api::day_range;
use crate::cache::Clock;
use crate::policy::{self, Action, Ownership};
use crate::store::Store;
use crate::{AppError, Checkin, Role, User};

pub const DEFAULT_RECENT_LIMIT: usize = 50;
pub const MAX_RECENT_LIMIT: usize = 500;

/// gym attendance
///
/// Admins see everyone's check-ins, trainers those of their assigned members,
/// everyone else only their own.
#[derive(Clone)]
pub struct CheckinService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl CheckinService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// whose check-ins a listing covers: `None` is everyone
    async fn scope(&self, actor: &User, user_id: Option<Uuid>) -> Result<Option<Uuid>, AppError> {
        match user_id {
            _ if !actor.active => {
                Err(AppError::Forbidden(format!("user {} is not active", actor.id)))
            }

            None if actor.has_role(Role::Admin) => Ok(None),

            Some(id) if id != actor.id && actor.has_role(Role::Admin) => Ok(Some(id)),

            Some(id) if id != actor.id && actor.has_role(Role::Trainer) => {
                let ownership = match self.store.get_user(id).await? {
                    Some(member) => Ownership::of_member(&member),
                    None => Ownership::member(id),
                };
                policy::authorize(actor, &ownership, Action::ReadAssigned)?;
                Ok(Some(id))
            }

            _ => Ok(Some(actor.id)),
        }
    }

    /// records a visit for `user_id` (default: the caller) at `occurred_at` (default: now)
    pub async fn check_in(
        &self,
        actor: &User,
        user_id: Option<Uuid>,
        occurred_at: Option<DateTime<Utc>>,
    ) -> Result<Checkin, AppError> {
        let user_id = user_id.unwrap_or(actor.id);
        // only admins check in other users
        policy::authorize(actor, &Ownership::member(user_id), Action::Write)?;
        if self.store.get_user(user_id).await?.is_none() {
            return Err(AppError::not_found("user", user_id))
        }
        let checkin = Checkin {
            id: Uuid::new_v4(),
            user_id,
            occurred_at: occurred_at.unwrap_or_else(|| self.clock.now()),
        };
        self.store.insert_checkin(&checkin).await?;
        debug!(checkin_id = %checkin.id, %user_id, "checked in");
        Ok(checkin)
    }

    pub async fn recent(&self, actor: &User, user_id: Option<Uuid>, limit: Option<usize>) -> Result<Vec<Checkin>, AppError> {
        let limit = limit.unwrap_or(DEFAULT_RECENT_LIMIT);
        if limit < 1 {
            return Err(AppError::Validation("limit must be at least 1".into()))
        }
        let scope = self.scope(actor, user_id).await?;
        self.store.recent_checkins(scope, limit.min(MAX_RECENT_LIMIT)).await
    }

    /// check-ins from the start of `start` through the end of `end`
    pub async fn between(
        &self,
        actor: &User,
        start: NaiveDate,
        end: NaiveDate,
        user_id: Option<Uuid>,
    ) -> Result<Vec<Checkin>, AppError> {
        let (from, to) = day_range(start, end)?;
        let scope = self.scope(actor, user_id).await?;
        self.store.checkins_between(scope, from, to).await
    }
}
