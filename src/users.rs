use std::sync::Arc;
use std::convert::TryInto;
use tracing::info;
use uuid::Uuid;
use crate::api::{ProfileRequest, SignupRequest};
use crate::auth::PublicKey;
use crate::cache::Clock;
use crate::policy::{self, Action, Ownership};
use crate::store::Store;
use crate::{AppError, Role, User};

/// account lifecycle: signup, admin approval, trainer assignment, profiles
#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

fn decode_public_key(encoded: &str) -> Result<PublicKey, AppError> {
    let bytes = base64::decode(encoded.trim())
        .map_err(|e| AppError::Validation(format!("public key is not valid base64: {}", e)))?;
    bytes.try_into()
        .map_err(|b: Vec<u8>| AppError::Validation(format!("public key must be 32 bytes, got {}", b.len())))
}

impl UserService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    async fn load(&self, user_id: Uuid) -> Result<User, AppError> {
        self.store.get_user(user_id).await?
            .ok_or_else(|| AppError::not_found("user", user_id))
    }

    /// registers an inactive account holding the caller's public key
    pub async fn signup(&self, req: SignupRequest) -> Result<User, AppError> {
        req.validate()?;
        let public_key = decode_public_key(&req.public_key)?;
        let role = req.role.unwrap_or(Role::Member);
        let user = User {
            id: Uuid::new_v4(),
            username: req.username.trim().to_string(),
            email: req.email.trim().to_string(),
            first_name: req.first_name.trim().to_string(),
            last_name: req.last_name.trim().to_string(),
            roles: vec![role].into_iter().collect(),
            active: false,
            assigned_trainer: None,
            public_key,
            created: self.clock.now(),
        };
        self.store.insert_user(&user).await?;
        info!(user_id = %user.id, username = %user.username, ?role, "signup awaiting approval");
        Ok(user)
    }

    pub async fn get(&self, actor: &User, user_id: Uuid) -> Result<User, AppError> {
        policy::authorize(actor, &Ownership::member(user_id), Action::Read)?;
        self.load(user_id).await
    }

    pub async fn list_trainers(&self, actor: &User) -> Result<Vec<User>, AppError> {
        policy::require_role(actor, &[Role::Admin])?;
        self.store.users_with_role(Role::Trainer, false).await
    }

    /// every member for admins, active members for trainers
    pub async fn list_members(&self, actor: &User) -> Result<Vec<User>, AppError> {
        policy::require_role(actor, &[Role::Admin, Role::Trainer])?;
        let active_only = !actor.has_role(Role::Admin);
        self.store.users_with_role(Role::Member, active_only).await
    }

    pub async fn set_active(&self, actor: &User, user_id: Uuid, active: bool) -> Result<User, AppError> {
        policy::require_role(actor, &[Role::Admin])?;
        let mut user = self.load(user_id).await?;
        user.active = active;
        self.store.insert_user(&user).await?;
        info!(admin_id = %actor.id, %user_id, active, "account status changed");
        Ok(user)
    }

    pub async fn assign_trainer(&self, actor: &User, member_id: Uuid, trainer_id: Uuid) -> Result<User, AppError> {
        policy::require_role(actor, &[Role::Admin])?;
        let mut member = self.load(member_id).await?;
        if !member.has_role(Role::Member) {
            return Err(AppError::Validation(format!("user {} is not a member", member_id)))
        }
        let trainer = self.load(trainer_id).await?;
        if !trainer.has_role(Role::Trainer) {
            return Err(AppError::Validation(format!("user {} is not a trainer", trainer_id)))
        }
        member.assigned_trainer = Some(trainer.id);
        self.store.insert_user(&member).await?;
        info!(%member_id, %trainer_id, "trainer assigned");
        Ok(member)
    }

    pub async fn update_profile(&self, actor: &User, req: ProfileRequest) -> Result<User, AppError> {
        req.validate()?;
        policy::authorize(actor, &Ownership::member(actor.id), Action::Write)?;
        let mut user = self.load(actor.id).await?;
        if let Some(first_name) = req.first_name {
            user.first_name = first_name.trim().to_string();
        }
        if let Some(last_name) = req.last_name {
            user.last_name = last_name.trim().to_string();
        }
        if let Some(email) = req.email {
            user.email = email.trim().to_string();
        }
        self.store.insert_user(&user).await?;
        Ok(user)
    }
}
