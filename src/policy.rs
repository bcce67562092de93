//! Role and ownership based access decisions.
//!
//! Every handler that touches a member's data goes through [`authorize`]
//! instead of inspecting roles itself.

use uuid::Uuid;
use crate::{AppError, Role, User, Workout};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    /// read limited to the member's own trainers
    ReadAssigned,
    Write,
}

/// who a resource belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ownership {
    pub member_id: Uuid,
    /// trainer of the resource itself
    pub trainer_id: Option<Uuid>,
    /// trainer assigned to the member
    pub assigned_trainer: Option<Uuid>,
}

impl Ownership {
    pub fn member(member_id: Uuid) -> Self {
        Self { member_id, trainer_id: None, assigned_trainer: None }
    }

    pub fn of_member(member: &User) -> Self {
        Self { member_id: member.id, trainer_id: None, assigned_trainer: member.assigned_trainer }
    }

    pub fn of_workout(workout: &Workout, member: Option<&User>) -> Self {
        Self {
            member_id: workout.member_id,
            trainer_id: workout.trainer_id,
            assigned_trainer: member.and_then(|m| m.assigned_trainer),
        }
    }

    fn is_trainer(&self, user_id: Uuid) -> bool {
        self.trainer_id == Some(user_id) || self.assigned_trainer == Some(user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

pub fn evaluate(actor: &User, ownership: &Ownership, action: Action) -> Decision {
    if !actor.active {
        return Decision::Deny
    }
    if actor.has_role(Role::Admin) || actor.id == ownership.member_id {
        return Decision::Allow
    }
    if actor.has_role(Role::Trainer) {
        return match action {
            Action::Read => Decision::Allow,
            _ if ownership.is_trainer(actor.id) => Decision::Allow,
            _ => Decision::Deny,
        }
    }
    Decision::Deny
}

/// `evaluate`, with a denial turned into `AppError::Forbidden`
pub fn authorize(actor: &User, ownership: &Ownership, action: Action) -> Result<(), AppError> {
    match evaluate(actor, ownership, action) {
        Decision::Allow => Ok(()),
        Decision::Deny => Err(AppError::Forbidden(format!(
            "user {} may not {:?} resources of member {}",
            actor.id, action, ownership.member_id,
        ))),
    }
}

/// active actor holding at least one of `roles`
pub fn require_role(actor: &User, roles: &[Role]) -> Result<(), AppError> {
    if actor.active && roles.iter().any(|r| actor.has_role(*r)) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!("user {} requires one of roles {:?}", actor.id, roles)))
    }
}

/// admins and trainers may act on behalf of other members
pub fn can_act_for_others(actor: &User) -> bool {
    actor.active && (actor.has_role(Role::Admin) || actor.has_role(Role::Trainer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(roles: &[Role]) -> User {
        User {
            id: Uuid::new_v4(),
            username: "u".into(),
            email: "u@example.com".into(),
            first_name: "U".into(),
            last_name: "V".into(),
            roles: roles.iter().copied().collect(),
            active: true,
            assigned_trainer: None,
            public_key: [0u8; 32],
            created: Utc::now(),
        }
    }

    #[test]
    fn members_only_touch_their_own_resources() {
        let me = user(&[Role::Member]);
        let other = user(&[Role::Member]);
        assert_eq!(evaluate(&me, &Ownership::member(me.id), Action::Write), Decision::Allow);
        assert_eq!(evaluate(&me, &Ownership::member(other.id), Action::Read), Decision::Deny);
        assert!(matches!(authorize(&me, &Ownership::member(other.id), Action::Read), Err(AppError::Forbidden(_))));
    }

    #[test]
    fn trainers_read_everything_but_write_only_assigned() {
        let trainer = user(&[Role::Trainer]);
        let member = user(&[Role::Member]);
        let unassigned = Ownership::member(member.id);
        let assigned = Ownership { trainer_id: Some(trainer.id), ..unassigned };
        assert_eq!(evaluate(&trainer, &unassigned, Action::Read), Decision::Allow);
        assert_eq!(evaluate(&trainer, &unassigned, Action::Write), Decision::Deny);
        assert_eq!(evaluate(&trainer, &assigned, Action::Write), Decision::Allow);
    }

    #[test]
    fn admins_allowed_inactive_denied() {
        let admin = user(&[Role::Admin]);
        let member = user(&[Role::Member]);
        assert_eq!(evaluate(&admin, &Ownership::member(member.id), Action::Write), Decision::Allow);

        let mut inactive = user(&[Role::Admin]);
        inactive.active = false;
        assert_eq!(evaluate(&inactive, &Ownership::member(inactive.id), Action::Read), Decision::Deny);
        assert!(!can_act_for_others(&inactive));
        assert!(can_act_for_others(&admin));
        assert!(!can_act_for_others(&member));
    }

    #[test]
    fn assigned_reads_need_the_members_trainer() {
        let trainer = user(&[Role::Trainer]);
        let stranger = user(&[Role::Trainer]);
        let admin = user(&[Role::Admin]);
        let mut member = user(&[Role::Member]);
        member.assigned_trainer = Some(trainer.id);
        let ownership = Ownership::of_member(&member);
        assert_eq!(evaluate(&trainer, &ownership, Action::ReadAssigned), Decision::Allow);
        assert_eq!(evaluate(&stranger, &ownership, Action::ReadAssigned), Decision::Deny);
        assert_eq!(evaluate(&stranger, &ownership, Action::Read), Decision::Allow);
        assert_eq!(evaluate(&admin, &ownership, Action::ReadAssigned), Decision::Allow);
        assert_eq!(evaluate(&member, &ownership, Action::ReadAssigned), Decision::Allow);
    }

    #[test]
    fn role_requirements() {
        let admin = user(&[Role::Admin]);
        let trainer = user(&[Role::Trainer]);
        let member = user(&[Role::Member]);
        let staff = [Role::Admin, Role::Trainer];
        assert!(require_role(&admin, &staff).is_ok());
        assert!(require_role(&trainer, &staff).is_ok());
        assert!(matches!(require_role(&member, &staff), Err(AppError::Forbidden(_))));
        assert!(matches!(require_role(&trainer, &[Role::Admin]), Err(AppError::Forbidden(_))));

        let mut retired = user(&[Role::Admin]);
        retired.active = false;
        assert!(require_role(&retired, &[Role::Admin]).is_err());
    }

    #[test]
    fn workout_ownership_falls_back_to_assigned_trainer() {
        let trainer = user(&[Role::Trainer]);
        let mut member = user(&[Role::Member]);
        member.assigned_trainer = Some(trainer.id);
        let mut workout = Workout::new("legs", member.id, Utc::now());
        let ownership = Ownership::of_workout(&workout, Some(&member));
        assert_eq!(ownership.assigned_trainer, Some(trainer.id));
        assert_eq!(evaluate(&trainer, &ownership, Action::Write), Decision::Allow);

        // a different trainer on the workout does not lock out the assigned one
        let substitute = user(&[Role::Trainer]);
        workout.trainer_id = Some(substitute.id);
        let ownership = Ownership::of_workout(&workout, Some(&member));
        assert_eq!(evaluate(&trainer, &ownership, Action::Write), Decision::Allow);
        assert_eq!(evaluate(&substitute, &ownership, Action::Write), Decision::Allow);
        assert_eq!(evaluate(&substitute, &Ownership::of_workout(&workout, None), Action::Write), Decision::Allow);
    }
}
