//! Identity and capability checks for the layer that sits in front of the engine.
//!
//! Authentication ("who is this?") and authorization ("may they do this?") are
//! separate traits so each can be swapped independently. The engine itself
//! never calls either; callers check first and then pass authorized input in.

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Member,
}

/// A verified user. `user_id` is what reservations record as their requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Ulid,
    pub username: String,
    pub roles: HashSet<Role>,
}

impl Identity {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ViewCalendar,
    BookDevice,
    CancelBooking,
    ManageDevices,
}

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("{0:?} not permitted")]
    Forbidden(Capability),
    #[error("identity backend unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, username: &str, secret: &str) -> Result<Identity, AccessError>;
}

pub trait Authorizer: Send + Sync {
    fn allows(&self, identity: &Identity, capability: Capability) -> bool;

    fn require(&self, identity: &Identity, capability: Capability) -> Result<(), AccessError> {
        if self.allows(identity, capability) {
            Ok(())
        } else {
            Err(AccessError::Forbidden(capability))
        }
    }
}

/// Admins may do everything; members may only view the calendar.
#[derive(Debug, Default, Clone, Copy)]
pub struct RoleAuthorizer;

impl Authorizer for RoleAuthorizer {
    fn allows(&self, identity: &Identity, capability: Capability) -> bool {
        match capability {
            Capability::ViewCalendar => true,
            Capability::BookDevice | Capability::CancelBooking | Capability::ManageDevices => {
                identity.has_role(Role::Admin)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    struct FixedUsers(HashMap<String, (String, Identity)>);

    #[async_trait]
    impl Authenticator for FixedUsers {
        async fn authenticate(&self, username: &str, secret: &str) -> Result<Identity, AccessError> {
            match self.0.get(username) {
                Some((expected, identity)) if expected == secret => Ok(identity.clone()),
                _ => Err(AccessError::InvalidCredentials),
            }
        }
    }

    fn identity(name: &str, roles: &[Role]) -> Identity {
        Identity {
            user_id: Ulid::new(),
            username: name.into(),
            roles: roles.iter().copied().collect(),
        }
    }

    #[tokio::test]
    async fn authentication_and_authorization_compose() {
        let admin = identity("ops", &[Role::Admin]);
        let member = identity("guest", &[Role::Member]);
        let users = FixedUsers(HashMap::from([
            ("ops".to_string(), ("s3cret".to_string(), admin.clone())),
            ("guest".to_string(), ("guest".to_string(), member.clone())),
        ]));
        let policy = RoleAuthorizer;

        let who = users.authenticate("ops", "s3cret").await.unwrap();
        assert_eq!(who, admin);
        assert!(policy.require(&who, Capability::BookDevice).is_ok());

        let who = users.authenticate("guest", "guest").await.unwrap();
        assert!(policy.allows(&who, Capability::ViewCalendar));
        assert!(matches!(
            policy.require(&who, Capability::ManageDevices),
            Err(AccessError::Forbidden(Capability::ManageDevices))
        ));

        assert!(matches!(
            users.authenticate("ops", "wrong").await,
            Err(AccessError::InvalidCredentials)
        ));
    }

    #[test]
    fn username_alone_grants_nothing() {
        // A user literally named "admin" without the role is not an admin.
        let spoof = identity("admin", &[Role::Member]);
        assert!(!RoleAuthorizer.allows(&spoof, Capability::BookDevice));
    }
}
