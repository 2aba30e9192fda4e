use async_trait::async_trait;
use axum::extract::{FromRequest, RequestParts};
use oso::PolarClass;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Rider,
    Driver,
    Admin,
    System,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rider => "rider",
            Self::Driver => "driver",
            Self::Admin => "admin",
            Self::System => "system",
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    // `system` is internal only and cannot be claimed through a header.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rider" | "passenger" => Ok(Self::Rider),
            "driver" => Ok(Self::Driver),
            "admin" => Ok(Self::Admin),
            other => Err(Error::invalid_input(format!("unknown role {:?}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub role: Role,
    /// Filled in by the engine from the driver registry before policy checks.
    #[serde(default)]
    pub verified: bool,
}

impl User {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self {
            id,
            role,
            verified: false,
        }
    }

    pub fn with_verified(mut self, verified: bool) -> Self {
        self.verified = verified;
        self
    }

    pub fn rider(id: Uuid) -> Self {
        Self::new(id, Role::Rider)
    }

    pub fn driver(id: Uuid) -> Self {
        Self::new(id, Role::Driver)
    }

    pub fn admin(id: Uuid) -> Self {
        Self::new(id, Role::Admin)
    }

    /// Identity of background jobs such as the expiry sweeper.
    pub fn system() -> Self {
        Self::new(Uuid::nil(), Role::System)
    }

    pub fn is_driver(&self) -> bool {
        self.role == Role::Driver
    }
}

impl PolarClass for User {
    fn get_polar_class_builder() -> oso::ClassBuilder<User> {
        oso::Class::builder()
            .name("User")
            .add_attribute_getter("id", |recv: &User| recv.id.to_string())
            .add_attribute_getter("role", |recv: &User| recv.role.name().to_string())
            .add_attribute_getter("verified", |recv: &User| recv.verified)
    }

    fn get_polar_class() -> oso::Class {
        User::get_polar_class_builder().build()
    }
}

/// Identity is asserted upstream by the identity provider and forwarded as headers.
#[async_trait]
impl<B: Send> FromRequest<B> for User {
    type Rejection = Error;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let headers = req.headers();

        let id = headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(Error::unauthorized)?;
        let id = Uuid::parse_str(id).map_err(|_| Error::unauthorized())?;

        let role = headers
            .get(USER_ROLE_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(Error::unauthorized)?
            .parse::<Role>()?;

        Ok(User::new(id, role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_role_cannot_be_claimed() {
        assert_eq!("Driver".parse::<Role>().unwrap(), Role::Driver);
        assert_eq!("passenger".parse::<Role>().unwrap(), Role::Rider);
        assert!("system".parse::<Role>().is_err());
    }

    #[tokio::test]
    async fn extracts_identity_from_headers() {
        let id = Uuid::new_v4();
        let request = axum::http::Request::builder()
            .header(USER_ID_HEADER, id.to_string())
            .header(USER_ROLE_HEADER, "rider")
            .body(())
            .unwrap();

        let mut parts = RequestParts::new(request);
        let user = User::from_request(&mut parts).await.unwrap();
        assert_eq!(user, User::rider(id));
    }

    #[tokio::test]
    async fn missing_identity_is_unauthorized() {
        let request = axum::http::Request::builder().body(()).unwrap();

        let mut parts = RequestParts::new(request);
        let err = User::from_request(&mut parts).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Unauthorized);
    }
}
