use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use std::convert::Infallible;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const USER_PHONE_HEADER: &str = "x-user-phone";
pub const USER_FIRST_NAME_HEADER: &str = "x-user-first-name";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub first_name: Option<String>,
}

/// Caller identity as established by the upstream identity provider,
/// which forwards it in `x-user-*` headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub user: Option<AuthenticatedUser>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self { user: None }
    }

    pub fn authenticated(user: AuthenticatedUser) -> Self {
        Self { user: Some(user) }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.user.as_ref().map(|user| user.id)
    }

    /// A missing or malformed user id means the request is anonymous.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(String::from)
        };

        match header(USER_ID_HEADER).and_then(|id| Uuid::parse_str(&id).ok()) {
            Some(id) => Self::authenticated(AuthenticatedUser {
                id,
                email: header(USER_EMAIL_HEADER),
                phone: header(USER_PHONE_HEADER),
                first_name: header(USER_FIRST_NAME_HEADER),
            }),
            None => Self::anonymous(),
        }
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Identity::from_headers(&parts.headers))
    }
}
