//! Learner session, taken from headers set by the authenticating gateway and
//! handed explicitly to every operation.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::{
    headers::{self, Header, HeaderMapExt, HeaderName, HeaderValue},
    TypedHeader,
};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::Role;

static X_LEARNER_ID: HeaderName = HeaderName::from_static("x-learner-id");
static X_LEARNER_ROLE: HeaderName = HeaderName::from_static("x-learner-role");
static X_LEARNER_EMAIL: HeaderName = HeaderName::from_static("x-learner-email");

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub role: Role,
}

impl Session {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, email: None, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::Forbidden("administrator role required".into()))
        }
    }
}

fn single<'i, I: Iterator<Item = &'i HeaderValue>>(values: &mut I) -> Result<&'i str, headers::Error> {
    let v = values.next().ok_or_else(headers::Error::invalid)?;
    v.to_str().map_err(|_| headers::Error::invalid())
}

#[derive(Debug, Clone, Copy)]
pub struct LearnerId(pub Uuid);

impl Header for LearnerId {
    fn name() -> &'static HeaderName {
        &X_LEARNER_ID
    }

    fn decode<'i, I: Iterator<Item = &'i HeaderValue>>(values: &mut I) -> Result<Self, headers::Error> {
        let raw = single(values)?;
        Uuid::parse_str(raw.trim()).map(LearnerId).map_err(|_| headers::Error::invalid())
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        if let Ok(v) = HeaderValue::from_str(&self.0.to_string()) {
            values.extend(std::iter::once(v));
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LearnerRole(pub Role);

impl Header for LearnerRole {
    fn name() -> &'static HeaderName {
        &X_LEARNER_ROLE
    }

    fn decode<'i, I: Iterator<Item = &'i HeaderValue>>(values: &mut I) -> Result<Self, headers::Error> {
        let raw = single(values)?;
        raw.trim().parse().map(LearnerRole).map_err(|_| headers::Error::invalid())
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        values.extend(std::iter::once(HeaderValue::from_static(self.0.as_str())));
    }
}

#[derive(Debug, Clone)]
pub struct LearnerEmail(pub String);

impl Header for LearnerEmail {
    fn name() -> &'static HeaderName {
        &X_LEARNER_EMAIL
    }

    fn decode<'i, I: Iterator<Item = &'i HeaderValue>>(values: &mut I) -> Result<Self, headers::Error> {
        single(values).map(|s| LearnerEmail(s.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        if let Ok(v) = HeaderValue::from_str(&self.0) {
            values.extend(std::iter::once(v));
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(LearnerId(user_id)) = TypedHeader::<LearnerId>::from_request_parts(parts, state)
            .await
            .map_err(|_| ApiError::Unauthorized)?;
        // an unparseable role is rejected rather than silently downgraded
        let role = match parts.headers.get(&X_LEARNER_ROLE) {
            // sign-up default
            None => Role::Receptionist,
            Some(_) => parts
                .headers
                .typed_get::<LearnerRole>()
                .map(|r| r.0)
                .ok_or(ApiError::Unauthorized)?,
        };
        let email = parts.headers.typed_get::<LearnerEmail>().map(|e| e.0);
        Ok(Session { email, ..Session::new(user_id, role) })
    }
}
