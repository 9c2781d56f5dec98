use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{Category, Certificate, Level};
use crate::session::Session;
use crate::store::Store;

/// Certificates are valid for a fixed 365 days from issue.
pub fn validity() -> Duration {
    Duration::days(365)
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Active,
    Expired,
}

/// Derived on every read; nothing sweeps or stores expiry.
pub fn status(cert: &Certificate, now: DateTime<Utc>) -> Status {
    if now < cert.expiration_date {
        Status::Active
    } else {
        Status::Expired
    }
}

/// Creates or replaces the learner's certificate for the module. A re-pass
/// overwrites score and dates; earlier attempts are not kept.
pub async fn issue(
    store: &dyn Store,
    user_id: Uuid,
    module_id: Uuid,
    score: i32,
    now: DateTime<Utc>,
) -> Result<Certificate, ApiError> {
    if !(0..=100).contains(&score) {
        return Err(ApiError::invalid(format!("score {score} is outside 0..=100")));
    }
    let id = store
        .get_certificate(user_id, module_id)
        .await?
        .map_or_else(Uuid::new_v4, |c| c.id);
    let cert = Certificate {
        id,
        user_id,
        module_id,
        score,
        issue_date: now,
        expiration_date: now + validity(),
    };
    let saved = store.upsert_certificate(&cert).await?;
    tracing::info!(user = %user_id, module = %module_id, score, expires = %saved.expiration_date, "certificate issued");
    Ok(saved)
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CertificateView {
    #[serde(flatten)]
    pub certificate: Certificate,
    pub module_title: Option<String>,
    pub category: Option<Category>,
    pub level: Option<Level>,
    pub status: Status,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct CertificateQuery {
    pub status: Option<Status>,
}

pub async fn list_for_learner(
    store: &dyn Store,
    session: &Session,
    filter: &CertificateQuery,
    now: DateTime<Utc>,
) -> Result<Vec<CertificateView>, ApiError> {
    let certs = store.list_certificates(session.user_id).await?;
    if certs.is_empty() {
        return Ok(Vec::new());
    }
    let modules = store.list_modules().await?;
    Ok(certs
        .into_iter()
        .map(|c| {
            let module = modules.iter().find(|m| m.id == c.module_id);
            CertificateView {
                module_title: module.map(|m| m.title.clone()),
                category: module.map(|m| m.category),
                level: module.map(|m| m.level),
                status: status(&c, now),
                certificate: c,
            }
        })
        .filter(|v| filter.status.map_or(true, |s| v.status == s))
        .collect())
}

pub async fn get_for_learner(
    store: &dyn Store,
    session: &Session,
    module_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<CertificateView>, ApiError> {
    let all = list_for_learner(store, session, &CertificateQuery::default(), now).await?;
    Ok(all.into_iter().find(|v| v.certificate.module_id == module_id))
}
