//! Per-learner module progress.
//!
//! Sections are completed strictly in order: section `k` can be entered only
//! when it is the first one or section `k - 1` is already done. Finishing
//! section `k` of `n` moves the learner to `round(100 * (k + 1) / n)` percent,
//! and the last section sets both `percent = 100` and `completed`.
//!
//! Writes go straight to the store and are not retried. Two tabs updating the
//! same module race; the last upsert wins.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::catalog;
use crate::error::ApiError;
use crate::models::{Module, Progress, Section};
use crate::session::Session;
use crate::store::Store;

pub fn section_percent(index: usize, total: usize) -> i32 {
    if total == 0 {
        return 100;
    }
    let pct = (100.0 * (index + 1) as f64 / total as f64).round();
    pct.clamp(0.0, 100.0) as i32
}

/// How many leading sections a given percent accounts for: the sections whose
/// own completion percent is not above it. Inverse of [`section_percent`].
pub fn sections_covered(percent: i32, total: usize) -> usize {
    (0..total)
        .take_while(|&k| section_percent(k, total) <= percent)
        .count()
}

/// `sections_completed` is the number of sections already finished in order.
pub fn can_enter(index: usize, sections_completed: usize) -> bool {
    index == 0 || index <= sections_completed
}

fn blank(session: &Session, module_id: Uuid, now: DateTime<Utc>) -> Progress {
    Progress {
        user_id: session.user_id,
        module_id,
        percent: 0,
        sections_completed: 0,
        completed: false,
        last_accessed: now,
    }
}

fn section_at(module: &Module, index: usize) -> Result<&Section, ApiError> {
    module.sections.get(index).ok_or_else(|| {
        ApiError::not_found(format!("section {index} of module {}", module.id))
    })
}

pub async fn get_progress(store: &dyn Store, session: &Session, module_id: Uuid) -> Result<Progress, ApiError> {
    catalog::module_for_learner(store, session, module_id).await?;
    let stored = store.get_progress(session.user_id, module_id).await?;
    // no row yet means "not started", not an error
    Ok(stored.unwrap_or_else(|| blank(session, module_id, Utc::now())))
}

/// Returns the section when the gating rule allows it.
pub async fn enter_section(
    store: &dyn Store,
    session: &Session,
    module_id: Uuid,
    index: usize,
) -> Result<Section, ApiError> {
    let module = catalog::module_for_learner(store, session, module_id).await?;
    let section = section_at(&module, index)?;
    let done = store
        .get_progress(session.user_id, module_id)
        .await?
        .map_or(0, |p| p.sections_completed.max(0) as usize);
    if !can_enter(index, done) {
        return Err(ApiError::Locked(format!(
            "finish section {} before opening section {index}",
            index - 1
        )));
    }
    Ok(section.clone())
}

pub async fn complete_section(
    store: &dyn Store,
    session: &Session,
    module_id: Uuid,
    index: usize,
    now: DateTime<Utc>,
) -> Result<Progress, ApiError> {
    let module = catalog::module_for_learner(store, session, module_id).await?;
    section_at(&module, index)?;
    let total = module.sections.len();

    let current = store
        .get_progress(session.user_id, module_id)
        .await?
        .unwrap_or_else(|| blank(session, module_id, now));
    let done = current.sections_completed.max(0) as usize;

    if !can_enter(index, done) {
        return Err(ApiError::Locked(format!(
            "finish section {} before completing section {index}",
            index - 1
        )));
    }
    // revisiting finished material never moves progress backwards, but the
    // last section always closes out a module that is not yet completed
    if index < done && (current.completed || index + 1 < total) {
        return Ok(current);
    }

    let finished = index + 1 == total;
    let next = Progress {
        percent: if finished { 100 } else { section_percent(index, total) },
        sections_completed: (index + 1) as i32,
        completed: finished,
        last_accessed: now,
        ..current
    };
    let saved = store.upsert_progress(&next).await?;
    tracing::debug!(user = %session.user_id, module = %module_id, percent = saved.percent, "section completed");
    Ok(saved)
}

/// The caller-computed update: both values are taken as given once they are
/// consistent with each other. The gating count is re-derived from the new
/// percent so that section completion keeps agreeing with it.
pub async fn record_progress(
    store: &dyn Store,
    session: &Session,
    module_id: Uuid,
    percent: i32,
    completed: bool,
    now: DateTime<Utc>,
) -> Result<Progress, ApiError> {
    let mut errors = Vec::new();
    if !(0..=100).contains(&percent) {
        errors.push(format!("percent must be between 0 and 100, got {percent}"));
    }
    if completed != (percent == 100) {
        errors.push("completed must be true exactly when percent is 100".to_string());
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let module = catalog::module_for_learner(store, session, module_id).await?;
    let current = store
        .get_progress(session.user_id, module_id)
        .await?
        .unwrap_or_else(|| blank(session, module_id, now));
    let next = Progress {
        percent,
        completed,
        sections_completed: sections_covered(percent, module.sections.len()) as i32,
        last_accessed: now,
        ..current
    };
    Ok(store.upsert_progress(&next).await?)
}

/// A module counts as finished when its progress is completed, or when it has
/// no sections to work through.
pub async fn is_module_finished(store: &dyn Store, session: &Session, module: &Module) -> Result<bool, ApiError> {
    if module.sections.is_empty() {
        return Ok(true);
    }
    Ok(store
        .get_progress(session.user_id, module.id)
        .await?
        .is_some_and(|p| p.completed))
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ModuleProgress {
    pub module_id: Uuid,
    pub title: String,
    pub percent: i32,
    pub completed: bool,
    pub last_accessed: Option<DateTime<Utc>>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Summary {
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub not_started: usize,
    pub overall_percent: i32,
    pub total_minutes: i64,
    pub modules: Vec<ModuleProgress>,
}

/// Progress across every module the learner is eligible for.
pub async fn summary(store: &dyn Store, session: &Session) -> Result<Summary, ApiError> {
    let modules: Vec<Module> = store
        .list_modules()
        .await?
        .into_iter()
        .filter(|m| m.is_eligible(session.role))
        .collect();
    let rows = store.list_progress(session.user_id).await?;

    let mut out = Vec::with_capacity(modules.len());
    for m in &modules {
        let p = rows.iter().find(|p| p.module_id == m.id);
        out.push(ModuleProgress {
            module_id: m.id,
            title: m.title.clone(),
            percent: p.map_or(0, |p| p.percent),
            completed: p.is_some_and(|p| p.completed),
            last_accessed: p.map(|p| p.last_accessed),
        });
    }

    let total = out.len();
    let completed = out.iter().filter(|m| m.completed).count();
    let in_progress = out.iter().filter(|m| !m.completed && m.percent > 0).count();
    let overall_percent = if total == 0 {
        0
    } else {
        (100.0 * completed as f64 / total as f64).round() as i32
    };
    Ok(Summary {
        total,
        completed,
        in_progress,
        not_started: total - completed - in_progress,
        overall_percent,
        total_minutes: modules.iter().map(|m| m.duration as i64).sum(),
        modules: out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::store::{fixtures::module_with_sections, MemoryStore};

    #[test]
    fn percent_follows_section_index() {
        assert_eq!(section_percent(0, 5), 20);
        assert_eq!(section_percent(3, 5), 80);
        assert_eq!(section_percent(4, 5), 100);
        assert_eq!(section_percent(0, 3), 33);
        assert_eq!(section_percent(1, 3), 67);
        assert_eq!(section_percent(0, 8), 13);
    }

    #[test]
    fn percent_is_monotonic_and_ends_at_100() {
        for n in 1..=40 {
            let mut last = 0;
            for k in 0..n {
                let p = section_percent(k, n);
                assert!(p >= last, "n={n} k={k}");
                last = p;
            }
            assert_eq!(last, 100);
        }
    }

    #[test]
    fn gating_is_linear() {
        assert!(can_enter(0, 0));
        assert!(!can_enter(1, 0));
        assert!(can_enter(1, 1));
        assert!(!can_enter(3, 1));
        // finished sections stay reachable
        assert!(can_enter(0, 4));
        assert!(can_enter(2, 4));
    }

    async fn setup(n: usize) -> (MemoryStore, Session, Module) {
        let store = MemoryStore::new();
        let m = store.insert_module(&module_with_sections(n, vec![Role::Security])).await.unwrap();
        (store, Session::new(Uuid::new_v4(), Role::Security), m)
    }

    #[tokio::test]
    async fn five_section_walkthrough() {
        let (store, s, m) = setup(5).await;
        let now = Utc::now();
        for k in 0..4 {
            complete_section(&store, &s, m.id, k, now).await.unwrap();
        }
        let p = get_progress(&store, &s, m.id).await.unwrap();
        assert_eq!(p.percent, 80);
        assert!(!p.completed);
        assert!(!is_module_finished(&store, &s, &m).await.unwrap());

        // index 5 is past the end of a 5-section module
        let err = enter_section(&store, &s, m.id, 5).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));

        let p = complete_section(&store, &s, m.id, 4, now).await.unwrap();
        assert_eq!(p.percent, 100);
        assert!(p.completed);
        assert!(is_module_finished(&store, &s, &m).await.unwrap());
    }

    #[tokio::test]
    async fn skipping_ahead_is_locked() {
        let (store, s, m) = setup(5).await;
        let now = Utc::now();
        assert!(enter_section(&store, &s, m.id, 0).await.is_ok());
        let err = enter_section(&store, &s, m.id, 2).await.unwrap_err();
        assert!(matches!(err, ApiError::Locked(_)));
        let err = complete_section(&store, &s, m.id, 1, now).await.unwrap_err();
        assert!(matches!(err, ApiError::Locked(_)));
        assert!(store.get_progress(s.user_id, m.id).await.unwrap().is_none());

        complete_section(&store, &s, m.id, 0, now).await.unwrap();
        assert!(enter_section(&store, &s, m.id, 1).await.is_ok());
    }

    #[tokio::test]
    async fn recompleting_a_section_does_not_regress() {
        let (store, s, m) = setup(4).await;
        let now = Utc::now();
        for k in 0..3 {
            complete_section(&store, &s, m.id, k, now).await.unwrap();
        }
        let p = complete_section(&store, &s, m.id, 0, now).await.unwrap();
        assert_eq!(p.percent, 75);
        assert_eq!(p.sections_completed, 3);
    }

    #[tokio::test]
    async fn explicit_updates_must_be_consistent() {
        let (store, s, m) = setup(3).await;
        let now = Utc::now();
        let err = record_progress(&store, &s, m.id, 100, false, now).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        let err = record_progress(&store, &s, m.id, 120, true, now).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(ref v) if v.len() == 2));

        let p = record_progress(&store, &s, m.id, 40, false, now).await.unwrap();
        assert_eq!((p.percent, p.completed), (40, false));
        let p = record_progress(&store, &s, m.id, 100, true, now).await.unwrap();
        assert!(p.completed);
        assert_eq!(p.sections_completed, 3);
    }

    #[test]
    fn covered_sections_invert_the_percent() {
        assert_eq!(sections_covered(0, 5), 0);
        assert_eq!(sections_covered(19, 5), 0);
        assert_eq!(sections_covered(80, 5), 4);
        assert_eq!(sections_covered(33, 3), 1);
        assert_eq!(sections_covered(66, 3), 1);
        assert_eq!(sections_covered(100, 3), 3);
        assert_eq!(sections_covered(100, 0), 0);
        for n in 1..=12 {
            for k in 0..n {
                assert_eq!(sections_covered(section_percent(k, n), n), k + 1, "n={n} k={k}");
            }
        }
    }

    #[tokio::test]
    async fn explicit_reset_can_be_worked_through_again() {
        let (store, s, m) = setup(3).await;
        let now = Utc::now();
        for k in 0..3 {
            complete_section(&store, &s, m.id, k, now).await.unwrap();
        }
        let p = record_progress(&store, &s, m.id, 0, false, now).await.unwrap();
        assert_eq!((p.percent, p.sections_completed, p.completed), (0, 0, false));
        assert!(!is_module_finished(&store, &s, &m).await.unwrap());
        let err = enter_section(&store, &s, m.id, 1).await.unwrap_err();
        assert!(matches!(err, ApiError::Locked(_)));

        for k in 0..3 {
            complete_section(&store, &s, m.id, k, now).await.unwrap();
        }
        let p = get_progress(&store, &s, m.id).await.unwrap();
        assert_eq!((p.percent, p.sections_completed, p.completed), (100, 3, true));
        assert!(is_module_finished(&store, &s, &m).await.unwrap());
    }

    #[tokio::test]
    async fn explicit_percent_unlocks_the_sections_it_covers() {
        let (store, s, m) = setup(5).await;
        let now = Utc::now();
        let p = record_progress(&store, &s, m.id, 80, false, now).await.unwrap();
        assert_eq!(p.sections_completed, 4);
        assert!(enter_section(&store, &s, m.id, 1).await.is_ok());
        assert!(enter_section(&store, &s, m.id, 4).await.is_ok());

        let p = complete_section(&store, &s, m.id, 0, now).await.unwrap();
        assert_eq!(p.percent, 80);
        let p = complete_section(&store, &s, m.id, 4, now).await.unwrap();
        assert_eq!((p.percent, p.completed), (100, true));
    }

    #[tokio::test]
    async fn last_section_closes_out_a_stale_row() {
        let (store, s, m) = setup(3).await;
        let now = Utc::now();
        store
            .upsert_progress(&Progress {
                sections_completed: 3,
                ..blank(&s, m.id, now)
            })
            .await
            .unwrap();
        let p = complete_section(&store, &s, m.id, 1, now).await.unwrap();
        assert_eq!((p.percent, p.completed), (0, false));
        let p = complete_section(&store, &s, m.id, 2, now).await.unwrap();
        assert_eq!((p.percent, p.sections_completed, p.completed), (100, 3, true));
    }

    #[tokio::test]
    async fn sectionless_modules_count_as_finished() {
        let (store, s, m) = setup(0).await;
        assert!(is_module_finished(&store, &s, &m).await.unwrap());
    }

    #[tokio::test]
    async fn summary_counts_states() {
        let store = MemoryStore::new();
        let s = Session::new(Uuid::new_v4(), Role::Security);
        let a = store.insert_module(&module_with_sections(2, vec![Role::Security])).await.unwrap();
        let b = store.insert_module(&module_with_sections(4, vec![Role::Security])).await.unwrap();
        store.insert_module(&module_with_sections(3, vec![Role::Security])).await.unwrap();
        store.insert_module(&module_with_sections(3, vec![Role::FoodService])).await.unwrap();
        let now = Utc::now();
        complete_section(&store, &s, a.id, 0, now).await.unwrap();
        complete_section(&store, &s, a.id, 1, now).await.unwrap();
        complete_section(&store, &s, b.id, 0, now).await.unwrap();

        let sum = summary(&store, &s).await.unwrap();
        assert_eq!(sum.total, 3);
        assert_eq!(sum.completed, 1);
        assert_eq!(sum.in_progress, 1);
        assert_eq!(sum.not_started, 1);
        assert_eq!(sum.overall_percent, 33);
        assert_eq!(sum.total_minutes, 135);
    }
}
