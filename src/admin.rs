//! Administrator CRUD over modules and quizzes.
//!
//! Only field presence is validated. A module's declared duration is stored as
//! given and never compared with its sections. Deletes take effect at once.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

use crate::catalog;
use crate::error::ApiError;
use crate::models::{Category, Level, Module, ModuleReq, Question, Quiz, QuizReq, Role};
use crate::session::Session;
use crate::store::Store;

fn present(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

struct ModuleFields {
    title: String,
    description: String,
    duration: i32,
    level: Level,
    category: Category,
    roles: Vec<Role>,
}

fn check_module(req: &ModuleReq) -> Result<ModuleFields, ApiError> {
    let mut errors = Vec::new();

    let title = present(&req.title);
    if title.is_none() {
        errors.push("title is required".to_string());
    }
    let description = present(&req.description);
    if description.is_none() {
        errors.push("description is required".to_string());
    }
    let category = match present(&req.category) {
        None => {
            errors.push("category is required".to_string());
            None
        }
        Some(c) => c.parse::<Category>().map_err(|e| errors.push(e.to_string())).ok(),
    };
    let level = match present(&req.level) {
        None => {
            errors.push("level is required".to_string());
            None
        }
        Some(l) => l.parse::<Level>().map_err(|e| errors.push(e.to_string())).ok(),
    };

    let mut roles = Vec::new();
    for r in &req.roles {
        match r.trim().parse::<Role>() {
            Ok(role) if !roles.contains(&role) => roles.push(role),
            Ok(_) => {}
            Err(e) => errors.push(e.to_string()),
        }
    }
    if req.roles.is_empty() {
        errors.push("at least one role is required".to_string());
    }
    let duration = req.duration.unwrap_or(0);
    if duration < 0 {
        errors.push("duration cannot be negative".to_string());
    }

    match (title, description, category, level) {
        (Some(t), Some(d), Some(c), Some(l)) if errors.is_empty() => Ok(ModuleFields {
            title: t.to_string(),
            description: d.to_string(),
            duration,
            level: l,
            category: c,
            roles,
        }),
        _ => Err(ApiError::Validation(errors)),
    }
}

pub async fn create_module(
    store: &dyn Store,
    session: &Session,
    req: &ModuleReq,
    now: DateTime<Utc>,
) -> Result<Module, ApiError> {
    session.require_admin()?;
    let f = check_module(req)?;
    let module = Module {
        id: Uuid::new_v4(),
        title: f.title,
        description: f.description,
        duration: f.duration,
        level: f.level,
        category: f.category,
        roles: f.roles,
        image_url: req.image_url.clone(),
        sections: req.sections.clone(),
        created_at: now,
        updated_at: now,
    };
    let saved = store.insert_module(&module).await?;
    tracing::info!(module = %saved.id, title = %saved.title, "module created");
    Ok(saved)
}

pub async fn update_module(
    store: &dyn Store,
    session: &Session,
    id: Uuid,
    req: &ModuleReq,
    now: DateTime<Utc>,
) -> Result<Module, ApiError> {
    session.require_admin()?;
    let f = check_module(req)?;
    let existing = catalog::get_module(store, id).await?;
    let module = Module {
        title: f.title,
        description: f.description,
        duration: f.duration,
        level: f.level,
        category: f.category,
        roles: f.roles,
        image_url: req.image_url.clone(),
        sections: req.sections.clone(),
        updated_at: now,
        ..existing
    };
    store
        .update_module(&module)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("module {id}")))
}

pub async fn delete_module(store: &dyn Store, session: &Session, id: Uuid) -> Result<(), ApiError> {
    session.require_admin()?;
    if !store.delete_module(id).await? {
        return Err(ApiError::not_found(format!("module {id}")));
    }
    tracing::info!(module = %id, "module deleted");
    Ok(())
}

pub async fn list_modules(store: &dyn Store, session: &Session) -> Result<Vec<Module>, ApiError> {
    session.require_admin()?;
    Ok(store.list_modules().await?)
}

/// Every question needs text, two or more options with unique ids, and
/// exactly one correct option. Question ids must be unique too.
pub fn check_questions(questions: &[Question]) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    if questions.is_empty() {
        errors.push("at least one question is required".to_string());
    }
    let mut ids = HashSet::new();
    for (i, q) in questions.iter().enumerate() {
        let label = if q.id.trim().is_empty() {
            errors.push(format!("question {} has no id", i + 1));
            format!("question {}", i + 1)
        } else {
            if !ids.insert(q.id.as_str()) {
                errors.push(format!("question id `{}` is used twice", q.id));
            }
            format!("question `{}`", q.id)
        };
        if q.text.trim().is_empty() {
            errors.push(format!("{label} has no text"));
        }
        if q.options.len() < 2 {
            errors.push(format!("{label} needs at least two options"));
        }
        let mut option_ids = HashSet::new();
        if q.options.iter().any(|o| !option_ids.insert(o.id.as_str())) {
            errors.push(format!("{label} repeats an option id"));
        }
        let correct = q.options.iter().filter(|o| o.is_correct).count();
        if correct != 1 {
            errors.push(format!("{label} must have exactly one correct option, has {correct}"));
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_quiz(req: &QuizReq) -> Result<String, ApiError> {
    let mut errors = Vec::new();
    let title = present(&req.title);
    if title.is_none() {
        errors.push("title is required".to_string());
    }
    if let Err(mut e) = check_questions(&req.questions) {
        errors.append(&mut e);
    }
    match title {
        Some(t) if errors.is_empty() => Ok(t.to_string()),
        _ => Err(ApiError::Validation(errors)),
    }
}

pub async fn create_quiz(
    store: &dyn Store,
    session: &Session,
    req: &QuizReq,
    now: DateTime<Utc>,
) -> Result<Quiz, ApiError> {
    session.require_admin()?;
    let module_id = req
        .module_id
        .ok_or_else(|| ApiError::invalid("module_id is required"))?;
    let title = check_quiz(req)?;
    catalog::get_module(store, module_id).await?;
    let quiz = Quiz {
        id: Uuid::new_v4(),
        module_id,
        title,
        questions: req.questions.clone(),
        created_at: now,
        updated_at: now,
    };
    let saved = store.insert_quiz(&quiz).await?;
    tracing::info!(quiz = %saved.id, module = %module_id, "quiz created");
    Ok(saved)
}

/// Title and questions only; a quiz never moves to another module.
pub async fn update_quiz(
    store: &dyn Store,
    session: &Session,
    id: Uuid,
    req: &QuizReq,
    now: DateTime<Utc>,
) -> Result<Quiz, ApiError> {
    session.require_admin()?;
    let title = check_quiz(req)?;
    let existing = store
        .get_quiz(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("quiz {id}")))?;
    if req.module_id.is_some_and(|m| m != existing.module_id) {
        return Err(ApiError::invalid("module_id cannot be changed"));
    }
    let quiz = Quiz {
        title,
        questions: req.questions.clone(),
        updated_at: now,
        ..existing
    };
    store
        .update_quiz(&quiz)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("quiz {id}")))
}

pub async fn delete_quiz(store: &dyn Store, session: &Session, id: Uuid) -> Result<(), ApiError> {
    session.require_admin()?;
    if !store.delete_quiz(id).await? {
        return Err(ApiError::not_found(format!("quiz {id}")));
    }
    tracing::info!(quiz = %id, "quiz deleted");
    Ok(())
}

pub async fn list_quizzes(store: &dyn Store, session: &Session) -> Result<Vec<Quiz>, ApiError> {
    session.require_admin()?;
    Ok(store.list_quizzes().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QuizOption, Section};
    use crate::store::{fixtures::quiz_for, MemoryStore};

    fn admin() -> Session {
        Session::new(Uuid::new_v4(), Role::Admin)
    }

    fn module_req() -> ModuleReq {
        ModuleReq {
            title: Some("Fire Alarm Systems".into()),
            description: Some("How the alarm panel works".into()),
            duration: Some(45),
            level: Some("intermediate".into()),
            category: Some("equipment".into()),
            roles: vec!["security".into(), "maintenance".into(), "security".into()],
            image_url: None,
            sections: vec![Section { title: "Panels".into(), duration: 999, content: "zones".into() }],
        }
    }

    #[tokio::test]
    async fn creates_and_updates_a_module() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let m = create_module(&store, &admin(), &module_req(), now).await.unwrap();
        assert_eq!(m.roles, vec![Role::Security, Role::Maintenance]);
        // declared duration is kept even though the section says otherwise
        assert_eq!(m.duration, 45);

        let mut req = module_req();
        req.title = Some("Fire Alarm Panels".into());
        let later = now + chrono::Duration::minutes(5);
        let u = update_module(&store, &admin(), m.id, &req, later).await.unwrap();
        assert_eq!(u.title, "Fire Alarm Panels");
        assert_eq!(u.created_at, m.created_at);
        assert_eq!(u.updated_at, later);
    }

    #[tokio::test]
    async fn reports_every_missing_field() {
        let store = MemoryStore::new();
        let req = ModuleReq { title: Some("   ".into()), ..Default::default() };
        let err = create_module(&store, &admin(), &req, Utc::now()).await.unwrap_err();
        match err {
            ApiError::Validation(errors) => {
                assert_eq!(errors.len(), 5, "{errors:?}");
                assert!(errors.contains(&"at least one role is required".to_string()));
            }
            other => panic!("unexpected {other:?}"),
        }

        let mut bad = module_req();
        bad.category = Some("plumbing".into());
        bad.roles = vec!["chef".into()];
        let err = create_module(&store, &admin(), &bad, Utc::now()).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(ref e) if e.len() == 2));
    }

    #[tokio::test]
    async fn non_admins_are_refused() {
        let store = MemoryStore::new();
        let manager = Session::new(Uuid::new_v4(), Role::Manager);
        let err = create_module(&store, &manager, &module_req(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
        assert!(list_quizzes(&store, &manager).await.is_err());
    }

    #[tokio::test]
    async fn quiz_crud_with_one_quiz_per_module() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let m = create_module(&store, &admin(), &module_req(), now).await.unwrap();
        let template = quiz_for(m.id, 2);
        let req = QuizReq {
            module_id: Some(m.id),
            title: Some("Alarm quiz".into()),
            questions: template.questions.clone(),
        };
        let q = create_quiz(&store, &admin(), &req, now).await.unwrap();
        let err = create_quiz(&store, &admin(), &req, now).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        let mut edit = req.clone();
        edit.title = Some("Alarm panel quiz".into());
        let u = update_quiz(&store, &admin(), q.id, &edit, now).await.unwrap();
        assert_eq!(u.title, "Alarm panel quiz");
        edit.module_id = Some(Uuid::new_v4());
        assert!(update_quiz(&store, &admin(), q.id, &edit, now).await.is_err());

        delete_quiz(&store, &admin(), q.id).await.unwrap();
        let err = delete_quiz(&store, &admin(), q.id).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn quiz_for_missing_module_is_not_found() {
        let store = MemoryStore::new();
        let req = QuizReq {
            module_id: Some(Uuid::new_v4()),
            title: Some("Orphan".into()),
            questions: quiz_for(Uuid::nil(), 1).questions,
        };
        let err = create_quiz(&store, &admin(), &req, Utc::now()).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn questions_need_exactly_one_correct_option() {
        let mut qs = quiz_for(Uuid::nil(), 2).questions;
        assert!(check_questions(&qs).is_ok());
        qs[0].options.push(QuizOption { id: "d".into(), text: "also right".into(), is_correct: true });
        qs[1].id = qs[0].id.clone();
        qs[1].options.truncate(1);
        let errors = check_questions(&qs).unwrap_err();
        assert_eq!(errors.len(), 3, "{errors:?}");
        assert!(check_questions(&[]).is_err());
    }

    #[tokio::test]
    async fn deleting_unknown_module_is_not_found() {
        let store = MemoryStore::new();
        let err = delete_module(&store, &admin(), Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
