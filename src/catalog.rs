use anyhow::Context;
use chrono::Utc;
use serde::Deserialize;
use std::path::Path;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::admin;
use crate::error::ApiError;
use crate::models::{CatalogQuery, Category, Level, Module, Question, Quiz, Role, Section};
use crate::session::Session;
use crate::store::Store;

const BUILTIN_SEED: &str = include_str!("../seed/modules.json");

/// Modules the learner's role is eligible for, in catalog order.
pub async fn list_for_learner(
    store: &dyn Store,
    session: &Session,
    filter: &CatalogQuery,
) -> Result<Vec<Module>, ApiError> {
    let modules = store.list_modules().await?;
    Ok(modules
        .into_iter()
        .filter(|m| m.is_eligible(session.role))
        .filter(|m| filter.category.map_or(true, |c| m.category == c))
        .filter(|m| filter.level.map_or(true, |l| m.level == l))
        .collect())
}

pub async fn get_module(store: &dyn Store, id: Uuid) -> Result<Module, ApiError> {
    store
        .get_module(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("module {id}")))
}

/// Like [`get_module`], but refuses modules the learner's role is not assigned to.
pub async fn module_for_learner(store: &dyn Store, session: &Session, id: Uuid) -> Result<Module, ApiError> {
    let module = get_module(store, id).await?;
    if !module.is_eligible(session.role) {
        return Err(ApiError::Forbidden(format!(
            "module {id} is not assigned to the {} role",
            session.role
        )));
    }
    Ok(module)
}

#[derive(Deserialize, Debug, Clone)]
struct SeedModule {
    title: String,
    description: String,
    duration: i32,
    level: Level,
    category: Category,
    roles: Vec<Role>,
    image_url: Option<String>,
    #[serde(default)]
    sections: Vec<Section>,
    quiz: Option<SeedQuiz>,
}

#[derive(Deserialize, Debug, Clone)]
struct SeedQuiz {
    title: String,
    questions: Vec<Question>,
}

fn parse_seed(json: &str) -> serde_json::Result<Vec<SeedModule>> {
    // a file holds either one module or a list of them
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<SeedModule>),
        One(Box<SeedModule>),
    }
    Ok(match serde_json::from_str(json)? {
        OneOrMany::Many(v) => v,
        OneOrMany::One(m) => vec![*m],
    })
}

fn seed_files(dir: &Path) -> anyhow::Result<Vec<SeedModule>> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(dir) {
        let e = entry.with_context(|| format!("walking {}", dir.display()))?;
        if e.file_type().is_file() && e.path().extension().is_some_and(|x| x == "json") {
            paths.push(e.path().to_path_buf());
        }
    }
    paths.sort();
    let mut out = Vec::new();
    for p in paths {
        let raw = std::fs::read_to_string(&p).with_context(|| format!("reading {}", p.display()))?;
        out.extend(parse_seed(&raw).with_context(|| format!("parsing {}", p.display()))?);
    }
    Ok(out)
}

/// Imports the initial catalog when the store holds no modules yet.
/// Returns how many modules were written.
pub async fn seed_if_empty(store: &dyn Store, seed_dir: Option<&Path>) -> anyhow::Result<usize> {
    if !store.list_modules().await?.is_empty() {
        tracing::debug!("catalog already populated, skipping seed");
        return Ok(0);
    }
    let mut seeds = parse_seed(BUILTIN_SEED).context("built-in seed")?;
    if let Some(dir) = seed_dir {
        seeds.extend(seed_files(dir)?);
    }

    let mut written = 0;
    for seed in seeds {
        let now = Utc::now();
        let module = Module {
            id: Uuid::new_v4(),
            title: seed.title,
            description: seed.description,
            duration: seed.duration,
            level: seed.level,
            category: seed.category,
            roles: seed.roles,
            image_url: seed.image_url,
            sections: seed.sections,
            created_at: now,
            updated_at: now,
        };
        let module = store.insert_module(&module).await?;
        if let Some(q) = seed.quiz {
            if let Err(errors) = admin::check_questions(&q.questions) {
                tracing::warn!(module = %module.title, ?errors, "skipping invalid seed quiz");
            } else {
                store
                    .insert_quiz(&Quiz {
                        id: Uuid::new_v4(),
                        module_id: module.id,
                        title: q.title,
                        questions: q.questions,
                        created_at: now,
                        updated_at: now,
                    })
                    .await?;
            }
        }
        written += 1;
    }
    tracing::info!(modules = written, "seeded training catalog");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{fixtures::module_with_sections, MemoryStore};

    #[tokio::test]
    async fn learners_only_see_their_roles_modules() {
        let store = MemoryStore::new();
        store.insert_module(&module_with_sections(2, vec![Role::FoodService])).await.unwrap();
        let mut evac = module_with_sections(2, vec![Role::Housekeeping, Role::Security]);
        evac.category = Category::Evacuation;
        evac.level = Level::Intermediate;
        store.insert_module(&evac).await.unwrap();

        let cook = Session::new(Uuid::new_v4(), Role::FoodService);
        let seen = list_for_learner(&store, &cook, &CatalogQuery::default()).await.unwrap();
        assert_eq!(seen.len(), 1);

        let admin = Session::new(Uuid::new_v4(), Role::Admin);
        let all = list_for_learner(&store, &admin, &CatalogQuery::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let only_evac = CatalogQuery { category: Some(Category::Evacuation), level: None };
        let filtered = list_for_learner(&store, &admin, &only_evac).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, evac.id);

        let advanced = CatalogQuery { category: None, level: Some(Level::Advanced) };
        assert!(list_for_learner(&store, &admin, &advanced).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ineligible_learner_is_refused() {
        let store = MemoryStore::new();
        let m = store.insert_module(&module_with_sections(1, vec![Role::Maintenance])).await.unwrap();
        let clerk = Session::new(Uuid::new_v4(), Role::Receptionist);
        let err = module_for_learner(&store, &clerk, m.id).await.unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
        let err = get_module(&store, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn seeds_builtin_catalog_once() {
        let store = MemoryStore::new();
        let n = seed_if_empty(&store, None).await.unwrap();
        assert_eq!(n, 5);
        let modules = store.list_modules().await.unwrap();
        let basics = modules.iter().find(|m| m.title == "Fire Safety Basics").unwrap();
        assert_eq!(basics.sections.len(), 5);
        let quiz = store.quiz_for_module(basics.id).await.unwrap().unwrap();
        assert_eq!(quiz.questions.len(), 5);

        assert_eq!(seed_if_empty(&store, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn seeds_extra_modules_from_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("kitchen");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            nested.join("grease.json"),
            r#"{
                "title": "Kitchen Fire Prevention",
                "description": "Grease fires and equipment hazards.",
                "duration": 60,
                "level": "intermediate",
                "category": "fire_safety",
                "roles": ["food_service", "manager"],
                "sections": [{ "title": "Grease fires", "duration": 30, "content": "Smother, never water." }]
            }"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = MemoryStore::new();
        let n = seed_if_empty(&store, Some(dir.path())).await.unwrap();
        assert_eq!(n, 6);
        let modules = store.list_modules().await.unwrap();
        assert!(modules.iter().any(|m| m.title == "Kitchen Fire Prevention"));
    }
}
