//! The row store behind the service.
//!
//! Everything the training workflow persists goes through [`Store`]: equality
//! lookups, inserts, updates, deletes and upserts keyed by
//! `(user_id, module_id)`. Upserts are last-write-wins; there is no version
//! column and concurrent writers for the same key simply overwrite each other.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Certificate, Module, Progress, Quiz};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned {status}: {body}")]
    Backend { status: u16, body: String },
    #[error("malformed record: {0}")]
    Decode(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn list_modules(&self) -> Result<Vec<Module>, StoreError>;
    async fn get_module(&self, id: Uuid) -> Result<Option<Module>, StoreError>;
    async fn insert_module(&self, module: &Module) -> Result<Module, StoreError>;
    /// `None` when no module has that id.
    async fn update_module(&self, module: &Module) -> Result<Option<Module>, StoreError>;
    /// Removes the module and everything keyed on it. Returns whether a row existed.
    async fn delete_module(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn list_quizzes(&self) -> Result<Vec<Quiz>, StoreError>;
    async fn get_quiz(&self, id: Uuid) -> Result<Option<Quiz>, StoreError>;
    async fn quiz_for_module(&self, module_id: Uuid) -> Result<Option<Quiz>, StoreError>;
    /// Fails with [`StoreError::Conflict`] when the module already has a quiz.
    async fn insert_quiz(&self, quiz: &Quiz) -> Result<Quiz, StoreError>;
    async fn update_quiz(&self, quiz: &Quiz) -> Result<Option<Quiz>, StoreError>;
    async fn delete_quiz(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn get_progress(&self, user_id: Uuid, module_id: Uuid) -> Result<Option<Progress>, StoreError>;
    async fn list_progress(&self, user_id: Uuid) -> Result<Vec<Progress>, StoreError>;
    async fn upsert_progress(&self, progress: &Progress) -> Result<Progress, StoreError>;

    async fn get_certificate(&self, user_id: Uuid, module_id: Uuid) -> Result<Option<Certificate>, StoreError>;
    async fn list_certificates(&self, user_id: Uuid) -> Result<Vec<Certificate>, StoreError>;
    async fn upsert_certificate(&self, cert: &Certificate) -> Result<Certificate, StoreError>;
}

#[derive(Default)]
struct Tables {
    modules: HashMap<Uuid, Module>,
    quizzes: HashMap<Uuid, Quiz>,
    progress: HashMap<(Uuid, Uuid), Progress>,
    certificates: HashMap<(Uuid, Uuid), Certificate>,
}

/// Process-local store. Used by `STORE=memory` and by the tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_modules(&self) -> Result<Vec<Module>, StoreError> {
        let t = self.tables.read().await;
        let mut out: Vec<Module> = t.modules.values().cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.title.cmp(&b.title)));
        Ok(out)
    }

    async fn get_module(&self, id: Uuid) -> Result<Option<Module>, StoreError> {
        Ok(self.tables.read().await.modules.get(&id).cloned())
    }

    async fn insert_module(&self, module: &Module) -> Result<Module, StoreError> {
        let mut t = self.tables.write().await;
        if t.modules.contains_key(&module.id) {
            return Err(StoreError::Conflict(format!("module {} exists", module.id)));
        }
        t.modules.insert(module.id, module.clone());
        Ok(module.clone())
    }

    async fn update_module(&self, module: &Module) -> Result<Option<Module>, StoreError> {
        let mut t = self.tables.write().await;
        match t.modules.get_mut(&module.id) {
            Some(row) => {
                *row = module.clone();
                Ok(Some(module.clone()))
            }
            None => Ok(None),
        }
    }

    async fn delete_module(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut t = self.tables.write().await;
        let existed = t.modules.remove(&id).is_some();
        t.quizzes.retain(|_, q| q.module_id != id);
        t.progress.retain(|(_, m), _| *m != id);
        t.certificates.retain(|(_, m), _| *m != id);
        Ok(existed)
    }

    async fn list_quizzes(&self) -> Result<Vec<Quiz>, StoreError> {
        let t = self.tables.read().await;
        let mut out: Vec<Quiz> = t.quizzes.values().cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.title.cmp(&b.title)));
        Ok(out)
    }

    async fn get_quiz(&self, id: Uuid) -> Result<Option<Quiz>, StoreError> {
        Ok(self.tables.read().await.quizzes.get(&id).cloned())
    }

    async fn quiz_for_module(&self, module_id: Uuid) -> Result<Option<Quiz>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.quizzes.values().find(|q| q.module_id == module_id).cloned())
    }

    async fn insert_quiz(&self, quiz: &Quiz) -> Result<Quiz, StoreError> {
        let mut t = self.tables.write().await;
        if !t.modules.contains_key(&quiz.module_id) {
            return Err(StoreError::Conflict(format!("module {} does not exist", quiz.module_id)));
        }
        if t.quizzes.values().any(|q| q.module_id == quiz.module_id) {
            return Err(StoreError::Conflict(format!(
                "module {} already has a quiz",
                quiz.module_id
            )));
        }
        t.quizzes.insert(quiz.id, quiz.clone());
        Ok(quiz.clone())
    }

    async fn update_quiz(&self, quiz: &Quiz) -> Result<Option<Quiz>, StoreError> {
        let mut t = self.tables.write().await;
        match t.quizzes.get_mut(&quiz.id) {
            Some(row) => {
                *row = quiz.clone();
                Ok(Some(quiz.clone()))
            }
            None => Ok(None),
        }
    }

    async fn delete_quiz(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.tables.write().await.quizzes.remove(&id).is_some())
    }

    async fn get_progress(&self, user_id: Uuid, module_id: Uuid) -> Result<Option<Progress>, StoreError> {
        Ok(self.tables.read().await.progress.get(&(user_id, module_id)).cloned())
    }

    async fn list_progress(&self, user_id: Uuid) -> Result<Vec<Progress>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.progress.values().filter(|p| p.user_id == user_id).cloned().collect())
    }

    async fn upsert_progress(&self, progress: &Progress) -> Result<Progress, StoreError> {
        let mut t = self.tables.write().await;
        t.progress
            .insert((progress.user_id, progress.module_id), progress.clone());
        Ok(progress.clone())
    }

    async fn get_certificate(&self, user_id: Uuid, module_id: Uuid) -> Result<Option<Certificate>, StoreError> {
        Ok(self.tables.read().await.certificates.get(&(user_id, module_id)).cloned())
    }

    async fn list_certificates(&self, user_id: Uuid) -> Result<Vec<Certificate>, StoreError> {
        let t = self.tables.read().await;
        let mut out: Vec<Certificate> = t
            .certificates
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.issue_date.cmp(&a.issue_date));
        Ok(out)
    }

    async fn upsert_certificate(&self, cert: &Certificate) -> Result<Certificate, StoreError> {
        let mut t = self.tables.write().await;
        let key = (cert.user_id, cert.module_id);
        // the row keeps its original id, like ON CONFLICT DO UPDATE does
        let stored = match t.certificates.get(&key) {
            Some(existing) => Certificate { id: existing.id, ..cert.clone() },
            None => cert.clone(),
        };
        t.certificates.insert(key, stored.clone());
        Ok(stored)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::Utc;
    use uuid::Uuid;

    use crate::models::*;

    pub fn module_with_sections(n: usize, roles: Vec<Role>) -> Module {
        let now = Utc::now();
        Module {
            id: Uuid::new_v4(),
            title: "Fire Safety Basics".into(),
            description: "fire types, prevention and basic response".into(),
            duration: 45,
            level: Level::Beginner,
            category: Category::FireSafety,
            roles,
            image_url: None,
            sections: (0..n)
                .map(|i| Section {
                    title: format!("Part {}", i + 1),
                    duration: 9,
                    content: format!("content of part {}", i + 1),
                })
                .collect(),
            created_at: now,
            updated_at: now,
        }
    }

    /// `n` questions; the correct option of every question has id `"a"`.
    pub fn quiz_for(module_id: Uuid, n: usize) -> Quiz {
        let now = Utc::now();
        Quiz {
            id: Uuid::new_v4(),
            module_id,
            title: "Fire Safety Basics quiz".into(),
            questions: (0..n)
                .map(|i| Question {
                    id: format!("q{}", i + 1),
                    text: format!("question {}", i + 1),
                    options: vec![
                        QuizOption { id: "a".into(), text: "right".into(), is_correct: true },
                        QuizOption { id: "b".into(), text: "wrong".into(), is_correct: false },
                        QuizOption { id: "c".into(), text: "also wrong".into(), is_correct: false },
                    ],
                })
                .collect(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::models::Role;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn one_quiz_per_module() {
        let store = MemoryStore::new();
        let m = store.insert_module(&module_with_sections(2, vec![Role::Security])).await.unwrap();
        store.insert_quiz(&quiz_for(m.id, 3)).await.unwrap();
        let err = store.insert_quiz(&quiz_for(m.id, 3)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn certificate_upsert_keeps_one_row_per_key() {
        let store = MemoryStore::new();
        let (user, module) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();
        let first = store
            .upsert_certificate(&Certificate {
                id: Uuid::new_v4(),
                user_id: user,
                module_id: module,
                score: 75,
                issue_date: now,
                expiration_date: now + Duration::days(365),
            })
            .await
            .unwrap();
        let second = store
            .upsert_certificate(&Certificate {
                id: Uuid::new_v4(),
                user_id: user,
                module_id: module,
                score: 90,
                issue_date: now + Duration::days(10),
                expiration_date: now + Duration::days(375),
            })
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        let all = store.list_certificates(user).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].score, 90);
    }

    #[tokio::test]
    async fn deleting_a_module_cascades() {
        let store = MemoryStore::new();
        let m = store.insert_module(&module_with_sections(1, vec![Role::Manager])).await.unwrap();
        store.insert_quiz(&quiz_for(m.id, 1)).await.unwrap();
        assert!(store.delete_module(m.id).await.unwrap());
        assert!(store.quiz_for_module(m.id).await.unwrap().is_none());
        assert!(!store.delete_module(m.id).await.unwrap());
    }
}
