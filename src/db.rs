use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::Json, Pool, Postgres};
use uuid::Uuid;

use crate::models::{Certificate, Module, Progress, Question, Quiz, Role, Section};
use crate::store::{Store, StoreError};

pub type Db = Pool<Postgres>;

pub async fn connect(url: &str) -> Result<Db> {
    let pool = Pool::<Postgres>::connect(url).await?;
    // crate-relative path for sqlx migrations
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[derive(sqlx::FromRow)]
struct ModuleRow {
    id: Uuid,
    title: String,
    description: String,
    duration: i32,
    level: String,
    category: String,
    roles: Vec<String>,
    image_url: Option<String>,
    sections: Json<Vec<Section>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ModuleRow> for Module {
    type Error = StoreError;

    fn try_from(r: ModuleRow) -> Result<Self, Self::Error> {
        let decode = |e: crate::models::UnknownVariant| StoreError::Decode(e.to_string());
        Ok(Module {
            id: r.id,
            title: r.title,
            description: r.description,
            duration: r.duration,
            level: r.level.parse().map_err(decode)?,
            category: r.category.parse().map_err(decode)?,
            roles: r
                .roles
                .iter()
                .map(|s| s.parse::<Role>())
                .collect::<Result<_, _>>()
                .map_err(decode)?,
            image_url: r.image_url,
            sections: r.sections.0,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct QuizRow {
    id: Uuid,
    module_id: Uuid,
    title: String,
    questions: Json<Vec<Question>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<QuizRow> for Quiz {
    fn from(r: QuizRow) -> Self {
        Quiz {
            id: r.id,
            module_id: r.module_id,
            title: r.title,
            questions: r.questions.0,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ProgressRow {
    user_id: Uuid,
    module_id: Uuid,
    percent: i32,
    sections_completed: i32,
    completed: bool,
    last_accessed: DateTime<Utc>,
}

impl From<ProgressRow> for Progress {
    fn from(r: ProgressRow) -> Self {
        Progress {
            user_id: r.user_id,
            module_id: r.module_id,
            percent: r.percent,
            sections_completed: r.sections_completed,
            completed: r.completed,
            last_accessed: r.last_accessed,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CertificateRow {
    id: Uuid,
    user_id: Uuid,
    module_id: Uuid,
    score: i32,
    issue_date: DateTime<Utc>,
    expiration_date: DateTime<Utc>,
}

impl From<CertificateRow> for Certificate {
    fn from(r: CertificateRow) -> Self {
        Certificate {
            id: r.id,
            user_id: r.user_id,
            module_id: r.module_id,
            score: r.score,
            issue_date: r.issue_date,
            expiration_date: r.expiration_date,
        }
    }
}

const MODULE_COLS: &str =
    "id, title, description, duration, level, category, roles, image_url, sections, created_at, updated_at";
const QUIZ_COLS: &str = "id, module_id, title, questions, created_at, updated_at";
const PROGRESS_COLS: &str = "user_id, module_id, percent, sections_completed, completed, last_accessed";
const CERT_COLS: &str = "id, user_id, module_id, score, issue_date, expiration_date";

fn role_names(m: &Module) -> Vec<String> {
    m.roles.iter().map(|r| r.as_str().to_string()).collect()
}

fn unique_violation(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() || db.is_foreign_key_violation() => {
            StoreError::Conflict(db.message().to_string())
        }
        _ => StoreError::Database(e),
    }
}

#[async_trait]
impl Store for PgStore {
    async fn list_modules(&self) -> Result<Vec<Module>, StoreError> {
        let rows: Vec<ModuleRow> = sqlx::query_as(&format!(
            "SELECT {MODULE_COLS} FROM training_modules ORDER BY created_at, title"
        ))
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(Module::try_from).collect()
    }

    async fn get_module(&self, id: Uuid) -> Result<Option<Module>, StoreError> {
        let row: Option<ModuleRow> = sqlx::query_as(&format!(
            "SELECT {MODULE_COLS} FROM training_modules WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.map(Module::try_from).transpose()
    }

    async fn insert_module(&self, m: &Module) -> Result<Module, StoreError> {
        let row: ModuleRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO training_modules ({MODULE_COLS})
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
            RETURNING {MODULE_COLS}
            "#
        ))
        .bind(m.id)
        .bind(&m.title)
        .bind(&m.description)
        .bind(m.duration)
        .bind(m.level.as_str())
        .bind(m.category.as_str())
        .bind(role_names(m))
        .bind(&m.image_url)
        .bind(Json(&m.sections))
        .bind(m.created_at)
        .bind(m.updated_at)
        .fetch_one(&self.db)
        .await
        .map_err(unique_violation)?;
        row.try_into()
    }

    async fn update_module(&self, m: &Module) -> Result<Option<Module>, StoreError> {
        let row: Option<ModuleRow> = sqlx::query_as(&format!(
            r#"
            UPDATE training_modules
            SET title=$2, description=$3, duration=$4, level=$5, category=$6,
                roles=$7, image_url=$8, sections=$9, updated_at=$10
            WHERE id=$1
            RETURNING {MODULE_COLS}
            "#
        ))
        .bind(m.id)
        .bind(&m.title)
        .bind(&m.description)
        .bind(m.duration)
        .bind(m.level.as_str())
        .bind(m.category.as_str())
        .bind(role_names(m))
        .bind(&m.image_url)
        .bind(Json(&m.sections))
        .bind(m.updated_at)
        .fetch_optional(&self.db)
        .await?;
        row.map(Module::try_from).transpose()
    }

    async fn delete_module(&self, id: Uuid) -> Result<bool, StoreError> {
        let res = sqlx::query("DELETE FROM training_modules WHERE id=$1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn list_quizzes(&self) -> Result<Vec<Quiz>, StoreError> {
        let rows: Vec<QuizRow> = sqlx::query_as(&format!(
            "SELECT {QUIZ_COLS} FROM quizzes ORDER BY created_at, title"
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(Quiz::from).collect())
    }

    async fn get_quiz(&self, id: Uuid) -> Result<Option<Quiz>, StoreError> {
        let row: Option<QuizRow> =
            sqlx::query_as(&format!("SELECT {QUIZ_COLS} FROM quizzes WHERE id=$1"))
                .bind(id)
                .fetch_optional(&self.db)
                .await?;
        Ok(row.map(Quiz::from))
    }

    async fn quiz_for_module(&self, module_id: Uuid) -> Result<Option<Quiz>, StoreError> {
        let row: Option<QuizRow> =
            sqlx::query_as(&format!("SELECT {QUIZ_COLS} FROM quizzes WHERE module_id=$1"))
                .bind(module_id)
                .fetch_optional(&self.db)
                .await?;
        Ok(row.map(Quiz::from))
    }

    async fn insert_quiz(&self, q: &Quiz) -> Result<Quiz, StoreError> {
        let row: QuizRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO quizzes ({QUIZ_COLS}) VALUES ($1,$2,$3,$4,$5,$6)
            RETURNING {QUIZ_COLS}
            "#
        ))
        .bind(q.id)
        .bind(q.module_id)
        .bind(&q.title)
        .bind(Json(&q.questions))
        .bind(q.created_at)
        .bind(q.updated_at)
        .fetch_one(&self.db)
        .await
        .map_err(unique_violation)?;
        Ok(row.into())
    }

    async fn update_quiz(&self, q: &Quiz) -> Result<Option<Quiz>, StoreError> {
        let row: Option<QuizRow> = sqlx::query_as(&format!(
            r#"
            UPDATE quizzes SET title=$2, questions=$3, updated_at=$4
            WHERE id=$1
            RETURNING {QUIZ_COLS}
            "#
        ))
        .bind(q.id)
        .bind(&q.title)
        .bind(Json(&q.questions))
        .bind(q.updated_at)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(Quiz::from))
    }

    async fn delete_quiz(&self, id: Uuid) -> Result<bool, StoreError> {
        let res = sqlx::query("DELETE FROM quizzes WHERE id=$1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn get_progress(&self, user_id: Uuid, module_id: Uuid) -> Result<Option<Progress>, StoreError> {
        let row: Option<ProgressRow> = sqlx::query_as(&format!(
            "SELECT {PROGRESS_COLS} FROM user_progress WHERE user_id=$1 AND module_id=$2"
        ))
        .bind(user_id)
        .bind(module_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(Progress::from))
    }

    async fn list_progress(&self, user_id: Uuid) -> Result<Vec<Progress>, StoreError> {
        let rows: Vec<ProgressRow> = sqlx::query_as(&format!(
            "SELECT {PROGRESS_COLS} FROM user_progress WHERE user_id=$1"
        ))
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(Progress::from).collect())
    }

    async fn upsert_progress(&self, p: &Progress) -> Result<Progress, StoreError> {
        let row: ProgressRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO user_progress ({PROGRESS_COLS})
            VALUES ($1,$2,$3,$4,$5,$6)
            ON CONFLICT (user_id, module_id)
            DO UPDATE SET percent=EXCLUDED.percent,
                          sections_completed=EXCLUDED.sections_completed,
                          completed=EXCLUDED.completed,
                          last_accessed=EXCLUDED.last_accessed
            RETURNING {PROGRESS_COLS}
            "#
        ))
        .bind(p.user_id)
        .bind(p.module_id)
        .bind(p.percent)
        .bind(p.sections_completed)
        .bind(p.completed)
        .bind(p.last_accessed)
        .fetch_one(&self.db)
        .await
        .map_err(unique_violation)?;
        Ok(row.into())
    }

    async fn get_certificate(&self, user_id: Uuid, module_id: Uuid) -> Result<Option<Certificate>, StoreError> {
        let row: Option<CertificateRow> = sqlx::query_as(&format!(
            "SELECT {CERT_COLS} FROM certificates WHERE user_id=$1 AND module_id=$2"
        ))
        .bind(user_id)
        .bind(module_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(Certificate::from))
    }

    async fn list_certificates(&self, user_id: Uuid) -> Result<Vec<Certificate>, StoreError> {
        let rows: Vec<CertificateRow> = sqlx::query_as(&format!(
            "SELECT {CERT_COLS} FROM certificates WHERE user_id=$1 ORDER BY issue_date DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(Certificate::from).collect())
    }

    async fn upsert_certificate(&self, c: &Certificate) -> Result<Certificate, StoreError> {
        let row: CertificateRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO certificates ({CERT_COLS})
            VALUES ($1,$2,$3,$4,$5,$6)
            ON CONFLICT (user_id, module_id)
            DO UPDATE SET score=EXCLUDED.score,
                          issue_date=EXCLUDED.issue_date,
                          expiration_date=EXCLUDED.expiration_date
            RETURNING {CERT_COLS}
            "#
        ))
        .bind(c.id)
        .bind(c.user_id)
        .bind(c.module_id)
        .bind(c.score)
        .bind(c.issue_date)
        .bind(c.expiration_date)
        .fetch_one(&self.db)
        .await
        .map_err(unique_violation)?;
        Ok(row.into())
    }
}
