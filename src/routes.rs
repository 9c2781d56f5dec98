use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    admin, catalog,
    certificate::{self, CertificateQuery, CertificateView},
    error::ApiError,
    models::*,
    progress::{self, Summary},
    quiz::{self, AttemptOutcome, QuizAvailability, QuizRuns, RunView, Step},
    session::Session,
    store::Store,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub runs: Arc<QuizRuns>,
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(store: Arc<dyn Store>) -> Router {
    Router::new()
        // learner
        .route("/api/me", get(me))
        .route("/api/modules", get(list_modules))
        .route("/api/modules/:module_id", get(get_module))
        .route("/api/modules/:module_id/progress", get(get_progress).put(put_progress))
        .route("/api/modules/:module_id/sections/:index", get(enter_section))
        .route("/api/modules/:module_id/sections/:index/complete", post(complete_section))
        .route("/api/modules/:module_id/quiz", get(get_quiz))
        .route("/api/modules/:module_id/quiz/attempts", post(submit_quiz))
        .route("/api/modules/:module_id/quiz/run", get(view_run).post(start_run))
        .route("/api/modules/:module_id/quiz/run/answers", put(answer_run))
        .route("/api/modules/:module_id/quiz/run/next", post(next_question))
        .route("/api/modules/:module_id/quiz/run/previous", post(previous_question))
        .route("/api/modules/:module_id/quiz/run/questions/:index", post(jump_to_question))
        .route("/api/modules/:module_id/quiz/run/submit", post(submit_run))
        .route("/api/modules/:module_id/quiz/run/retake", post(retake_run))
        .route("/api/modules/:module_id/certificate", get(get_certificate))
        .route("/api/progress", get(progress_summary))
        .route("/api/certificates", get(list_certificates))
        // admin
        .route("/api/admin/modules", get(admin_list_modules).post(admin_create_module))
        .route("/api/admin/modules/:module_id", put(admin_update_module).delete(admin_delete_module))
        .route("/api/admin/quizzes", get(admin_list_quizzes).post(admin_create_quiz))
        .route("/api/admin/quizzes/:quiz_id", put(admin_update_quiz).delete(admin_delete_quiz))
        .with_state(AppState { store, runs: Arc::new(QuizRuns::new()) })
}

#[derive(Serialize)]
struct Me {
    user_id: Uuid,
    email: Option<String>,
    role: Role,
    is_admin: bool,
}

async fn me(session: Session) -> Json<Me> {
    Json(Me {
        user_id: session.user_id,
        is_admin: session.is_admin(),
        email: session.email,
        role: session.role,
    })
}

async fn list_modules(
    State(st): State<AppState>,
    session: Session,
    Query(filter): Query<CatalogQuery>,
) -> ApiResult<Vec<Module>> {
    Ok(Json(catalog::list_for_learner(st.store.as_ref(), &session, &filter).await?))
}

async fn get_module(
    State(st): State<AppState>,
    session: Session,
    Path(module_id): Path<Uuid>,
) -> ApiResult<Module> {
    Ok(Json(catalog::module_for_learner(st.store.as_ref(), &session, module_id).await?))
}

async fn get_progress(
    State(st): State<AppState>,
    session: Session,
    Path(module_id): Path<Uuid>,
) -> ApiResult<Progress> {
    Ok(Json(progress::get_progress(st.store.as_ref(), &session, module_id).await?))
}

async fn put_progress(
    State(st): State<AppState>,
    session: Session,
    Path(module_id): Path<Uuid>,
    Json(req): Json<ProgressReq>,
) -> ApiResult<Progress> {
    let p = progress::record_progress(
        st.store.as_ref(),
        &session,
        module_id,
        req.percent,
        req.completed,
        Utc::now(),
    )
    .await?;
    Ok(Json(p))
}

async fn enter_section(
    State(st): State<AppState>,
    session: Session,
    Path((module_id, index)): Path<(Uuid, usize)>,
) -> ApiResult<Section> {
    Ok(Json(progress::enter_section(st.store.as_ref(), &session, module_id, index).await?))
}

async fn complete_section(
    State(st): State<AppState>,
    session: Session,
    Path((module_id, index)): Path<(Uuid, usize)>,
) -> ApiResult<Progress> {
    let p = progress::complete_section(st.store.as_ref(), &session, module_id, index, Utc::now()).await?;
    Ok(Json(p))
}

async fn get_quiz(
    State(st): State<AppState>,
    session: Session,
    Path(module_id): Path<Uuid>,
) -> ApiResult<QuizAvailability> {
    Ok(Json(quiz::quiz_for_learner(st.store.as_ref(), &session, module_id).await?))
}

async fn submit_quiz(
    State(st): State<AppState>,
    session: Session,
    Path(module_id): Path<Uuid>,
    Json(sub): Json<QuizSubmission>,
) -> ApiResult<AttemptOutcome> {
    let out = quiz::submit_attempt(st.store.as_ref(), &session, module_id, &sub, Utc::now()).await?;
    Ok(Json(out))
}

async fn start_run(
    State(st): State<AppState>,
    session: Session,
    Path(module_id): Path<Uuid>,
) -> ApiResult<RunView> {
    Ok(Json(st.runs.start(st.store.as_ref(), &session, module_id).await?))
}

async fn view_run(State(st): State<AppState>, session: Session, Path(module_id): Path<Uuid>) -> ApiResult<RunView> {
    Ok(Json(st.runs.view(&session, module_id).await?))
}

async fn answer_run(
    State(st): State<AppState>,
    session: Session,
    Path(module_id): Path<Uuid>,
    Json(req): Json<AnswerReq>,
) -> ApiResult<RunView> {
    Ok(Json(st.runs.answer(&session, module_id, &req.question_id, &req.option_id).await?))
}

async fn next_question(
    State(st): State<AppState>,
    session: Session,
    Path(module_id): Path<Uuid>,
) -> ApiResult<RunView> {
    Ok(Json(st.runs.step(&session, module_id, Step::Next).await?))
}

async fn previous_question(
    State(st): State<AppState>,
    session: Session,
    Path(module_id): Path<Uuid>,
) -> ApiResult<RunView> {
    Ok(Json(st.runs.step(&session, module_id, Step::Previous).await?))
}

async fn jump_to_question(
    State(st): State<AppState>,
    session: Session,
    Path((module_id, index)): Path<(Uuid, usize)>,
) -> ApiResult<RunView> {
    Ok(Json(st.runs.step(&session, module_id, Step::To(index)).await?))
}

async fn submit_run(
    State(st): State<AppState>,
    session: Session,
    Path(module_id): Path<Uuid>,
) -> ApiResult<AttemptOutcome> {
    Ok(Json(st.runs.submit(st.store.as_ref(), &session, module_id, Utc::now()).await?))
}

async fn retake_run(State(st): State<AppState>, session: Session, Path(module_id): Path<Uuid>) -> ApiResult<RunView> {
    Ok(Json(st.runs.retake(&session, module_id).await?))
}

async fn get_certificate(
    State(st): State<AppState>,
    session: Session,
    Path(module_id): Path<Uuid>,
) -> ApiResult<Option<CertificateView>> {
    Ok(Json(
        certificate::get_for_learner(st.store.as_ref(), &session, module_id, Utc::now()).await?,
    ))
}

async fn progress_summary(State(st): State<AppState>, session: Session) -> ApiResult<Summary> {
    Ok(Json(progress::summary(st.store.as_ref(), &session).await?))
}

async fn list_certificates(
    State(st): State<AppState>,
    session: Session,
    Query(filter): Query<CertificateQuery>,
) -> ApiResult<Vec<CertificateView>> {
    Ok(Json(
        certificate::list_for_learner(st.store.as_ref(), &session, &filter, Utc::now()).await?,
    ))
}

// --- admin ---

async fn admin_list_modules(State(st): State<AppState>, session: Session) -> ApiResult<Vec<Module>> {
    Ok(Json(admin::list_modules(st.store.as_ref(), &session).await?))
}

async fn admin_create_module(
    State(st): State<AppState>,
    session: Session,
    Json(req): Json<ModuleReq>,
) -> Result<(StatusCode, Json<Module>), ApiError> {
    let m = admin::create_module(st.store.as_ref(), &session, &req, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(m)))
}

async fn admin_update_module(
    State(st): State<AppState>,
    session: Session,
    Path(module_id): Path<Uuid>,
    Json(req): Json<ModuleReq>,
) -> ApiResult<Module> {
    Ok(Json(
        admin::update_module(st.store.as_ref(), &session, module_id, &req, Utc::now()).await?,
    ))
}

async fn admin_delete_module(
    State(st): State<AppState>,
    session: Session,
    Path(module_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    admin::delete_module(st.store.as_ref(), &session, module_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn admin_list_quizzes(State(st): State<AppState>, session: Session) -> ApiResult<Vec<Quiz>> {
    Ok(Json(admin::list_quizzes(st.store.as_ref(), &session).await?))
}

async fn admin_create_quiz(
    State(st): State<AppState>,
    session: Session,
    Json(req): Json<QuizReq>,
) -> Result<(StatusCode, Json<Quiz>), ApiError> {
    let q = admin::create_quiz(st.store.as_ref(), &session, &req, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(q)))
}

async fn admin_update_quiz(
    State(st): State<AppState>,
    session: Session,
    Path(quiz_id): Path<Uuid>,
    Json(req): Json<QuizReq>,
) -> ApiResult<Quiz> {
    Ok(Json(
        admin::update_quiz(st.store.as_ref(), &session, quiz_id, &req, Utc::now()).await?,
    ))
}

async fn admin_delete_quiz(
    State(st): State<AppState>,
    session: Session,
    Path(quiz_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    admin::delete_quiz(st.store.as_ref(), &session, quiz_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
