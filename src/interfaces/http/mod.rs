use crate::application::use_cases::document_generation::{ProtocolOutput, ProtocolRequest};
use crate::application::{DocumentGenerationService, DraftService, VisibilityResolver};
use crate::domain::answer::AnswerMap;
use crate::domain::document::{CellMapping, CellWriteResponse, InspectionItemAnswer};
use crate::domain::error::AppError;
use crate::domain::language::Language;
use crate::domain::question::QuestionDefinition;
use crate::domain::template::{
    LoadStrategy, TemplateQuery, TemplateRegistryDocument, TemplateSource,
};
use actix_cors::Cors;
use actix_web::{
    delete, dev::Server, get, http::StatusCode, post, put, web, App, HttpResponse, HttpServer,
    Responder,
};
use base64::Engine as _;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use validator::Validate;

const LOG_CAPACITY: usize = 100;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogEntry {
    pub time: String,
    pub level: String,
    pub source: String,
    pub message: String,
}

pub struct HttpState {
    pub documents: Arc<DocumentGenerationService>,
    pub drafts: Arc<DraftService>,
    pub visibility: Arc<VisibilityResolver>,
    pub logs: Arc<Mutex<Vec<LogEntry>>>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityRequest {
    #[validate(length(min = 1, message = "at least one question is required"))]
    pub questions: Vec<QuestionDefinition>,
    #[serde(default)]
    pub answers: AnswerMap,
    #[serde(default = "default_true")]
    pub fill_if_empty: bool,
}

#[derive(Debug, Deserialize)]
pub struct LanguageQuery {
    #[serde(default)]
    pub language: Language,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolBody {
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    pub answers: AnswerMap,
    /// Answers are taken from this draft when the body carries none.
    #[serde(default)]
    #[validate(length(min = 1, max = 128))]
    pub session_id: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1))]
    pub template_id: Option<String>,
    #[serde(default)]
    pub strategy: Option<LoadStrategy>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GroundingBody {
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[validate(length(min = 1, message = "at least one inspection item is required"))]
    pub items: Vec<InspectionItemAnswer>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CellWriteBody {
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    #[validate(length(min = 1))]
    pub template_id: Option<String>,
    #[validate(length(min = 1, message = "at least one mapping is required"))]
    pub mappings: Vec<CellMapping>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftAnswersBody {
    #[serde(default)]
    pub language: Language,
    pub answers: AnswerMap,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VisibilityResponse {
    #[serde(flatten)]
    outcome: crate::application::use_cases::visibility::VisibilityOutcome,
    answers: AnswerMap,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentResponse<R: Serialize> {
    file_name: String,
    content_type: &'static str,
    /// Base64 of the document bytes.
    data: String,
    report: R,
    #[serde(skip_serializing_if = "Option::is_none")]
    template_source: Option<TemplateSource>,
    used_fallback: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CellWriteResult {
    #[serde(flatten)]
    response: CellWriteResponse,
    workbook: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResolvedTemplateResponse {
    file_name: String,
    source: TemplateSource,
    used_fallback: bool,
    size: usize,
    data: String,
}

fn default_true() -> bool {
    true
}

fn encode(bytes: &[u8]) -> String {
    base64::prelude::BASE64_STANDARD.encode(bytes)
}

fn check<T: Validate>(body: &T) -> Result<(), AppError> {
    body.validate()
        .map_err(|e| AppError::ValidationError(e.to_string()))
}

fn error_status(err: &AppError) -> StatusCode {
    match err {
        AppError::ValidationError(_) | AppError::ParseError(_) => StatusCode::BAD_REQUEST,
        AppError::NotFound(_) => StatusCode::NOT_FOUND,
        AppError::ConfigurationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AppError::RenderError(_) | AppError::StorageError(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure(logs: &Mutex<Vec<LogEntry>>, context: &str, err: AppError) -> HttpResponse {
    let status = error_status(&err);
    let level = if status.is_server_error() { "ERROR" } else { "WARN" };
    add_log(logs, level, "HttpApi", &format!("{}: {}", context, err));
    HttpResponse::build(status).json(serde_json::json!({ "error": err.to_string() }))
}

fn protocol_response(output: ProtocolOutput) -> HttpResponse {
    HttpResponse::Ok().json(DocumentResponse {
        file_name: output.document.file_name,
        content_type: output.document.content_type,
        data: encode(&output.document.bytes),
        report: output.report,
        template_source: Some(output.template_source),
        used_fallback: output.used_fallback,
    })
}

/// Falls back to the stored draft when the body brings no answers.
async fn protocol_request(data: &HttpState, body: ProtocolBody) -> Result<ProtocolRequest, AppError> {
    check(&body)?;
    let answers = match (&body.session_id, body.answers.is_empty()) {
        (Some(session_id), true) => data.drafts.get(session_id).await?.answers,
        _ => body.answers,
    };
    Ok(ProtocolRequest {
        language: body.language,
        answers,
        template_id: body.template_id,
        strategy: body.strategy,
    })
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[post("/visibility/resolve")]
async fn resolve_visibility(
    data: web::Data<HttpState>,
    req: web::Json<VisibilityRequest>,
) -> impl Responder {
    if let Err(e) = check(req.req_data()) {
        return failure(&data.logs, "Visibility request rejected", e);
    }

    let body = req.req_data();
    let (outcome, answers) = if body.fill_if_empty {
        data.visibility.resolve_and_fill(&body.questions, &body.answers)
    } else {
        (
            data.visibility.resolve(&body.questions, &body.answers),
            body.answers.clone(),
        )
    };
    HttpResponse::Ok().json(VisibilityResponse {
        outcome: outcome.as_ref().clone(),
        answers,
    })
}

#[get("/questions")]
async fn list_questions(
    data: web::Data<HttpState>,
    query: web::Query<LanguageQuery>,
) -> impl Responder {
    match data.documents.load_questions(query.language).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(e) => failure(&data.logs, "Loading questions failed", e),
    }
}

#[post("/documents/protocol")]
async fn generate_protocol(
    data: web::Data<HttpState>,
    req: web::Json<ProtocolBody>,
) -> impl Responder {
    let body = req.into_inner();
    add_log(
        &data.logs,
        "INFO",
        "HttpApi",
        &format!("Generating protocol (language={})", body.language),
    );

    let request = match protocol_request(&data, body).await {
        Ok(request) => request,
        Err(e) => return failure(&data.logs, "Protocol request rejected", e),
    };
    match data.documents.generate_protocol(request).await {
        Ok(output) => protocol_response(output),
        Err(e) => failure(&data.logs, "Protocol generation failed", e),
    }
}

#[post("/documents/protocol/pdf")]
async fn generate_protocol_pdf(
    data: web::Data<HttpState>,
    req: web::Json<ProtocolBody>,
) -> impl Responder {
    let body = req.into_inner();
    add_log(
        &data.logs,
        "INFO",
        "HttpApi",
        &format!("Generating protocol PDF (language={})", body.language),
    );

    let request = match protocol_request(&data, body).await {
        Ok(request) => request,
        Err(e) => return failure(&data.logs, "Protocol request rejected", e),
    };
    match data.documents.generate_protocol_pdf(request).await {
        Ok(output) => protocol_response(output),
        Err(e) => failure(&data.logs, "Protocol PDF generation failed", e),
    }
}

#[post("/documents/grounding")]
async fn generate_grounding(
    data: web::Data<HttpState>,
    req: web::Json<GroundingBody>,
) -> impl Responder {
    if let Err(e) = check(req.req_data()) {
        return failure(&data.logs, "Grounding request rejected", e);
    }
    let body = req.into_inner();
    add_log(
        &data.logs,
        "INFO",
        "HttpApi",
        &format!("Filling grounding form ({} items)", body.items.len()),
    );

    match data
        .documents
        .generate_grounding(body.language, body.metadata, body.items)
        .await
    {
        Ok(output) => HttpResponse::Ok().json(DocumentResponse {
            file_name: output.document.file_name,
            content_type: output.document.content_type,
            data: encode(&output.document.bytes),
            report: output.report,
            template_source: None,
            used_fallback: false,
        }),
        Err(e) => failure(&data.logs, "Grounding form failed", e),
    }
}

#[post("/cells/write")]
async fn write_cells(data: web::Data<HttpState>, req: web::Json<CellWriteBody>) -> impl Responder {
    if let Err(e) = check(req.req_data()) {
        return failure(&data.logs, "Cell write rejected", e);
    }
    let body = req.into_inner();

    match data
        .documents
        .write_cells(body.language, body.template_id.as_deref(), body.mappings)
        .await
    {
        Ok(output) => HttpResponse::Ok().json(CellWriteResult {
            workbook: encode(&output.workbook),
            response: output.response,
        }),
        Err(e) => failure(&data.logs, "Cell write failed", e),
    }
}

#[get("/drafts/{session_id}")]
async fn get_draft(data: web::Data<HttpState>, path: web::Path<String>) -> impl Responder {
    match data.drafts.get(&path).await {
        Ok(draft) => HttpResponse::Ok().json(draft),
        Err(e) => failure(&data.logs, "Loading draft failed", e),
    }
}

#[put("/drafts/{session_id}/answers")]
async fn update_draft(
    data: web::Data<HttpState>,
    path: web::Path<String>,
    req: web::Json<DraftAnswersBody>,
) -> impl Responder {
    let session_id = path.into_inner();
    let body = req.into_inner();

    let questions = match data.documents.load_questions(body.language).await {
        Ok(report) => report.questions,
        Err(e) => return failure(&data.logs, "Loading questions failed", e),
    };
    match data
        .drafts
        .update_answers(&session_id, body.language, &questions, body.answers)
        .await
    {
        Ok(update) => HttpResponse::Ok().json(update),
        Err(e) => failure(&data.logs, "Draft update failed", e),
    }
}

#[delete("/drafts/{session_id}")]
async fn delete_draft(data: web::Data<HttpState>, path: web::Path<String>) -> impl Responder {
    match data.drafts.delete(&path).await {
        Ok(true) => HttpResponse::NoContent().finish(),
        Ok(false) => failure(
            &data.logs,
            "Deleting draft failed",
            AppError::NotFound(format!("Draft not found: {}", path.as_str())),
        ),
        Err(e) => failure(&data.logs, "Deleting draft failed", e),
    }
}

#[get("/templates")]
async fn list_templates(data: web::Data<HttpState>) -> impl Responder {
    HttpResponse::Ok().json(data.documents.templates().list_templates().await)
}

#[post("/templates/resolve")]
async fn resolve_template(
    data: web::Data<HttpState>,
    req: web::Json<TemplateQuery>,
) -> impl Responder {
    let resolved = data.documents.templates().resolve(req.req_data()).await;
    if resolved.used_fallback {
        add_log(
            &data.logs,
            "WARN",
            "HttpApi",
            &format!("Template {} answered by static fallback", req.composite_key()),
        );
    }
    HttpResponse::Ok().json(ResolvedTemplateResponse {
        size: resolved.bytes.len(),
        data: encode(&resolved.bytes),
        file_name: resolved.file_name,
        source: resolved.source,
        used_fallback: resolved.used_fallback,
    })
}

#[post("/templates/cache/clear")]
async fn clear_template_cache(data: web::Data<HttpState>) -> impl Responder {
    match data.documents.templates().clear_cache() {
        Ok(removed) => {
            add_log(
                &data.logs,
                "INFO",
                "HttpApi",
                &format!("Template cache cleared ({} files)", removed),
            );
            HttpResponse::Ok().json(serde_json::json!({ "removed": removed }))
        }
        Err(e) => failure(&data.logs, "Clearing template cache failed", e),
    }
}

#[put("/templates/registry")]
async fn replace_registry(
    data: web::Data<HttpState>,
    req: web::Json<TemplateRegistryDocument>,
) -> impl Responder {
    let document = req.into_inner();
    add_log(
        &data.logs,
        "INFO",
        "HttpApi",
        &format!("Template registry replaced (version={})", document.version),
    );
    data.documents.templates().registry().replace(document).await;
    HttpResponse::NoContent().finish()
}

#[post("/templates/registry/invalidate")]
async fn invalidate_registry(data: web::Data<HttpState>) -> impl Responder {
    data.documents.templates().registry().invalidate().await;
    HttpResponse::NoContent().finish()
}

#[get("/logs")]
async fn get_logs(data: web::Data<HttpState>) -> impl Responder {
    let logs = lock_logs(&data.logs);
    HttpResponse::Ok().json(&*logs)
}

fn lock_logs(logs: &Mutex<Vec<LogEntry>>) -> std::sync::MutexGuard<'_, Vec<LogEntry>> {
    match logs.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub fn add_log_entry(
    logs: &Mutex<Vec<LogEntry>>,
    level: &str,
    source: &str,
    message: &str,
) -> LogEntry {
    let entry = LogEntry {
        time: Local::now().format("%H:%M:%S").to_string(),
        level: level.to_string(),
        source: source.to_string(),
        message: message.to_string(),
    };
    let mut logs = lock_logs(logs);
    logs.push(entry.clone());
    if logs.len() > LOG_CAPACITY {
        logs.remove(0);
    }
    entry
}

pub fn add_log(logs: &Mutex<Vec<LogEntry>>, level: &str, source: &str, message: &str) {
    add_log_entry(logs, level, source, message);
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(health)
            .service(resolve_visibility)
            .service(list_questions)
            .service(generate_protocol)
            .service(generate_protocol_pdf)
            .service(generate_grounding)
            .service(write_cells)
            .service(get_draft)
            .service(update_draft)
            .service(delete_draft)
            .service(list_templates)
            .service(resolve_template)
            .service(clear_template_cache)
            .service(replace_registry)
            .service(invalidate_registry)
            .service(get_logs),
    );
}

pub fn start_server(state: HttpState, bind: (String, u16)) -> std::io::Result<Server> {
    let state = web::Data::new(state);

    let server = HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .app_data(state.clone())
            .configure(routes)
    })
    .bind(bind)?
    .run();

    Ok(server)
}

// Helper trait to avoid move issues in handlers
trait RequestData<T> {
    fn req_data(&self) -> &T;
}

impl<T> RequestData<T> for web::Json<T> {
    fn req_data(&self) -> &T {
        &**self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::TemplateResolutionService;
    use crate::infrastructure::db::drafts::DraftRepository;
    use crate::infrastructure::object_storage::local::LocalObjectStorage;
    use crate::infrastructure::renderer::PdfRenderer;
    use crate::infrastructure::template_cache::TemplateCache;
    use crate::infrastructure::template_registry::RegistryCache;
    use actix_web::test::{call_and_read_body_json, call_service, init_service, TestRequest};

    async fn state(dir: &std::path::Path) -> web::Data<HttpState> {
        let templates = TemplateResolutionService::new(
            Arc::new(RegistryCache::new(dir.join("registry.json"))),
            dir.join("bundled"),
            TemplateCache::new(dir.join("cache")),
            None,
            Arc::new(LocalObjectStorage::new(dir.join("storage"))),
        );
        let repo = DraftRepository::init(&dir.join("drafts.db")).await.unwrap();
        web::Data::new(HttpState {
            documents: Arc::new(DocumentGenerationService::new(
                Arc::new(templates),
                PdfRenderer::new("soffice"),
            )),
            drafts: Arc::new(DraftService::new(Arc::new(repo))),
            visibility: Arc::new(VisibilityResolver::new()),
            logs: Arc::new(Mutex::new(Vec::new())),
        })
    }

    #[test]
    fn test_log_feed_is_capped() {
        let logs = Mutex::new(Vec::new());
        for i in 0..105 {
            add_log(&logs, "INFO", "Test", &format!("entry {}", i));
        }
        let logs = logs.lock().unwrap();
        assert_eq!(logs.len(), LOG_CAPACITY);
        assert_eq!(logs[0].message, "entry 5");
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            error_status(&AppError::ValidationError("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(error_status(&AppError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            error_status(&AppError::ConfigurationError("x".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            error_status(&AppError::DatabaseError("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[actix_web::test]
    async fn test_health_and_visibility() {
        let dir = tempfile::tempdir().unwrap();
        let app = init_service(
            App::new()
                .app_data(state(dir.path()).await)
                .configure(routes),
        )
        .await;

        let req = TestRequest::get().uri("/api/health").to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body = serde_json::json!({
            "questions": [
                { "id": "Q1", "type": "boolean-choice", "conditionalGroupKey": "pit" },
                { "id": "Q2", "type": "text", "groupKey": "pit" }
            ],
            "answers": { "Q1": "no" }
        });
        let req = TestRequest::post()
            .uri("/api/visibility/resolve")
            .set_json(&body)
            .to_request();
        let resp: serde_json::Value = call_and_read_body_json(&app, req).await;
        assert_eq!(resp["hiddenQuestions"], serde_json::json!(["Q2"]));
        assert!(resp["answers"]["Q2"].is_string());
    }

    #[actix_web::test]
    async fn test_empty_mappings_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = init_service(
            App::new()
                .app_data(state(dir.path()).await)
                .configure(routes),
        )
        .await;

        let req = TestRequest::post()
            .uri("/api/cells/write")
            .set_json(serde_json::json!({ "mappings": [] }))
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = TestRequest::get().uri("/api/drafts/unknown").to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
