use axum::{
    Json, Router,
    body::Body,
    extract::{Multipart, Path, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::agent::ChatAgent;
use crate::analytics;
use crate::autocomplete::AutocompleteLists;
use crate::downloader;
use crate::errors::WorkbenchError;
use crate::filters::{self, Filter};
use crate::loader;
use crate::record::Value;
use crate::rules::{Rule, RuleBook, Settings};
use crate::session::{AuditEvent, SessionRegistry, SessionState};
use crate::staging::{MutationReport, Staging};
use crate::translator;

const SESSION_COOKIE: &str = "session";
const LANG_COOKIE: &str = "lang";
const DEFAULT_ANOMALY_THRESHOLD: f64 = 2.0;

pub struct AppState {
    pub registry: SessionRegistry,
    pub agent: ChatAgent,
    pub data_dir: PathBuf,
}

impl AppState {
    fn rules_path(&self) -> PathBuf {
        self.data_dir.join("user_priority_rules.json")
    }

    fn lists_path(&self) -> PathBuf {
        self.data_dir.join("user_lists.json")
    }

    fn session(
        &self,
        jar: &CookieJar,
    ) -> Result<Arc<Mutex<SessionState>>, WorkbenchError> {
        let id = jar
            .get(SESSION_COOKIE)
            .map(|c| c.value().to_string())
            .ok_or_else(|| {
                WorkbenchError::not_found("no active session; upload a file first")
            })?;
        self.registry.required(&id)
    }
}

/// Start the web application.
pub async fn run(addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let data_dir = std::env::var("WORKBENCH_DATA_DIR").unwrap_or_else(|_| "data".to_string());
    let app_state = Arc::new(AppState {
        registry: SessionRegistry::new(),
        agent: ChatAgent::from_env(),
        data_dir: PathBuf::from(data_dir),
    });

    log::info!(
        "chat copilot {}",
        if app_state.agent.is_configured() { "enabled" } else { "disabled" }
    );
    let app = router(app_state);

    let listener = TcpListener::bind(addr).await?;
    log::info!("listening on http://{addr}");
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(serve_index))
        .route("/api/set_language/:lang", get(set_language))
        .route("/api/get_translations", get(get_translations))
        .route("/api/upload", post(upload))
        .route("/api/filter", post(filter_data))
        .route("/api/group_by", post(group_by_data))
        .route("/api/update_cell", post(update_cell))
        .route("/api/add_row", post(add_row))
        .route("/api/delete_row", post(delete_row))
        .route("/api/bulk_update", post(bulk_update))
        .route("/api/find_replace_in_selection", post(find_replace))
        .route("/api/bulk_delete_rows", post(bulk_delete_rows))
        .route("/api/get_duplicate_invoices", post(get_duplicates))
        .route("/api/cleanup_duplicate_invoices", post(cleanup_duplicates))
        .route("/api/delete_column", post(delete_column))
        .route("/api/priority_rules/get", get(get_rules))
        .route("/api/priority_rules/save", post(save_rule))
        .route("/api/priority_rules/toggle", post(toggle_rule))
        .route("/api/priority_rules/delete", post(delete_rule))
        .route("/api/priority_rules/save_settings", post(save_settings))
        .route("/api/priority_rules/import_view", post(import_view))
        .route("/api/save_autocomplete_lists", post(save_autocomplete_lists))
        .route(
            "/api/import_autocomplete_values",
            post(import_autocomplete_values),
        )
        .route("/api/chat_agent", post(chat_agent))
        .route("/api/analyze_anomalies", post(analyze_anomalies))
        .route("/api/undo_change", post(undo_change))
        .route("/api/commit_changes", post(commit_changes))
        .route("/api/download_excel", post(download_excel))
        .route("/api/download_excel_grouped", post(download_excel_grouped))
        .route("/api/download_csv", post(download_csv))
        .route("/api/download_audit_log", post(download_audit_log))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn serve_index() -> Html<&'static str> {
    Html(include_str!("./static/index.html"))
}

fn language(jar: &CookieJar) -> String {
    jar.get(LANG_COOKIE)
        .map(|c| c.value().to_string())
        .unwrap_or_else(|| translator::DEFAULT_LANGUAGE.to_string())
}

async fn set_language(Path(lang): Path<String>, jar: CookieJar) -> impl IntoResponse {
    if !translator::is_supported(&lang) {
        return (jar, Json(json!({ "status": "error" }))).into_response();
    }
    let cookie = Cookie::new(LANG_COOKIE, lang.clone());
    (
        jar.add(cookie),
        Json(json!({ "status": "success", "language": lang })),
    )
        .into_response()
}

async fn get_translations(jar: CookieJar) -> Json<serde_json::Value> {
    Json(json!(translator::table(&language(&jar))))
}

async fn upload(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut multipart: Multipart,
) -> Result<(CookieJar, Json<serde_json::Value>), WorkbenchError> {
    let purged = state.registry.purge_expired();
    if purged > 0 {
        log::info!("purged {purged} expired sessions");
    }

    let mut filename = String::new();
    let mut bytes = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| WorkbenchError::invalid(format!("bad multipart request: {e}")))?
    {
        if field.name() == Some("file") {
            filename = field.file_name().unwrap_or("upload.csv").to_string();
            bytes = field
                .bytes()
                .await
                .map_err(|e| WorkbenchError::invalid(format!("failed to read upload: {e}")))?
                .to_vec();
        }
    }
    if bytes.is_empty() {
        return Err(WorkbenchError::invalid("no file data received"));
    }

    let parsed = loader::parse_upload(&filename, &bytes)?;
    let file_id = Uuid::new_v4().to_string();

    // Rules and autocomplete lists survive re-uploads through their JSON
    // files; the staging layer starts over.
    let rules = RuleBook::load(&state.rules_path());
    let mut autocomplete = AutocompleteLists::load(&state.lists_path());
    autocomplete.seed_from_records(&parsed.records);

    let staging = Staging::new(
        parsed.columns,
        parsed.records,
        parsed.pay_group_column,
        &rules,
    );
    let columns = staging.columns().to_vec();
    let options = autocomplete.options();

    let session_state = SessionState {
        file_id: file_id.clone(),
        staging,
        rules,
        autocomplete,
        audit: Vec::new(),
    };

    // A new upload resets the session outright, like a fresh login.
    if let Some(old) = jar.get(SESSION_COOKIE) {
        state.registry.remove(old.value());
    }
    let session_id = state.registry.create(session_state);
    let jar = jar.add(Cookie::new(SESSION_COOKIE, session_id));

    log::info!("upload '{filename}' staged as file {file_id}");
    Ok((
        jar,
        Json(json!({
            "file_id": file_id,
            "columns": columns,
            "autocomplete_options": options,
        })),
    ))
}

#[derive(Deserialize)]
struct ViewRequest {
    file_id: String,
    #[serde(default)]
    filters: Vec<Filter>,
}

async fn filter_data(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<ViewRequest>,
) -> Result<Json<serde_json::Value>, WorkbenchError> {
    let session = state.session(&jar)?;
    let guard = session.lock().unwrap();
    guard.check_file_id(&req.file_id)?;

    let view = filters::apply_filters(guard.staging.records(), &req.filters);
    let summary = analytics::summarize(view.iter().copied(), guard.staging.amount_column());
    let data: Vec<serde_json::Value> = view
        .iter()
        .map(|r| r.to_json(guard.staging.columns()))
        .collect();

    Ok(Json(json!({
        "data": data,
        "num_rows": data.len(),
        "summary": summary,
    })))
}

#[derive(Deserialize)]
struct GroupByRequest {
    file_id: String,
    #[serde(default)]
    filters: Vec<Filter>,
    group_column: String,
}

async fn group_by_data(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<GroupByRequest>,
) -> Result<Json<serde_json::Value>, WorkbenchError> {
    let session = state.session(&jar)?;
    let guard = session.lock().unwrap();
    guard.check_file_id(&req.file_id)?;

    if !guard
        .staging
        .columns()
        .iter()
        .any(|c| c.name == req.group_column)
    {
        return Err(WorkbenchError::not_found(format!(
            "column '{}'",
            req.group_column
        )));
    }

    let view = filters::apply_filters(guard.staging.records(), &req.filters);
    let groups = filters::group_by(&view, &req.group_column, guard.staging.amount_column());

    Ok(Json(json!({ "data": groups })))
}

fn report_json(status: &str, report: &MutationReport) -> serde_json::Value {
    json!({
        "status": status,
        "changed": report.changed,
        "history_count": report.history_len,
        "summary": report.summary,
        "affected_row_id": report.affected,
    })
}

#[derive(Deserialize)]
struct UpdateCellRequest {
    file_id: String,
    row_id: u64,
    column: String,
    value: Value,
}

async fn update_cell(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<UpdateCellRequest>,
) -> Result<Json<serde_json::Value>, WorkbenchError> {
    let session = state.session(&jar)?;
    let mut guard = session.lock().unwrap();
    guard.check_file_id(&req.file_id)?;

    let old_value = guard
        .staging
        .record(req.row_id)
        .and_then(|r| r.get(&req.column))
        .map(|v| v.display())
        .unwrap_or_default();

    let st = &mut *guard;
    let report = st
        .staging
        .edit_cell(&st.rules, req.row_id, &req.column, req.value.clone())?;
    if report.changed == 0 {
        return Ok(Json(json!({ "status": "no_change" })));
    }

    let new_text = req.value.display();
    st.autocomplete.learn(&req.column, &new_text);
    if let Err(e) = st.autocomplete.save(&state.lists_path()) {
        log::warn!("failed to persist autocomplete lists: {e}");
    }
    st.audit.push(AuditEvent::now(
        "Celda actualizada",
        req.row_id,
        &req.column,
        old_value,
        new_text,
    ));

    let record = st.staging.record(req.row_id);
    let mut body = report_json("success", &report);
    body["new_priority"] = json!(record.and_then(|r| r.priority));
    body["new_row_status"] = json!(record.map(|r| r.row_status));
    Ok(Json(body))
}

#[derive(Deserialize)]
struct FileOnlyRequest {
    file_id: String,
}

async fn add_row(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<FileOnlyRequest>,
) -> Result<Json<serde_json::Value>, WorkbenchError> {
    let session = state.session(&jar)?;
    let mut guard = session.lock().unwrap();
    guard.check_file_id(&req.file_id)?;

    let st = &mut *guard;
    let (row_id, report) = st.staging.add_row(&st.rules);
    st.audit
        .push(AuditEvent::now("Fila agregada", row_id, "", "", ""));

    let mut body = report_json("success", &report);
    body["new_row_id"] = json!(row_id);
    Ok(Json(body))
}

#[derive(Deserialize)]
struct DeleteRowRequest {
    file_id: String,
    row_id: u64,
}

async fn delete_row(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<DeleteRowRequest>,
) -> Result<Json<serde_json::Value>, WorkbenchError> {
    let session = state.session(&jar)?;
    let mut guard = session.lock().unwrap();
    guard.check_file_id(&req.file_id)?;

    let st = &mut *guard;
    let report = st.staging.delete_row(&st.rules, req.row_id)?;
    st.audit
        .push(AuditEvent::now("Fila eliminada", req.row_id, "", "", ""));
    Ok(Json(report_json("success", &report)))
}

#[derive(Deserialize)]
struct BulkUpdateRequest {
    file_id: String,
    row_ids: Vec<u64>,
    column: String,
    value: Value,
}

async fn bulk_update(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<BulkUpdateRequest>,
) -> Result<Json<serde_json::Value>, WorkbenchError> {
    let session = state.session(&jar)?;
    let mut guard = session.lock().unwrap();
    guard.check_file_id(&req.file_id)?;

    let st = &mut *guard;
    let report = st
        .staging
        .bulk_edit(&st.rules, &req.row_ids, &req.column, req.value.clone())?;
    if report.changed == 0 {
        return Ok(Json(json!({ "status": "no_change" })));
    }
    st.autocomplete.learn(&req.column, &req.value.display());
    st.audit.push(AuditEvent::now(
        "Edición masiva",
        format!("{} filas", report.changed),
        &req.column,
        "",
        req.value.display(),
    ));
    Ok(Json(report_json("success", &report)))
}

#[derive(Deserialize)]
struct FindReplaceRequest {
    file_id: String,
    row_ids: Vec<u64>,
    column: String,
    find_text: String,
    replace_text: String,
}

async fn find_replace(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<FindReplaceRequest>,
) -> Result<Json<serde_json::Value>, WorkbenchError> {
    let session = state.session(&jar)?;
    let mut guard = session.lock().unwrap();
    guard.check_file_id(&req.file_id)?;

    let st = &mut *guard;
    let report = st.staging.find_replace_in_selection(
        &st.rules,
        &req.row_ids,
        &req.column,
        &req.find_text,
        &req.replace_text,
    )?;
    if report.changed == 0 {
        return Ok(Json(json!({ "status": "no_change", "message": "Sin coincidencias." })));
    }
    st.audit.push(AuditEvent::now(
        "Buscar y reemplazar",
        format!("{} filas", report.changed),
        &req.column,
        &req.find_text,
        &req.replace_text,
    ));
    Ok(Json(report_json("success", &report)))
}

#[derive(Deserialize)]
struct BulkDeleteRequest {
    file_id: String,
    row_ids: Vec<u64>,
}

async fn bulk_delete_rows(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<BulkDeleteRequest>,
) -> Result<Json<serde_json::Value>, WorkbenchError> {
    let session = state.session(&jar)?;
    let mut guard = session.lock().unwrap();
    guard.check_file_id(&req.file_id)?;

    let st = &mut *guard;
    let report = st.staging.bulk_delete_rows(&st.rules, &req.row_ids);
    if report.changed == 0 {
        return Ok(Json(json!({ "status": "no_change" })));
    }
    st.audit.push(AuditEvent::now(
        "Eliminación masiva",
        format!("{} filas", report.changed),
        "",
        "",
        "",
    ));
    Ok(Json(report_json("success", &report)))
}

async fn get_duplicates(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<FileOnlyRequest>,
) -> Result<Json<serde_json::Value>, WorkbenchError> {
    let session = state.session(&jar)?;
    let guard = session.lock().unwrap();
    guard.check_file_id(&req.file_id)?;

    let columns = guard.staging.columns();
    let invoice_column = analytics::find_invoice_column(columns)
        .ok_or_else(|| WorkbenchError::invalid("no invoice column detected"))?;
    let vendor_column = analytics::find_vendor_column(columns);

    let duplicates =
        analytics::find_duplicates(guard.staging.records(), vendor_column, invoice_column);
    let data: Vec<serde_json::Value> =
        duplicates.iter().map(|r| r.to_json(columns)).collect();
    Ok(Json(json!({ "data": data, "num_rows": data.len() })))
}

async fn cleanup_duplicates(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<FileOnlyRequest>,
) -> Result<Json<serde_json::Value>, WorkbenchError> {
    let session = state.session(&jar)?;
    let mut guard = session.lock().unwrap();
    guard.check_file_id(&req.file_id)?;

    let doomed = {
        let columns = guard.staging.columns();
        let invoice_column = analytics::find_invoice_column(columns)
            .ok_or_else(|| WorkbenchError::invalid("no invoice column detected"))?;
        let vendor_column = analytics::find_vendor_column(columns);
        analytics::duplicate_cleanup_ids(guard.staging.records(), vendor_column, invoice_column)
    };
    if doomed.is_empty() {
        return Ok(Json(json!({ "status": "no_change" })));
    }

    let st = &mut *guard;
    let report = st.staging.bulk_delete_rows(&st.rules, &doomed);
    st.audit.push(AuditEvent::now(
        "Limpieza de duplicados",
        format!("{} filas", report.changed),
        "",
        "",
        "",
    ));
    Ok(Json(report_json("success", &report)))
}

#[derive(Deserialize)]
struct DeleteColumnRequest {
    file_id: String,
    column: String,
}

async fn delete_column(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<DeleteColumnRequest>,
) -> Result<Json<serde_json::Value>, WorkbenchError> {
    let session = state.session(&jar)?;
    let mut guard = session.lock().unwrap();
    guard.check_file_id(&req.file_id)?;

    let st = &mut *guard;
    let report = st.staging.delete_column(&st.rules, &req.column)?;
    st.audit.push(AuditEvent::now(
        "Columna eliminada",
        "",
        &req.column,
        "",
        "",
    ));

    let mut body = report_json("success", &report);
    body["new_columns"] = json!(st.staging.columns());
    Ok(Json(body))
}

fn optional_session(
    state: &AppState,
    jar: &CookieJar,
) -> Option<Arc<Mutex<SessionState>>> {
    jar.get(SESSION_COOKIE)
        .and_then(|c| state.registry.get(c.value()))
}

/// Apply a rule-book mutation to the session's book when one exists, or to
/// the on-disk book otherwise, persisting either way. Returns the refreshed
/// summary when staging data was recomputed.
fn mutate_rules<F>(
    state: &AppState,
    jar: &CookieJar,
    mutate: F,
) -> Result<serde_json::Value, WorkbenchError>
where
    F: FnOnce(&mut RuleBook),
{
    if let Some(session) = optional_session(state, jar) {
        let mut guard = session.lock().unwrap();
        let st = &mut *guard;
        mutate(&mut st.rules);
        st.rules.save(&state.rules_path())?;
        let summary = st.staging.recompute_derived(&st.rules);
        return Ok(json!({ "status": "success", "summary": summary }));
    }

    let mut book = RuleBook::load(&state.rules_path());
    mutate(&mut book);
    book.save(&state.rules_path())?;
    Ok(json!({ "status": "success", "summary": serde_json::Value::Null }))
}

async fn get_rules(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Json<serde_json::Value> {
    let book = match optional_session(&state, &jar) {
        Some(session) => session.lock().unwrap().rules.clone(),
        None => RuleBook::load(&state.rules_path()),
    };
    Json(json!({ "rules": book.rules, "settings": book.settings }))
}

async fn save_rule(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(rule): Json<Rule>,
) -> Result<Json<serde_json::Value>, WorkbenchError> {
    if rule.conditions.is_empty() {
        return Err(WorkbenchError::invalid("a rule needs at least one condition"));
    }
    mutate_rules(&state, &jar, |book| {
        book.save_rule(rule);
    })
    .map(Json)
}

#[derive(Deserialize)]
struct ToggleRuleRequest {
    rule_id: String,
    active: bool,
}

async fn toggle_rule(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<ToggleRuleRequest>,
) -> Result<Json<serde_json::Value>, WorkbenchError> {
    mutate_rules(&state, &jar, |book| {
        book.toggle_rule(&req.rule_id, req.active);
    })
    .map(Json)
}

#[derive(Deserialize)]
struct DeleteRuleRequest {
    rule_id: String,
}

async fn delete_rule(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<DeleteRuleRequest>,
) -> Result<Json<serde_json::Value>, WorkbenchError> {
    mutate_rules(&state, &jar, |book| {
        book.delete_rule(&req.rule_id);
    })
    .map(Json)
}

async fn save_settings(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(settings): Json<Settings>,
) -> Result<Json<serde_json::Value>, WorkbenchError> {
    mutate_rules(&state, &jar, |book| {
        book.settings = settings;
    })
    .map(Json)
}

#[derive(Deserialize)]
struct ImportViewRequest {
    #[serde(default)]
    rules: Vec<Rule>,
    #[serde(default)]
    settings: Settings,
}

async fn import_view(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<ImportViewRequest>,
) -> Result<Json<serde_json::Value>, WorkbenchError> {
    mutate_rules(&state, &jar, |book| {
        book.replace_all(req.rules, req.settings);
    })
    .map(Json)
}

async fn save_autocomplete_lists(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(lists): Json<BTreeMap<String, Vec<String>>>,
) -> Result<Json<serde_json::Value>, WorkbenchError> {
    if let Some(session) = optional_session(&state, &jar) {
        let mut guard = session.lock().unwrap();
        guard.autocomplete.replace_all(lists);
        guard.autocomplete.save(&state.lists_path())?;
    } else {
        let mut standalone = AutocompleteLists::new();
        standalone.replace_all(lists);
        standalone.save(&state.lists_path())?;
    }
    Ok(Json(json!({ "status": "success" })))
}

#[derive(Deserialize)]
struct ImportValuesRequest {
    file_id: String,
    column: String,
}

async fn import_autocomplete_values(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<ImportValuesRequest>,
) -> Result<Json<serde_json::Value>, WorkbenchError> {
    let session = state.session(&jar)?;
    let mut guard = session.lock().unwrap();
    guard.check_file_id(&req.file_id)?;

    if !guard.staging.columns().iter().any(|c| c.name == req.column) {
        return Err(WorkbenchError::not_found(format!("column '{}'", req.column)));
    }

    let st = &mut *guard;
    let imported = st.autocomplete.import_column(st.staging.records(), &req.column)?;
    st.autocomplete.save(&state.lists_path())?;

    Ok(Json(json!({
        "status": "success",
        "message": format!("Importados {imported} valores."),
        "autocomplete_options": st.autocomplete.options(),
    })))
}

#[derive(Deserialize)]
struct ChatRequest {
    file_id: String,
    message: String,
}

async fn chat_agent(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<ChatRequest>,
) -> Result<Json<serde_json::Value>, WorkbenchError> {
    let session = state.session(&jar)?;

    // Snapshot under the lock, call the model outside it. Any actions the
    // bridge emits come back through the ordinary handlers afterwards.
    let (columns, records) = {
        let guard = session.lock().unwrap();
        guard.check_file_id(&req.file_id)?;
        (
            guard.staging.columns().to_vec(),
            guard.staging.records().to_vec(),
        )
    };

    let outcome = state
        .agent
        .process_message(&req.message, &columns, &records)
        .await?;

    if let Some(rule) = outcome.new_rule.clone() {
        let mut guard = session.lock().unwrap();
        let st = &mut *guard;
        st.rules.save_rule(rule);
        if let Err(e) = st.rules.save(&state.rules_path()) {
            log::warn!("failed to persist rules: {e}");
        }
        st.staging.recompute_derived(&st.rules);
    }

    Ok(Json(json!({
        "response": outcome.reply,
        "actions": outcome.actions,
    })))
}

#[derive(Deserialize)]
struct AnomalyRequest {
    file_id: String,
    threshold: Option<f64>,
}

async fn analyze_anomalies(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<AnomalyRequest>,
) -> Result<Json<serde_json::Value>, WorkbenchError> {
    let session = state.session(&jar)?;
    let guard = session.lock().unwrap();
    guard.check_file_id(&req.file_id)?;

    let amount_column = guard
        .staging
        .amount_column()
        .ok_or_else(|| WorkbenchError::invalid("no amount column detected"))?
        .to_string();
    let threshold = req.threshold.unwrap_or(DEFAULT_ANOMALY_THRESHOLD);
    let report = analytics::detect_anomalies(guard.staging.records(), &amount_column, threshold);

    let data: Vec<serde_json::Value> = report
        .anomalies
        .iter()
        .filter_map(|anomaly| {
            guard.staging.record(anomaly.row_id).map(|record| {
                let mut row = record.to_json(guard.staging.columns());
                row["_anomaly_score"] = json!(anomaly.z_score);
                row["_risk"] = json!(anomaly.risk);
                row
            })
        })
        .collect();

    Ok(Json(json!({
        "status": "success",
        "data": data,
        "summary": {
            "mean": report.mean,
            "threshold": report.threshold,
            "count": report.anomalies.len(),
            "column_used": amount_column,
        },
    })))
}

async fn undo_change(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<FileOnlyRequest>,
) -> Result<Json<serde_json::Value>, WorkbenchError> {
    let session = state.session(&jar)?;
    let mut guard = session.lock().unwrap();
    guard.check_file_id(&req.file_id)?;

    let st = &mut *guard;
    let report = st.staging.undo(&st.rules);
    if report.changed == 0 {
        // Empty history is benign: report it, don't fail.
        return Ok(Json(json!({
            "status": "no_change",
            "history_count": 0,
            "message": "Nada que deshacer.",
        })));
    }
    st.audit
        .push(AuditEvent::now("Deshacer", "", "", "", ""));
    Ok(Json(report_json("success", &report)))
}

async fn commit_changes(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<FileOnlyRequest>,
) -> Result<Json<serde_json::Value>, WorkbenchError> {
    let session = state.session(&jar)?;
    let mut guard = session.lock().unwrap();
    guard.check_file_id(&req.file_id)?;

    let committed = guard.staging.commit();
    if committed {
        guard
            .audit
            .push(AuditEvent::now("Cambios confirmados", "", "", "", ""));
    }
    Ok(Json(json!({
        "status": if committed { "success" } else { "no_change" },
        "history_count": 0,
        "message": "Historial limpiado.",
    })))
}

fn attachment(bytes: Vec<u8>, content_type: &str, filename: &str) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .body(Body::from(bytes))
        .unwrap()
}

#[derive(Deserialize)]
struct DownloadRequest {
    file_id: String,
    #[serde(default)]
    filters: Vec<Filter>,
    visible_columns: Option<Vec<String>>,
}

fn visible_columns(req_columns: Option<Vec<String>>, all: &[String]) -> Vec<String> {
    match req_columns {
        Some(wanted) => wanted
            .into_iter()
            .filter(|name| all.contains(name))
            .collect(),
        None => all.to_vec(),
    }
}

async fn download_excel(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<DownloadRequest>,
) -> Result<Response, WorkbenchError> {
    let session = state.session(&jar)?;
    let guard = session.lock().unwrap();
    guard.check_file_id(&req.file_id)?;

    let all: Vec<String> = guard
        .staging
        .columns()
        .iter()
        .map(|c| c.name.clone())
        .collect();
    let columns = visible_columns(req.visible_columns, &all);
    let view = filters::apply_filters(guard.staging.records(), &req.filters);
    let bytes = downloader::to_xlsx(&columns, &view)?;
    Ok(attachment(
        bytes,
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "filtrado.xlsx",
    ))
}

async fn download_excel_grouped(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<GroupByRequest>,
) -> Result<Response, WorkbenchError> {
    let session = state.session(&jar)?;
    let guard = session.lock().unwrap();
    guard.check_file_id(&req.file_id)?;

    if !guard
        .staging
        .columns()
        .iter()
        .any(|c| c.name == req.group_column)
    {
        return Err(WorkbenchError::not_found(format!(
            "column '{}'",
            req.group_column
        )));
    }

    let view = filters::apply_filters(guard.staging.records(), &req.filters);
    let groups = filters::group_by(&view, &req.group_column, guard.staging.amount_column());
    let bytes = downloader::grouped_to_xlsx(&req.group_column, &groups)?;
    Ok(attachment(
        bytes,
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "agrupado.xlsx",
    ))
}

async fn download_csv(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<DownloadRequest>,
) -> Result<Response, WorkbenchError> {
    let session = state.session(&jar)?;
    let guard = session.lock().unwrap();
    guard.check_file_id(&req.file_id)?;

    let all: Vec<String> = guard
        .staging
        .columns()
        .iter()
        .map(|c| c.name.clone())
        .collect();
    let columns = visible_columns(req.visible_columns, &all);
    let view = filters::apply_filters(guard.staging.records(), &req.filters);
    let text = downloader::to_csv(&columns, &view)?;
    Ok(attachment(text.into_bytes(), "text/csv", "filtrado.csv"))
}

async fn download_audit_log(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<FileOnlyRequest>,
) -> Result<Response, WorkbenchError> {
    let session = state.session(&jar)?;
    let guard = session.lock().unwrap();
    guard.check_file_id(&req.file_id)?;

    let text = downloader::audit_to_text(&guard.audit);
    Ok(attachment(text.into_bytes(), "text/plain", "audit_log.txt"))
}
