use serde::{Deserialize, Serialize};
use serde_json::json;
use std::env;
use std::time::Duration;

use crate::downloader;
use crate::errors::WorkbenchError;
use crate::record::{Column, Record};
use crate::rules::{Condition, Priority, Rule};

/// Column visibility modes for [`Action::ManageColumns`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnMode {
    Hide,
    Show,
    ShowOnly,
}

/// The closed set of UI commands the chat bridge may emit.
///
/// Manual UI interactions and chat-derived commands flow through the same
/// mutation and filter engines, so an action is applied identically no matter
/// how it was produced. Anything outside this set is rejected as an invalid
/// argument rather than trusted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    AddFilter { column: String, value: String },
    ClearFilters,
    ManageColumns { mode: ColumnMode, columns: Vec<String> },
    PrepareBulkDelete { column: String, value: String },
    DeleteSingleRowTrigger { row_id: u64 },
    DeleteMultipleRowsByIdTrigger { row_ids: Vec<u64> },
    DeleteColumnTrigger { column: String },
    RefreshTable,
    TriggerAnomalies,
}

/// Validate a raw action emitted by an external source.
pub fn parse_action(raw: serde_json::Value) -> Result<Action, WorkbenchError> {
    serde_json::from_value(raw)
        .map_err(|e| WorkbenchError::invalid(format!("unrecognized action: {e}")))
}

/// What one chat turn produced: a reply for the user, UI actions, and
/// optionally a priority rule the model asked to create (applied by the
/// caller, outside any session lock held during the remote call).
#[derive(Debug, Default)]
pub struct ChatOutcome {
    pub reply: String,
    pub actions: Vec<Action>,
    pub new_rule: Option<Rule>,
}

/// Hosted-LLM connection parameters, read once from the environment.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
}

impl AgentConfig {
    pub fn from_env() -> Option<Self> {
        let endpoint = env::var("AZURE_OPENAI_ENDPOINT").ok()?;
        let api_key = env::var("AZURE_OPENAI_KEY").ok()?;
        let deployment = env::var("AZURE_DEPLOYMENT_NAME").ok()?;
        if endpoint.is_empty() || api_key.is_empty() || deployment.is_empty() {
            return None;
        }
        let api_version =
            env::var("AZURE_API_VERSION").unwrap_or_else(|_| "2024-02-15-preview".to_string());
        Some(AgentConfig {
            endpoint,
            api_key,
            deployment,
            api_version,
        })
    }
}

/// Natural-language copilot over the staging data.
///
/// Wraps a hosted chat-completion API in function-calling mode: the model
/// picks from the tool set below, and each tool call is mapped onto the
/// closed [`Action`] set. The remote call carries only a column list, a value
/// sample, and (when the model asks) a bounded CSV sample.
pub struct ChatAgent {
    http: reqwest::Client,
    config: Option<AgentConfig>,
}

const MAX_ATTEMPTS: u32 = 3;
const SAMPLE_ROWS: usize = 50;

impl ChatAgent {
    pub fn new(config: Option<AgentConfig>) -> Self {
        if config.is_none() {
            log::warn!("chat agent credentials not configured; the copilot is disabled");
        }
        ChatAgent {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn from_env() -> Self {
        ChatAgent::new(AgentConfig::from_env())
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    /// Run one chat turn. The caller must not hold a session lock across
    /// this await; resulting actions re-enter the mutation engine as
    /// ordinary sequential calls.
    pub async fn process_message(
        &self,
        message: &str,
        columns: &[Column],
        records: &[Record],
    ) -> Result<ChatOutcome, WorkbenchError> {
        let Some(config) = &self.config else {
            return Ok(ChatOutcome {
                reply: "La IA no está configurada. Verifique las variables AZURE_OPENAI_* del \
                        entorno."
                    .to_string(),
                ..ChatOutcome::default()
            });
        };

        let mut messages = vec![
            json!({ "role": "system", "content": system_prompt(columns, records) }),
            json!({ "role": "user", "content": message }),
        ];

        let response = self
            .chat_completion(config, &messages, "auto")
            .await?;
        let choice = &response["choices"][0]["message"];

        let mut outcome = ChatOutcome {
            reply: choice["content"].as_str().unwrap_or("").to_string(),
            ..ChatOutcome::default()
        };

        let Some(tool_calls) = choice["tool_calls"].as_array().cloned() else {
            if outcome.reply.is_empty() {
                outcome.reply = "Hecho.".to_string();
            }
            return Ok(outcome);
        };

        messages.push(choice.clone());
        let mut needs_second_turn = false;

        for call in &tool_calls {
            let name = call["function"]["name"].as_str().unwrap_or_default();
            let raw_args = call["function"]["arguments"].as_str().unwrap_or("{}");
            let args: serde_json::Value = serde_json::from_str(raw_args)
                .map_err(|e| WorkbenchError::invalid(format!("malformed tool arguments: {e}")))?;
            let call_id = call["id"].as_str().unwrap_or_default();

            match name {
                "add_filter" => {
                    let column = require_str(&args, "column")?;
                    let value = require_str(&args, "value")?;
                    outcome.reply =
                        format!("Aplicando filtro: {column} contiene '{value}'.");
                    outcome.actions.push(Action::AddFilter { column, value });
                }
                "clear_filters" => {
                    outcome.reply = "Filtros limpiados.".to_string();
                    outcome.actions.push(Action::ClearFilters);
                }
                "manage_columns" => {
                    let mode: ColumnMode = serde_json::from_value(args["mode"].clone())
                        .map_err(|e| WorkbenchError::invalid(format!("bad mode: {e}")))?;
                    let columns: Vec<String> = serde_json::from_value(args["columns"].clone())
                        .map_err(|e| WorkbenchError::invalid(format!("bad columns: {e}")))?;
                    outcome.reply = "Ajustando visibilidad de columnas…".to_string();
                    outcome
                        .actions
                        .push(Action::ManageColumns { mode, columns });
                }
                "prepare_bulk_delete" => {
                    let column = require_str(&args, "column")?;
                    let value = require_str(&args, "value")?;
                    outcome.reply = "Filtrando registros para eliminación…".to_string();
                    outcome
                        .actions
                        .push(Action::PrepareBulkDelete { column, value });
                }
                "delete_single_row" => {
                    let visual = args["row_number"].as_u64().ok_or_else(|| {
                        WorkbenchError::invalid("row_number must be a positive integer")
                    })?;
                    outcome.reply = format!("Localizando la fila {visual}…");
                    outcome.actions.push(Action::DeleteSingleRowTrigger {
                        row_id: visual.saturating_sub(1),
                    });
                }
                "delete_multiple_rows" => {
                    let numbers: Vec<u64> = serde_json::from_value(args["row_numbers"].clone())
                        .map_err(|e| WorkbenchError::invalid(format!("bad row_numbers: {e}")))?;
                    outcome.reply =
                        format!("Seleccionando {} filas para eliminar…", numbers.len());
                    outcome.actions.push(Action::DeleteMultipleRowsByIdTrigger {
                        row_ids: numbers.iter().map(|n| n.saturating_sub(1)).collect(),
                    });
                }
                "delete_column" => {
                    let column = require_str(&args, "column")?;
                    outcome.reply =
                        format!("Solicitando borrado de la columna {column}…");
                    outcome.actions.push(Action::DeleteColumnTrigger { column });
                }
                "analyze_anomalies" => {
                    outcome.reply = "Ejecutando análisis de anomalías…".to_string();
                    outcome.actions.push(Action::TriggerAnomalies);
                }
                "create_priority_rule" => {
                    let conditions: Vec<Condition> =
                        serde_json::from_value(args["conditions"].clone()).map_err(|e| {
                            WorkbenchError::invalid(format!("bad conditions: {e}"))
                        })?;
                    let priority: Priority = serde_json::from_value(args["priority"].clone())
                        .map_err(|e| WorkbenchError::invalid(format!("bad priority: {e}")))?;
                    let reason = require_str(&args, "reason")?;
                    outcome.reply = format!("Regla '{reason}' creada y aplicada.");
                    outcome.new_rule = Some(Rule {
                        id: String::new(),
                        active: true,
                        priority,
                        reason,
                        conditions,
                    });
                    outcome.actions.push(Action::RefreshTable);
                }
                "inspect_sample" => {
                    // This tool feeds the model, not the UI: answer with a
                    // bounded CSV sample and let the model speak afterwards.
                    let limit = args["max_rows"].as_u64().unwrap_or(SAMPLE_ROWS as u64) as usize;
                    needs_second_turn = true;
                    let sample = sample_csv(columns, records, limit.min(SAMPLE_ROWS));
                    messages.push(json!({
                        "tool_call_id": call_id,
                        "role": "tool",
                        "name": name,
                        "content": format!("DATA SAMPLE:\n{sample}"),
                    }));
                    continue;
                }
                other => {
                    return Err(WorkbenchError::invalid(format!(
                        "unrecognized agent tool '{other}'"
                    )));
                }
            }
            messages.push(json!({
                "tool_call_id": call_id,
                "role": "tool",
                "name": name,
                "content": "OK",
            }));
        }

        if needs_second_turn {
            let response = self.chat_completion(config, &messages, "none").await?;
            if let Some(text) = response["choices"][0]["message"]["content"].as_str() {
                outcome.reply = text.to_string();
            }
        }

        if outcome.reply.is_empty() {
            outcome.reply = "Hecho.".to_string();
        }
        Ok(outcome)
    }

    async fn chat_completion(
        &self,
        config: &AgentConfig,
        messages: &[serde_json::Value],
        tool_choice: &str,
    ) -> Result<serde_json::Value, WorkbenchError> {
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            config.endpoint.trim_end_matches('/'),
            config.deployment,
            config.api_version
        );
        let body = json!({
            "messages": messages,
            "tools": tool_definitions(),
            "tool_choice": tool_choice,
            "temperature": 0.3,
        });

        let mut delay = Duration::from_secs(1);
        let mut last_error = String::new();
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            match self
                .http
                .post(&url)
                .header("api-key", &config.api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    return response
                        .json()
                        .await
                        .map_err(|e| WorkbenchError::Agent(e.to_string()));
                }
                Ok(response) => {
                    last_error = format!("model endpoint returned {}", response.status());
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }
            log::warn!("chat completion attempt {} failed: {last_error}", attempt + 1);
        }
        Err(WorkbenchError::Agent(last_error))
    }
}

fn require_str(args: &serde_json::Value, key: &str) -> Result<String, WorkbenchError> {
    args[key]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| WorkbenchError::invalid(format!("missing tool argument '{key}'")))
}

/// Up to 20 distinct values of the identity-ish columns, so the model knows
/// what the file actually contains.
fn value_context(columns: &[Column], records: &[Record]) -> String {
    const KEY_COLUMNS: &[&str] = &["Vendor Name", "Assignee", "Status", "Pay Group"];
    let mut lines = Vec::new();
    for name in KEY_COLUMNS {
        if !columns.iter().any(|c| c.name == *name) {
            continue;
        }
        let mut seen = Vec::new();
        for record in records {
            if let Some(value) = record.get(name) {
                let text = value.display();
                if !text.trim().is_empty() && !seen.contains(&text) {
                    seen.push(text);
                    if seen.len() >= 20 {
                        break;
                    }
                }
            }
        }
        if !seen.is_empty() {
            lines.push(format!("- '{}': {}…", name, seen.join(", ")));
        }
    }
    lines.join("\n")
}

fn sample_csv(columns: &[Column], records: &[Record], limit: usize) -> String {
    let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
    let sample: Vec<&Record> = records.iter().take(limit).collect();
    downloader::to_csv(&names, &sample).unwrap_or_default()
}

fn system_prompt(columns: &[Column], records: &[Record]) -> String {
    let column_names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    format!(
        "Eres un copiloto experto en análisis de datos de facturación. Tu objetivo es ayudar al \
         usuario a filtrar, limpiar y entender sus datos.\n\n\
         CONTEXTO DE DATOS:\nColumnas disponibles: {}.\n\n\
         MUESTRA DE VALORES:\n{}\n\n\
         INSTRUCCIONES CLAVE:\n\
         1. Para borrar una lista de números (ej: \"1, 2 y 3\"), USA 'delete_multiple_rows'.\n\
         2. Para borrar por condición (ej: \"las de Amazon\"), USA 'prepare_bulk_delete'.\n\
         3. Para borrar UNA fila, USA 'delete_single_row'.\n\
         4. Sé conciso y profesional.",
        column_names.join(", "),
        value_context(columns, records)
    )
}

/// Function-calling tool declarations shipped with every model request.
fn tool_definitions() -> serde_json::Value {
    json!([
        {
            "type": "function",
            "function": {
                "name": "delete_single_row",
                "description": "Elimina UNA sola fila específica por su número visual.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "row_number": { "type": "integer", "description": "El número visual (N°) de la fila." }
                    },
                    "required": ["row_number"]
                }
            }
        },
        {
            "type": "function",
            "function": {
                "name": "delete_multiple_rows",
                "description": "Elimina VARIAS filas por número visual. Ej: 'borra las filas 1, 5 y 10'.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "row_numbers": { "type": "array", "items": { "type": "integer" } }
                    },
                    "required": ["row_numbers"]
                }
            }
        },
        {
            "type": "function",
            "function": {
                "name": "prepare_bulk_delete",
                "description": "Filtra datos para borrado masivo. Ej: 'borra todo lo de Amazon'.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "column": { "type": "string" },
                        "value": { "type": "string" }
                    },
                    "required": ["column", "value"]
                }
            }
        },
        {
            "type": "function",
            "function": {
                "name": "manage_columns",
                "description": "Oculta o muestra columnas en la tabla.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "mode": { "type": "string", "enum": ["hide", "show", "show_only"] },
                        "columns": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["mode", "columns"]
                }
            }
        },
        {
            "type": "function",
            "function": {
                "name": "delete_column",
                "description": "ELIMINA una columna completa del dataset.",
                "parameters": {
                    "type": "object",
                    "properties": { "column": { "type": "string" } },
                    "required": ["column"]
                }
            }
        },
        {
            "type": "function",
            "function": {
                "name": "inspect_sample",
                "description": "Lee una muestra de datos para entender el contexto.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "max_rows": { "type": "integer", "description": "Default 50" }
                    }
                }
            }
        },
        {
            "type": "function",
            "function": {
                "name": "add_filter",
                "description": "Aplica un filtro visual a la tabla.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "column": { "type": "string" },
                        "value": { "type": "string" }
                    },
                    "required": ["column", "value"]
                }
            }
        },
        {
            "type": "function",
            "function": {
                "name": "clear_filters",
                "description": "Elimina todos los filtros activos.",
                "parameters": { "type": "object", "properties": {} }
            }
        },
        {
            "type": "function",
            "function": {
                "name": "analyze_anomalies",
                "description": "Ejecuta el análisis estadístico de anomalías.",
                "parameters": { "type": "object", "properties": {} }
            }
        },
        {
            "type": "function",
            "function": {
                "name": "create_priority_rule",
                "description": "Crea una nueva regla de negocio persistente.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "conditions": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "column": { "type": "string" },
                                    "operator": { "type": "string", "enum": ["equals", "contains", ">", "<", ">=", "<="] },
                                    "value": { "type": "string" }
                                },
                                "required": ["column", "operator", "value"]
                            }
                        },
                        "priority": { "type": "string", "enum": ["Alta", "Media", "Baja"] },
                        "reason": { "type": "string" }
                    },
                    "required": ["conditions", "priority", "reason"]
                }
            }
        }
    ])
}
