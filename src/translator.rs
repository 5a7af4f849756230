use lazy_static::lazy_static;
use std::collections::HashMap;

pub const DEFAULT_LANGUAGE: &str = "es";

lazy_static! {
    /// UI string tables keyed by language code. Only the keys the embedded
    /// page consumes; everything else on the page is markup.
    pub static ref LANGUAGES: HashMap<&'static str, HashMap<&'static str, &'static str>> = {
        let es: HashMap<&'static str, &'static str> = [
            ("app_title", "Buscador de Facturas"),
            ("upload_prompt", "Cargue un archivo CSV o XLSX para comenzar"),
            ("btn_upload", "Cargar archivo"),
            ("btn_undo", "Deshacer"),
            ("btn_commit", "Confirmar cambios"),
            ("btn_add_row", "Agregar fila"),
            ("btn_export", "Exportar Excel"),
            ("btn_export_csv", "Exportar CSV"),
            ("btn_audit", "Registro de auditoría"),
            ("btn_anomalies", "Detectar anomalías"),
            ("btn_duplicates", "Ver duplicados"),
            ("btn_cleanup", "Limpiar duplicados"),
            ("chat_placeholder", "Pídele algo al copiloto…"),
            ("filters_cleared", "Filtros limpiados."),
            ("nothing_to_undo", "Nada que deshacer."),
            ("changes_committed", "Historial limpiado."),
            ("rows_label", "filas"),
            ("total_label", "Monto total"),
            ("average_label", "Monto promedio"),
        ]
        .into_iter()
        .collect();

        let en: HashMap<&'static str, &'static str> = [
            ("app_title", "Invoice Workbench"),
            ("upload_prompt", "Upload a CSV or XLSX file to get started"),
            ("btn_upload", "Upload file"),
            ("btn_undo", "Undo"),
            ("btn_commit", "Commit changes"),
            ("btn_add_row", "Add row"),
            ("btn_export", "Export Excel"),
            ("btn_export_csv", "Export CSV"),
            ("btn_audit", "Audit log"),
            ("btn_anomalies", "Detect anomalies"),
            ("btn_duplicates", "Show duplicates"),
            ("btn_cleanup", "Clean up duplicates"),
            ("chat_placeholder", "Ask the copilot…"),
            ("filters_cleared", "Filters cleared."),
            ("nothing_to_undo", "Nothing to undo."),
            ("changes_committed", "History cleared."),
            ("rows_label", "rows"),
            ("total_label", "Total amount"),
            ("average_label", "Average amount"),
        ]
        .into_iter()
        .collect();

        HashMap::from([("es", es), ("en", en)])
    };
}

pub fn is_supported(lang: &str) -> bool {
    LANGUAGES.contains_key(lang)
}

/// Look up a UI string, falling back to the default language, then to the
/// key itself.
pub fn get_text<'a>(lang: &str, key: &'a str) -> &'a str {
    LANGUAGES
        .get(lang)
        .or_else(|| LANGUAGES.get(DEFAULT_LANGUAGE))
        .and_then(|table| table.get(key).copied())
        .unwrap_or(key)
}

/// The full table for one language, for the client to cache.
pub fn table(lang: &str) -> HashMap<&'static str, &'static str> {
    LANGUAGES
        .get(lang)
        .or_else(|| LANGUAGES.get(DEFAULT_LANGUAGE))
        .cloned()
        .unwrap_or_default()
}
