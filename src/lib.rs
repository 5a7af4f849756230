//! # Invoice Workbench
//!
//! A browser-based tool for reviewing and cleaning invoice spreadsheets, built in
//! Rust.
//!
//! ## Overview
//!
//! A user uploads a CSV or XLSX file, filters and edits it in the browser, and
//! exports the result. Every edit lands on an in-memory staging copy of the
//! upload — the file itself is never touched — and can be rolled back through a
//! bounded undo history. A chat copilot backed by a hosted language model can
//! drive the same operations through natural-language commands.
//!
//! ## Architecture
//!
//! The application follows a client-server architecture:
//!
//! ### Frontend Layer
//! - A single embedded HTML page: grid rendering, filter chips, selection-based
//!   bulk actions, a chat panel, and KPI tiles
//! - Chat-derived actions and button clicks dispatch through the same fetch
//!   calls, so both write paths behave identically
//!
//! ### Backend Layer
//! - **Technologies**: Rust, axum
//! - **Core Components**:
//!   - Staging Layer - The mutable working copy of one uploaded dataset
//!   - Mutation Engine - The single choke-point every edit goes through
//!   - Undo History - Bounded LIFO stack of reversible snapshots (depth 15)
//!   - Rule Engine - Priority labels derived from user rules and settings
//!   - Filter/Group Engine - AND-combined substring filters, grouped aggregates
//!   - Session Registry - Per-session state behind a cookie, with expiry
//!   - Chat Bridge - Function-calling wrapper over a hosted model, emitting a
//!     closed set of validated UI actions
//!
//! ## Modules
//!
//! - **record**: cell values, column schema, row records
//! - **staging**: the staging layer and mutation engine
//! - **history**: the bounded undo stack
//! - **rules**: priority rules, settings, persistence, recomputation
//! - **filters**: filtering and grouping
//! - **analytics**: summary figures, outlier scoring, duplicate detection
//! - **autocomplete**: per-column suggestion lists
//! - **loader**: CSV/XLSX upload parsing
//! - **downloader**: XLSX/CSV/audit-log export
//! - **session**: the session registry and audit trail
//! - **agent**: the hosted-LLM chat bridge
//! - **translator**: UI string tables
//! - **app**: routing and handlers
//!
//! ## REST API Endpoints
//!
//! - `/api/upload` - Parse a spreadsheet and stage it for the session
//! - `/api/filter`, `/api/group_by` - Query the current view
//! - `/api/update_cell`, `/api/add_row`, `/api/delete_row` - Row edits
//! - `/api/bulk_update`, `/api/find_replace_in_selection`,
//!   `/api/bulk_delete_rows`, `/api/delete_column` - Bulk edits
//! - `/api/undo_change`, `/api/commit_changes` - History control
//! - `/api/priority_rules/*` - Rule management
//! - `/api/chat_agent` - Natural-language commands
//! - `/api/analyze_anomalies`, `/api/get_duplicate_invoices`,
//!   `/api/cleanup_duplicate_invoices` - Data quality
//! - `/api/download_*` - Exports

pub mod agent;
pub mod analytics;
pub mod app;
pub mod autocomplete;
pub mod downloader;
pub mod errors;
pub mod filters;
pub mod history;
pub mod loader;
pub mod record;
pub mod rules;
pub mod session;
pub mod staging;
pub mod translator;

pub use errors::WorkbenchError;
pub use history::MAX_UNDO_DEPTH;
