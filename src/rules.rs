use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use uuid::Uuid;

use crate::analytics::parse_amount;
use crate::record::Record;

/// Priority label assigned to a record by the rule engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Alta,
    Media,
    Baja,
}

impl Priority {
    /// Evaluation order: Alta rules run before Media before Baja.
    fn rank(self) -> u8 {
        match self {
            Priority::Alta => 0,
            Priority::Media => 1,
            Priority::Baja => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "equals")]
    Equals,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<=")]
    LessOrEqual,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Condition {
    pub column: String,
    pub operator: Operator,
    pub value: String,
}

impl Condition {
    /// Text operators compare case-insensitively on trimmed display strings;
    /// numeric operators parse both sides, stripping currency formatting.
    /// A missing column or unparseable number fails the condition.
    fn matches(&self, record: &Record) -> bool {
        let Some(value) = record.get(&self.column) else {
            return false;
        };
        let cell = value.display().trim().to_lowercase();
        let wanted = self.value.trim().to_lowercase();

        match self.operator {
            Operator::Contains => cell.contains(&wanted),
            Operator::Equals => cell == wanted,
            Operator::GreaterThan
            | Operator::LessThan
            | Operator::GreaterOrEqual
            | Operator::LessOrEqual => {
                let (Some(lhs), Ok(rhs)) = (parse_amount(value), wanted.parse::<f64>()) else {
                    return false;
                };
                match self.operator {
                    Operator::GreaterThan => lhs > rhs,
                    Operator::LessThan => lhs < rhs,
                    Operator::GreaterOrEqual => lhs >= rhs,
                    Operator::LessOrEqual => lhs <= rhs,
                    _ => unreachable!(),
                }
            }
        }
    }
}

/// A user-defined priority rule. All conditions AND-combine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_active")]
    pub active: bool,
    pub priority: Priority,
    pub reason: String,
    pub conditions: Vec<Condition>,
}

fn default_active() -> bool {
    true
}

impl Rule {
    fn matches(&self, record: &Record) -> bool {
        !self.conditions.is_empty() && self.conditions.iter().all(|c| c.matches(record))
    }
}

/// Toggles that gate the built-in priority pass and the client's age sort.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_active")]
    pub enable_scf_intercompany: bool,
    #[serde(default = "default_active")]
    pub enable_age_sort: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            enable_scf_intercompany: true,
            enable_age_sort: true,
        }
    }
}

/// The active rule list plus settings, persisted as one JSON document.
///
/// Rules append on creation, so list order doubles as creation order; the
/// same-priority tie-break below relies on that.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RuleBook {
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub settings: Settings,
}

impl RuleBook {
    /// Load the rule book from disk, falling back to defaults when the file
    /// is missing or unreadable.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(data) => serde_json::from_str(&data).unwrap_or_default(),
            Err(_) => RuleBook::default(),
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(path, json)
    }

    /// Insert a new rule or update the one with a matching id. New rules get
    /// a fresh uuid and start active.
    pub fn save_rule(&mut self, mut rule: Rule) -> String {
        if rule.id.is_empty() {
            rule.id = Uuid::new_v4().to_string();
            rule.active = true;
            self.rules.push(rule.clone());
            return rule.id;
        }
        if let Some(existing) = self.rules.iter_mut().find(|r| r.id == rule.id) {
            *existing = rule.clone();
        } else {
            self.rules.push(rule.clone());
        }
        rule.id
    }

    pub fn delete_rule(&mut self, rule_id: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.id != rule_id);
        self.rules.len() < before
    }

    pub fn toggle_rule(&mut self, rule_id: &str, active: bool) -> bool {
        if let Some(rule) = self.rules.iter_mut().find(|r| r.id == rule_id) {
            rule.active = active;
            true
        } else {
            false
        }
    }

    /// Overwrite everything (view import).
    pub fn replace_all(&mut self, rules: Vec<Rule>, settings: Settings) {
        self.rules = rules;
        self.settings = settings;
    }

    /// Active rules in evaluation order: priority tier first, then list
    /// order within a tier.
    fn evaluation_order(&self) -> Vec<&Rule> {
        let mut ordered: Vec<&Rule> = self.rules.iter().filter(|r| r.active).collect();
        ordered.sort_by_key(|r| r.priority.rank());
        ordered
    }
}

/// Recompute every record's derived priority.
///
/// The built-in pass runs first when enabled and a pay-group column exists:
/// SCF/INTERCOMPANY rows are Alta, `PAY GROUP*` rows Baja, the rest Media.
/// User rules then override it, first full match in evaluation order winning.
/// A record matching no active rule and no built-in condition ends with no
/// priority at all.
pub fn recompute(records: &mut [Record], book: &RuleBook, pay_group_column: Option<&str>) {
    let ordered = book.evaluation_order();
    let base_enabled = book.settings.enable_scf_intercompany && pay_group_column.is_some();

    for record in records.iter_mut() {
        let mut assigned: Option<(Priority, String)> = None;

        if base_enabled {
            if let Some(value) = pay_group_column.and_then(|col| record.get(col)) {
                let group = value.display().trim().to_uppercase();
                assigned = Some(if group == "SCF" || group == "INTERCOMPANY" {
                    (
                        Priority::Alta,
                        "Prioridad base (SCF/Intercompany)".to_string(),
                    )
                } else if group.starts_with("PAY GROUP") {
                    (Priority::Baja, "Prioridad base (Pay Group)".to_string())
                } else {
                    (Priority::Media, "Prioridad base (Estándar)".to_string())
                });
            }
        }

        for rule in &ordered {
            if rule.matches(record) {
                assigned = Some((rule.priority, rule.reason.clone()));
                break;
            }
        }

        match assigned {
            Some((priority, reason)) => {
                record.priority = Some(priority);
                record.priority_reason = reason;
            }
            None => {
                record.priority = None;
                record.priority_reason = String::new();
            }
        }
    }
}
