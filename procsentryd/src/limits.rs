//! Rule enforcement against a fresh process table.
//!
//! Rules match loosely (case-insensitive substring of the process name); the
//! whitelist protects precisely (exact lowercase name). Any configured
//! threshold being exceeded triggers the rule's action, with no cooldown.

use crate::control::{ActionOutcome, ProcessControl, act_by_name};
use crate::snapshot::ProcessSource;
use crate::store::{LimitRule, RuleSet, RuleStore, WhitelistStore};
use crate::types::ProcessRecord;
use crate::types::ProcessTable;
use log::{debug, info};
use std::collections::HashSet;
use std::sync::Arc;

/// A matched, non-whitelisted process exceeding at least one threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation<'a> {
    pub record: &'a ProcessRecord,
    pub pattern: &'a str,
    pub action: &'a str,
    pub reasons: Vec<String>,
}

/// Thresholds the record exceeds, in cpu, ram, age order. Unset thresholds
/// never contribute.
pub fn exceeded(record: &ProcessRecord, rule: &LimitRule) -> Vec<String> {
    let mut reasons = Vec::new();
    if let Some(limit) = rule.cpu
        && f64::from(record.cpu) > limit
    {
        reasons.push(format!("CPU {}% > {}%", record.cpu, limit));
    }
    if let Some(limit) = rule.ram
        && record.memory_mb > limit
    {
        reasons.push(format!("RAM {:.0}MB > {}MB", record.memory_mb, limit));
    }
    if let Some(limit) = rule.time
        && record.age_min > limit
    {
        reasons.push(format!("Age {:.1}min > {}min", record.age_min, limit));
    }
    reasons
}

/// Pure rule evaluation: patterns in key order, rows in table order.
pub fn find_violations<'a>(
    table: &'a ProcessTable,
    rules: &'a RuleSet,
    whitelist: &HashSet<String>,
) -> Vec<Violation<'a>> {
    let mut violations = Vec::new();
    for (pattern, rule) in rules {
        for record in table.matching(pattern) {
            if whitelist.contains(&record.name.to_lowercase()) {
                debug!("[limits] {} ({}) whitelisted", record.name, record.pid);
                continue;
            }
            let reasons = exceeded(record, rule);
            if !reasons.is_empty() {
                violations.push(Violation {
                    record,
                    pattern,
                    action: &rule.action,
                    reasons,
                });
            }
        }
    }
    violations
}

/// `KILLED: name (pid) → RAM 2000MB > 1000MB`; failures read
/// `FAILED: ... [controller message]`.
pub fn format_alert(violation: &Violation<'_>, outcome: &ActionOutcome) -> String {
    let status = match (outcome.success, outcome.action) {
        (true, Some(action)) => action.past_tense().to_uppercase(),
        _ => "FAILED".to_string(),
    };
    let line = format!(
        "{status}: {} ({}) → {}",
        violation.record.name,
        violation.record.pid,
        violation.reasons.join(", ")
    );
    if outcome.success {
        line
    } else {
        format!("{line} [{}]", outcome.message)
    }
}

pub struct LimitEngine {
    source: Box<dyn ProcessSource>,
    controller: Arc<dyn ProcessControl>,
    rules: RuleStore,
    whitelist: WhitelistStore,
}

impl LimitEngine {
    pub fn new(
        source: Box<dyn ProcessSource>,
        controller: Arc<dyn ProcessControl>,
        rules: RuleStore,
        whitelist: WhitelistStore,
    ) -> Self {
        Self {
            source,
            controller,
            rules,
            whitelist,
        }
    }

    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    pub fn whitelist(&self) -> &WhitelistStore {
        &self.whitelist
    }

    pub fn controller(&self) -> &Arc<dyn ProcessControl> {
        &self.controller
    }

    /// Re-reads rules and whitelist, takes a fresh process table and acts on
    /// every violation. Returns one alert line per affected process and rule.
    pub fn enforce(&mut self) -> Vec<String> {
        let rules = self.rules.rules();
        if rules.is_empty() {
            return Vec::new();
        }
        let whitelist = self.whitelist.exact_names();
        let table = self.source.process_table();

        let alerts: Vec<String> = find_violations(&table, &rules, &whitelist)
            .iter()
            .map(|violation| {
                let outcome = act_by_name(
                    self.controller.as_ref(),
                    violation.record.pid,
                    violation.action,
                );
                let alert = format_alert(violation, &outcome);
                info!("[limits] rule '{}': {alert}", violation.pattern);
                alert
            })
            .collect();

        if !alerts.is_empty() {
            info!("[limits] {} enforcement alerts this tick", alerts.len());
        }
        alerts
    }
}
