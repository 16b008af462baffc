//! Per-service stat aggregation for `admin.service_stats` / `admin.get_stats`.
//!
//! A worker's reported dict entries are either integers, which accumulate into a running
//! counter (missing keys start at zero), or anything else, which simply replaces the prior
//! value.

use std::collections::BTreeMap;

use hivemind_proto::StatValue;

#[derive(Clone, Debug, Default)]
pub struct ServiceStats {
    values: BTreeMap<String, StatValue>,
}

impl ServiceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_report(&mut self, report: Vec<(String, StatValue)>) {
        for (key, value) in report {
            match value {
                StatValue::Int(delta) => {
                    let entry = self.values.entry(key).or_insert(StatValue::Int(0));
                    match entry {
                        StatValue::Int(current) => *current += delta,
                        StatValue::Text(_) => *entry = StatValue::Int(delta),
                    }
                }
                text @ StatValue::Text(_) => {
                    self.values.insert(key, text);
                }
            }
        }
    }

    pub fn snapshot(&self) -> &BTreeMap<String, StatValue> {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_reports_accumulate_and_create_missing_keys_at_zero() {
        let mut stats = ServiceStats::new();
        stats.apply_report(vec![("notifies".into(), StatValue::Int(3))]);
        stats.apply_report(vec![("notifies".into(), StatValue::Int(4))]);
        assert!(matches!(stats.snapshot().get("notifies"), Some(StatValue::Int(7))));
    }

    #[test]
    fn text_reports_replace_rather_than_accumulate() {
        let mut stats = ServiceStats::new();
        stats.apply_report(vec![("status".into(), StatValue::Text("ok".into()))]);
        stats.apply_report(vec![("status".into(), StatValue::Text("degraded".into()))]);
        assert!(matches!(stats.snapshot().get("status"), Some(StatValue::Text(s)) if s == "degraded"));
    }
}
