//! Signatures derived from the audit trail.

use crate::{Action, AuditEntry, User};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One signer row on the final document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub role_label: String,
    pub actor_id: String,
    pub name: String,
    pub emp_code: String,
    pub signed_at: DateTime<Utc>,
}

impl Signature {
    /// Timestamp in the host's local time zone, as printed on the document.
    pub fn local_timestamp(&self) -> String {
        self.signed_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }
}

/// Printed label for the role an action signs in. Rejections do not sign.
pub fn role_label(action: Action) -> Option<&'static str> {
    match action {
        Action::Submit => Some("Prepared By"),
        Action::Endorse => Some("Verified By"),
        Action::Approve => Some("Approved By"),
        Action::Reject => None,
    }
}

/// Latest entry per (actor, role), sorted by timestamp ascending.
///
/// Each approving actor keeps an independent row; two approvers never collapse
/// into one. Actors missing from `users` sign with their id and an empty code.
pub fn derive_signatures(entries: &[AuditEntry], users: &HashMap<String, User>) -> Vec<Signature> {
    let mut latest: HashMap<(&str, Action), &AuditEntry> = HashMap::new();
    for entry in entries {
        if role_label(entry.action).is_none() {
            continue;
        }
        let key = (entry.actor_id.as_str(), entry.action);
        match latest.get(&key) {
            Some(prev) if (prev.timestamp, prev.id) > (entry.timestamp, entry.id) => {}
            _ => {
                latest.insert(key, entry);
            }
        }
    }

    let mut chosen: Vec<&AuditEntry> = latest.into_values().collect();
    chosen.sort_by_key(|e| (e.timestamp, e.id));
    chosen
        .into_iter()
        .filter_map(|e| {
            let label = role_label(e.action)?;
            let user = users.get(&e.actor_id);
            Some(Signature {
                role_label: label.to_string(),
                actor_id: e.actor_id.clone(),
                name: user
                    .map(|u| u.name.clone())
                    .unwrap_or_else(|| e.actor_id.clone()),
                emp_code: user.and_then(|u| u.emp_code.clone()).unwrap_or_default(),
                signed_at: e.timestamp,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(id: i64, actor: &str, action: Action, secs: i64) -> AuditEntry {
        AuditEntry {
            id,
            report_id: 7,
            actor_id: actor.to_string(),
            action,
            comments: None,
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    #[test]
    fn latest_per_actor_and_role_sorted() {
        let entries = vec![
            entry(1, "owner", Action::Submit, 0),
            entry(2, "rev", Action::Reject, 10),
            entry(3, "owner", Action::Submit, 20),
            entry(4, "rev", Action::Endorse, 30),
            entry(5, "A1", Action::Approve, 40),
        ];
        let sigs = derive_signatures(&entries, &HashMap::new());
        let rows: Vec<(&str, &str)> = sigs
            .iter()
            .map(|s| (s.role_label.as_str(), s.actor_id.as_str()))
            .collect();
        assert_eq!(
            rows,
            vec![("Prepared By", "owner"), ("Verified By", "rev"), ("Approved By", "A1")]
        );
        assert_eq!(sigs[0].signed_at, entries[2].timestamp);
    }

    #[test]
    fn distinct_approvers_each_keep_a_row() {
        let mut entries = vec![entry(1, "owner", Action::Submit, 0)];
        for (i, approver) in ["A1", "A2", "A3"].iter().enumerate() {
            entries.push(entry(10 + i as i64, approver, Action::Approve, 100 + i as i64));
        }
        entries.push(entry(20, "A1", Action::Approve, 200));
        let sigs = derive_signatures(&entries, &HashMap::new());
        let approvers: Vec<&str> = sigs
            .iter()
            .filter(|s| s.role_label == "Approved By")
            .map(|s| s.actor_id.as_str())
            .collect();
        assert_eq!(approvers, vec!["A2", "A3", "A1"]);
    }

    #[test]
    fn user_profile_supplies_name_and_code() {
        let mut users = HashMap::new();
        users.insert(
            "owner".to_string(),
            User {
                user_id: "owner".to_string(),
                name: "Asha Rao".to_string(),
                role: crate::Role::User,
                email: "asha@example.com".to_string(),
                emp_code: Some("E100".to_string()),
                designation: Some("Lead Dev".to_string()),
            },
        );
        let sigs = derive_signatures(&[entry(1, "owner", Action::Submit, 0)], &users);
        assert_eq!(sigs[0].name, "Asha Rao");
        assert_eq!(sigs[0].emp_code, "E100");
    }
}
