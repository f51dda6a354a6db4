//! Template import: `leadflow templates import <file.toml>`.
//!
//! ```toml
//! [[follow_up]]
//! template_name = "initial_contact_no_response_1"
//! stage = "initial_contact"
//! follow_up_number = 1
//! delay_hours = 4
//! message_template = "Hi {name}, any questions about your project?"
//!
//! [[reminder]]
//! template_name = "reminder_24h"
//! reminder_type = "24h"
//! message_template = "Hi {name}, see you tomorrow at {appointment_time}."
//! ```

use anyhow::Context as _;
use leadflow_core::{
    model::{FollowUpTemplate, ReminderKind, ReminderTemplate},
    stage::Stage,
};
use leadflow_store::Store;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct TemplateFile {
    #[serde(default)]
    pub follow_up: Vec<FollowUpEntry>,
    #[serde(default)]
    pub reminder: Vec<ReminderEntry>,
}

#[derive(Debug, Deserialize)]
pub struct FollowUpEntry {
    pub template_name: String,
    pub stage: Stage,
    /// Campaign; the configured default campaign when omitted.
    #[serde(default)]
    pub template_type: Option<String>,
    pub follow_up_number: i64,
    #[serde(default)]
    pub delay_hours: i64,
    #[serde(default)]
    pub delay_minutes: i64,
    pub message_template: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct ReminderEntry {
    pub template_name: String,
    pub reminder_type: ReminderKind,
    pub message_template: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// Counts of templates written by one import.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub follow_ups: usize,
    pub reminders: usize,
}

pub fn parse(content: &str) -> anyhow::Result<TemplateFile> {
    toml::from_str(content).context("failed to parse template file")
}

/// Upsert every template in `file`, keyed by `template_name`.
pub async fn import(
    store: &Store,
    file: TemplateFile,
    default_campaign: &str,
) -> anyhow::Result<ImportSummary> {
    let mut summary = ImportSummary::default();

    for entry in file.follow_up {
        let template = FollowUpTemplate {
            id: Uuid::new_v4().to_string(),
            template_type: entry
                .template_type
                .unwrap_or_else(|| default_campaign.to_string()),
            template_name: entry.template_name,
            stage: entry.stage,
            follow_up_number: entry.follow_up_number,
            delay_hours: entry.delay_hours,
            delay_minutes: entry.delay_minutes,
            message_template: entry.message_template,
            is_active: entry.is_active,
        };
        store
            .upsert_follow_up_template(&template)
            .await
            .with_context(|| format!("template {}", template.template_name))?;
        summary.follow_ups += 1;
    }

    for entry in file.reminder {
        let template = ReminderTemplate {
            id: Uuid::new_v4().to_string(),
            template_name: entry.template_name,
            reminder_type: entry.reminder_type,
            message_template: entry.message_template,
            is_active: entry.is_active,
        };
        store
            .upsert_reminder_template(&template)
            .await
            .with_context(|| format!("reminder template {}", template.template_name))?;
        summary.reminders += 1;
    }

    info!(
        "imported {} follow-up and {} reminder templates",
        summary.follow_ups, summary.reminders
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[follow_up]]
template_name = "initial_contact_no_response_1"
stage = "initial_contact"
follow_up_number = 1
delay_hours = 4
message_template = "Hi {name}, any questions?"

[[follow_up]]
template_name = "budget_nudge_1"
stage = "budget"
template_type = "nudge"
follow_up_number = 1
delay_minutes = 30
message_template = "Any thoughts on budget, {name}?"
is_active = false

[[reminder]]
template_name = "reminder_2h"
reminder_type = "2h"
message_template = "See you at {appointment_time}, {name}."
"#;

    #[test]
    fn test_parse_sample() {
        let file = parse(SAMPLE).unwrap();
        assert_eq!(file.follow_up.len(), 2);
        assert_eq!(file.follow_up[0].stage, Stage::InitialContact);
        assert_eq!(file.follow_up[0].template_type, None);
        assert!(file.follow_up[0].is_active);
        assert_eq!(file.follow_up[1].delay_hours, 0);
        assert_eq!(file.follow_up[1].delay_minutes, 30);
        assert_eq!(file.reminder[0].reminder_type, ReminderKind::TwoHoursBefore);
    }

    #[test]
    fn test_parse_rejects_unknown_stage() {
        let bad = r#"
[[follow_up]]
template_name = "x"
stage = "negotiation"
follow_up_number = 1
message_template = "hi"
"#;
        assert!(parse(bad).is_err());
    }

    #[test]
    fn test_parse_empty_file() {
        let file = parse("").unwrap();
        assert!(file.follow_up.is_empty());
        assert!(file.reminder.is_empty());
    }

    #[tokio::test]
    async fn test_import_upserts_by_name() {
        let store = Store::in_memory().await.unwrap();
        let summary = import(&store, parse(SAMPLE).unwrap(), "no_response")
            .await
            .unwrap();
        assert_eq!(
            summary,
            ImportSummary {
                follow_ups: 2,
                reminders: 1
            }
        );

        // Re-importing replaces rather than duplicates.
        import(&store, parse(SAMPLE).unwrap(), "no_response")
            .await
            .unwrap();
        let all = store.list_follow_up_templates().await.unwrap();
        assert_eq!(all.len(), 2);

        let active = store
            .list_active_templates(Stage::InitialContact, "no_response")
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].delay_hours, 4);
        assert!(store
            .list_active_templates(Stage::Budget, "nudge")
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.list_reminder_templates().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_import_rejects_bad_number() {
        let store = Store::in_memory().await.unwrap();
        let bad = r#"
[[follow_up]]
template_name = "zero"
stage = "budget"
follow_up_number = 0
message_template = "hi"
"#;
        assert!(import(&store, parse(bad).unwrap(), "no_response")
            .await
            .is_err());
    }
}
