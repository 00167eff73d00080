//! Entry fixtures with realistic knowledge-base content.

use chrono::{Duration, Utc};
use kenning_core::{Entry, EntryType};

/// Build an entry with a path and tags, ready for manager-level validation
pub fn entry(id: &str, title: &str, content: &str, tags: &[&str]) -> Entry {
    let mut e = Entry::new(id, title, content);
    e.path = format!("/kb/{id}.md");
    e.hash = format!("h-{id}");
    e.metadata.tags = tags.iter().map(|t| t.to_string()).collect();
    e
}

/// A small realistic corpus spanning types, categories, tags and ages
pub fn knowledge_corpus() -> Vec<Entry> {
    let now = Utc::now();
    let mut entries = vec![
        entry(
            "auth-errors",
            "Authentication Error Handling",
            "Retry failed authentication attempts with exponential backoff. \
             Watch for clock skew between services when validating tokens.",
            &["auth", "errors"],
        ),
        entry(
            "error-logging",
            "Error Logging",
            "Structured logging of application errors with correlation ids.",
            &["errors", "logging"],
        ),
        entry(
            "ui-layout",
            "User Interface",
            "Component layout guidance for the settings screen.",
            &["frontend"],
        ),
        entry(
            "db-timeout",
            "Database Timeouts",
            "A database connection timeout usually points at pool exhaustion.",
            &["database", "errors"],
        ),
        entry(
            "deploy-runbook",
            "Deployment Runbook",
            "Release steps, smoke checks and rollback procedure for errors in production.",
            &["deploy"],
        ),
    ];

    entries[0].entry_type = EntryType::Gotcha;
    entries[0].category = Some("security".into());
    entries[0].metadata.effectiveness = Some(0.9);
    entries[0].metadata.project_id = Some("p1".into());

    entries[1].entry_type = EntryType::Knowledge;
    entries[1].category = Some("observability".into());

    entries[2].entry_type = EntryType::Knowledge;
    entries[2].category = Some("frontend".into());
    entries[2].last_modified = now - Duration::days(90);

    entries[3].entry_type = EntryType::Gotcha;
    entries[3].category = Some("database".into());
    entries[3].metadata.usage_count = 40;

    entries[4].entry_type = EntryType::Adr;
    entries[4].metadata.agent_types = vec!["ops".into()];

    entries
}
