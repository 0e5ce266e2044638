//! Doctor command - validate configuration and show status

use anyhow::Result;
use post_relay_adapters::state::SqliteStateStore;
use post_relay_domain::StateStore;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::args::DoctorArgs;
use crate::config::{AppConfig, secret_present};
use crate::sources::{build_source, secret_status};

#[derive(Debug, Serialize)]
struct DoctorReport {
    config: CheckResult,
    state: CheckResult,
    telegram: CheckResult,
    sources: Vec<SourceCheck>,
    overall: String,
}

#[derive(Debug, Serialize)]
struct SourceCheck {
    entry: usize,
    #[serde(flatten)]
    result: CheckResult,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    status: String,
    message: String,
    details: Option<serde_json::Value>,
}

impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn warn(message: impl Into<String>) -> Self {
        Self {
            status: "warn".to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    fn is_error(&self) -> bool {
        self.status == "error"
    }
}

pub async fn execute(args: DoctorArgs, config_path: Option<PathBuf>) -> Result<()> {
    let mut report = DoctorReport {
        config: CheckResult::error("Not checked"),
        state: CheckResult::error("Not checked"),
        telegram: CheckResult::error("Not checked"),
        sources: Vec::new(),
        overall: "error".to_string(),
    };

    // Check config
    let config = match AppConfig::load(config_path.as_deref()) {
        Ok(c) => {
            report.config = CheckResult::ok("Configuration loaded successfully");
            Some(c)
        }
        Err(e) => {
            report.config = CheckResult::error(format!("Failed to load config: {:#}", e));
            None
        }
    };

    if let Some(ref config) = config {
        report.state = check_state(&config.general.state_db_path).await;
        report.telegram = check_telegram(config);
        report.sources = check_sources(config);
    }

    // Source problems only disable that source, so they never make the report fail
    let checks = [&report.config, &report.state, &report.telegram];

    let has_error = checks.iter().any(|c| c.is_error());
    let all_ok = checks.iter().all(|c| c.is_ok())
        && !report.sources.is_empty()
        && report.sources.iter().all(|s| s.result.is_ok());

    report.overall = if has_error {
        "error".to_string()
    } else if all_ok {
        "ok".to_string()
    } else {
        "warn".to_string()
    };

    // Output report
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if report.overall == "error" {
        std::process::exit(1);
    }

    Ok(())
}

async fn check_state(path: &Path) -> CheckResult {
    let store = match SqliteStateStore::new(path).await {
        Ok(store) => store,
        Err(e) => return CheckResult::error(format!("Cannot open {}: {}", path.display(), e)),
    };

    let cursors = store.list_cursors().await;
    let seen = store.seen_count().await;

    match (cursors, seen) {
        (Ok(cursors), Ok(seen)) => CheckResult::ok(format!(
            "{} ({} cursors, {} delivered posts)",
            path.display(),
            cursors.len(),
            seen
        ))
        .with_details(serde_json::json!({
            "path": path.display().to_string(),
            "cursors": cursors.len(),
            "seen": seen,
        })),
        (Err(e), _) | (_, Err(e)) => CheckResult::error(format!("State store unreadable: {}", e)),
    }
}

fn check_telegram(config: &AppConfig) -> CheckResult {
    let token_env = &config.telegram.bot_token_env;
    let chat_env = &config.telegram.chat_id_env;

    let token_set = secret_present(token_env);
    let chat_set = secret_present(chat_env);

    let describe = |name: &str, set: bool| format!("{} ({})", name, if set { "set" } else { "not set" });
    let message = format!(
        "Bot token: {}, Chat id: {}",
        describe(token_env, token_set),
        describe(chat_env, chat_set)
    );

    // Dry runs and the outbox work without these, so a gap is only a warning
    if token_set && chat_set {
        CheckResult::ok(message)
    } else {
        CheckResult::warn(message)
    }
}

fn check_sources(config: &AppConfig) -> Vec<SourceCheck> {
    let client = reqwest::Client::new();
    let timeout = Duration::from_secs(config.general.fetch_timeout_secs.max(1));

    config
        .source_entries()
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let result = match entry {
                Err(e) => CheckResult::error(format!("{:#}", e)),
                Ok(entry) if !entry.enabled => {
                    CheckResult::ok(format!("{} (disabled)", entry.kind))
                }
                Ok(entry) => {
                    let secrets = secret_status(&entry);
                    let details = serde_json::json!({
                        "type": entry.kind,
                        "secrets": secrets
                            .iter()
                            .map(|(env, set)| serde_json::json!({ "env": env, "set": set }))
                            .collect::<Vec<_>>(),
                    });

                    let check = match build_source(&entry, &client, timeout) {
                        Ok(source) => CheckResult::ok(source.source_id().to_string()),
                        Err(e) => CheckResult::warn(format!("{}: {:#}", entry.kind, e)),
                    };
                    check.with_details(details)
                }
            };

            SourceCheck {
                entry: index + 1,
                result,
            }
        })
        .collect()
}

fn print_report(report: &DoctorReport) {
    println!("post-relay Doctor Report");
    println!("========================");
    println!();

    print_check("Config", &report.config);
    print_check("State", &report.state);
    print_check("Telegram", &report.telegram);

    if report.sources.is_empty() {
        println!("⚠ Sources: none configured");
    }
    for source in &report.sources {
        print_check(&format!("Source #{}", source.entry), &source.result);
    }

    println!();
    let symbol = match report.overall.as_str() {
        "ok" => "✓",
        "warn" => "⚠",
        _ => "✗",
    };
    println!("{} Overall: {}", symbol, report.overall.to_uppercase());

    if report.overall == "ok" {
        println!();
        println!("Ready to run! Try: post-relay run --dry-run --once");
    }
}

fn print_check(name: &str, result: &CheckResult) {
    let symbol = match result.status.as_str() {
        "ok" => "✓",
        "warn" => "⚠",
        _ => "✗",
    };
    println!("{} {}: {}", symbol, name, result.message);
}
