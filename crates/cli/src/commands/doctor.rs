use concierge_core::config::{AppConfig, LoadOptions};
use concierge_core::knowledge::KnowledgeBase;
use concierge_db::{connect_with_settings, ping};
use serde::Serialize;

use crate::commands::{current_thread_runtime, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
pub struct DoctorCheck {
    pub name: &'static str,
    pub status: CheckStatus,
    pub details: String,
}

#[derive(Debug, Serialize)]
pub struct DoctorReport {
    pub overall_status: CheckStatus,
    pub summary: String,
    pub checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    render(&build_report(LoadOptions::default()), json_output)
}

pub fn render(report: &DoctorReport, json_output: bool) -> CommandResult {
    let exit_code = if report.overall_status == CheckStatus::Fail { 1 } else { 0 };
    let output = if json_output {
        serde_json::to_string_pretty(report).unwrap_or_else(|error| {
            serde_json::json!({
                "overall_status": "fail",
                "summary": "doctor serialization failed",
                "error": error.to_string(),
            })
            .to_string()
        })
    } else {
        render_human(report)
    };
    CommandResult { exit_code, output }
}

pub fn build_report(options: LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_credentials(&config));
            checks.push(check_knowledge_corpus(&config));
            checks.push(check_database_connectivity(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["credential_readiness", "knowledge_corpus", "database_connectivity"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let blocked = |check: &DoctorCheck| {
        matches!(check.status, CheckStatus::Fail | CheckStatus::Skipped)
    };
    let overall_status = if checks.iter().any(blocked) {
        CheckStatus::Fail
    } else if checks.iter().any(|check| check.status == CheckStatus::Warn) {
        CheckStatus::Warn
    } else {
        CheckStatus::Pass
    };
    let summary = match overall_status {
        CheckStatus::Pass => "doctor: all readiness checks passed",
        CheckStatus::Warn => "doctor: ready with reduced capability",
        _ => "doctor: one or more readiness checks failed",
    }
    .to_string();

    DoctorReport { overall_status, summary, checks }
}

/// Missing credentials degrade the service rather than stop it.
fn check_credentials(config: &AppConfig) -> DoctorCheck {
    let missing = config.missing_credentials();
    if missing.is_empty() {
        return DoctorCheck {
            name: "credential_readiness",
            status: CheckStatus::Pass,
            details: "channel, llm and calendar credentials configured".to_string(),
        };
    }

    let details = missing
        .iter()
        .map(|credential| format!("{} unset ({})", credential.key_path(), credential.impact()))
        .collect::<Vec<_>>()
        .join("; ");
    DoctorCheck { name: "credential_readiness", status: CheckStatus::Warn, details }
}

fn check_knowledge_corpus(config: &AppConfig) -> DoctorCheck {
    let path = config.knowledge.effective_corpus_path();
    match KnowledgeBase::load(&path) {
        Ok(corpus) if corpus.is_empty() => DoctorCheck {
            name: "knowledge_corpus",
            status: CheckStatus::Warn,
            details: format!("no sections loaded from `{}`", path.display()),
        },
        Ok(corpus) => DoctorCheck {
            name: "knowledge_corpus",
            status: CheckStatus::Pass,
            details: format!(
                "{} sections loaded from `{}`",
                corpus.sections().len(),
                path.display()
            ),
        },
        Err(error) => DoctorCheck {
            name: "knowledge_corpus",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(failure) => {
            return DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: failure.message,
            };
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| format!("failed to connect to database: {error}"))?;

        let answered = ping(&pool).await.map_err(|error| format!("database query failed: {error}"));
        pool.close().await;
        answered
    });

    match result {
        Ok(()) => DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        },
        Err(error) => {
            DoctorCheck { name: "database_connectivity", status: CheckStatus::Fail, details: error }
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}
