use serde::Serialize;
use shelfmatch_core::config::{AppConfig, LoadOptions};
use shelfmatch_core::domain::rule::RuleQuery;
use shelfmatch_core::ports::{BuildLog, RuleRepository};
use shelfmatch_db::{connect_with_config, migrations, DbPool, SqlBuildLog, SqlRuleRepository};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn skipped(name: &'static str, reason: &str) -> Self {
        Self { name, status: CheckStatus::Skipped, details: format!("skipped because {reason}") }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(options: LoadOptions, json_output: bool) -> String {
    let report = build_report(options);

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report(options: LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            let dependent =
                ["database_connectivity", "schema_migrations", "lookup_index", "smart_builds"];
            for name in dependent {
                checks.push(DoctorCheck::skipped(name, "configuration did not load"));
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("failed to initialize async runtime: {error}"),
                },
                DoctorCheck::skipped("schema_migrations", "no runtime was available"),
                DoctorCheck::skipped("lookup_index", "no runtime was available"),
                DoctorCheck::skipped("smart_builds", "no runtime was available"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck {
                        name: "database_connectivity",
                        status: CheckStatus::Fail,
                        details: format!("failed to connect to database: {error}"),
                    },
                    DoctorCheck::skipped("schema_migrations", "the database is unreachable"),
                    DoctorCheck::skipped("lookup_index", "the database is unreachable"),
                    DoctorCheck::skipped("smart_builds", "the database is unreachable"),
                ];
            }
        };

        let mut checks = vec![DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        }];

        let schema = check_schema(&pool).await;
        let schema_ready = schema.status == CheckStatus::Pass;
        checks.push(schema);
        if schema_ready {
            checks.push(check_lookup_index(&pool).await);
            checks.push(check_smart_builds(&pool).await);
        } else {
            checks.push(DoctorCheck::skipped("lookup_index", "migrations are pending"));
            checks.push(DoctorCheck::skipped("smart_builds", "migrations are pending"));
        }

        pool.close().await;
        checks
    })
}

async fn check_schema(pool: &DbPool) -> DoctorCheck {
    let known = migrations::MIGRATOR.iter().count() as i64;
    let applied: Result<i64, sqlx::Error> =
        sqlx::query_scalar("SELECT COUNT(1) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await;

    match applied {
        Ok(applied) if applied >= known => DoctorCheck {
            name: "schema_migrations",
            status: CheckStatus::Pass,
            details: format!("{applied} of {known} migrations applied"),
        },
        Ok(applied) => DoctorCheck {
            name: "schema_migrations",
            status: CheckStatus::Fail,
            details: format!("{applied} of {known} migrations applied; run `shelfmatch migrate`"),
        },
        Err(error) => DoctorCheck {
            name: "schema_migrations",
            status: CheckStatus::Fail,
            details: format!("migration history unavailable: {error}"),
        },
    }
}

/// Enabled rules with conditions but no index rows can never match.
async fn check_lookup_index(pool: &DbPool) -> DoctorCheck {
    let rules = SqlRuleRepository::new(pool.clone());
    let result = async {
        let enabled = rules.list_rules(&RuleQuery::enabled()).await?;
        let mut stale = Vec::new();
        for rule in &enabled {
            let has_conditions = !rules.load_conditions(rule.id).await?.is_empty();
            if has_conditions && rules.index_entries_for(rule.id).await?.is_empty() {
                stale.push(rule.id.to_string());
            }
        }
        Ok::<_, shelfmatch_core::errors::ApplicationError>((enabled.len(), stale))
    }
    .await;

    match result {
        Ok((total, stale)) if stale.is_empty() => DoctorCheck {
            name: "lookup_index",
            status: CheckStatus::Pass,
            details: format!("{total} enabled rules indexed"),
        },
        Ok((_, stale)) => DoctorCheck {
            name: "lookup_index",
            status: CheckStatus::Fail,
            details: format!(
                "rules without index rows: {}; run `shelfmatch index rebuild`",
                stale.join(", ")
            ),
        },
        Err(error) => DoctorCheck {
            name: "lookup_index",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

/// Informational: a database that never ran `smart build` still passes.
async fn check_smart_builds(pool: &DbPool) -> DoctorCheck {
    let details = match SqlBuildLog::new(pool.clone()).last_build().await {
        Ok(Some(last)) => {
            let mut built = Vec::new();
            if let Some(stats) = &last.report.copurchase {
                built.push(format!("co-purchase for {} products", stats.products_indexed));
            }
            if let Some(stats) = &last.report.trending {
                built.push(format!("trending for {} categories", stats.categories));
            }
            format!("last built {} ({})", last.built_at.to_rfc3339(), built.join(", "))
        }
        Ok(None) => "no smart build recorded".to_string(),
        Err(error) => {
            return DoctorCheck {
                name: "smart_builds",
                status: CheckStatus::Fail,
                details: error.to_string(),
            };
        }
    };

    DoctorCheck { name: "smart_builds", status: CheckStatus::Pass, details }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
