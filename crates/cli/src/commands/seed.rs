use shelfmatch_core::config::LoadOptions;
use shelfmatch_db::{DemoDataset, SeedResult};

use crate::commands::session::run_in_session;
use crate::commands::{to_data, CommandResult, Failure};

pub fn run(options: LoadOptions) -> CommandResult {
    run_in_session("seed", options, |session| async move {
        let seed_result = DemoDataset::load(&session.pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = DemoDataset::verify(&session.pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        if !verification.all_present {
            let failed_checks: Vec<&str> = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(check.as_str()))
                .collect();
            return Err(("seed_verification", verification_message(&failed_checks), 6u8));
        }

        let data = to_data(&seed_result)?;
        Ok::<_, Failure>(CommandResult::success_with("seed", summary(&seed_result), data))
    })
}

fn summary(result: &SeedResult) -> String {
    format!(
        "demo dataset loaded: {} taxonomies, {} terms, {} products, {} orders, {} new rules",
        result.taxonomies, result.terms, result.products, result.orders, result.rules_created
    )
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "some seed data failed to load".to_string()
    } else {
        format!("seed verification failed for checks: {}", failed_checks.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::verification_message;

    #[test]
    fn verification_error_message_targets_failed_checks() {
        assert_eq!(
            verification_message(&["products", "rule-index:Glock family"]),
            "seed verification failed for checks: products, rule-index:Glock family"
        );
    }

    #[test]
    fn verification_error_message_falls_back_to_generic_when_no_labels() {
        assert_eq!(verification_message(&[]), "some seed data failed to load");
    }
}
