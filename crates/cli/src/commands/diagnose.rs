use shelfmatch_core::config::LoadOptions;
use shelfmatch_core::domain::product::ProductId;

use crate::commands::session::{application_failure, run_in_session};
use crate::commands::{to_data, CommandResult, Failure};

pub fn run(options: LoadOptions, product_id: u64) -> CommandResult {
    run_in_session("diagnose", options, |session| async move {
        let report =
            session.matcher.diagnose(ProductId(product_id)).await.map_err(application_failure)?;

        let message = match &report.matched_rule {
            Some(rule) => format!(
                "product {product_id} matched rule {} ({}) with {} results in {:.2} ms",
                rule.id,
                rule.name,
                report.product_ids.len(),
                report.elapsed_ms
            ),
            None => format!("no rule matched product {product_id}"),
        };
        let data = to_data(&report)?;
        Ok::<_, Failure>(CommandResult::success_with("diagnose", message, data))
    })
}
