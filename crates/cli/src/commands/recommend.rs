use serde::Serialize;
use shelfmatch_core::config::LoadOptions;
use shelfmatch_core::domain::product::ProductId;
use shelfmatch_core::matcher::RecommendationArgs;
use shelfmatch_core::recently_viewed::RecentlyViewed;

use crate::commands::session::{application_failure, run_in_session};
use crate::commands::{to_data, CommandResult, Failure};

#[derive(Clone, Debug, Default)]
pub struct RecommendOptions {
    pub limit: Option<u32>,
    pub exclude_outofstock: Option<bool>,
    /// Raw cookie value, most recent first.
    pub recently_viewed: Option<String>,
}

#[derive(Debug, Serialize)]
struct RecommendationOutput {
    product_id: ProductId,
    recommendations: Vec<ProductId>,
    /// Cookie value, with this product recorded when tracking is enabled.
    recently_viewed: String,
}

pub fn run(options: LoadOptions, product_id: u64, request: RecommendOptions) -> CommandResult {
    run_in_session("recommend", options, |session| async move {
        let mut viewed =
            request.recently_viewed.as_deref().map(RecentlyViewed::parse).unwrap_or_default();
        let product_id = ProductId(product_id);

        let args = RecommendationArgs {
            limit: request.limit,
            exclude_outofstock: request.exclude_outofstock,
            recently_viewed: viewed.ids().to_vec(),
        };
        let recommendations =
            session.matcher.get_recommendations(product_id, &args).await.map_err(application_failure)?;

        if session.config.engine.smart_recently_viewed {
            viewed.record(product_id);
        }
        let output = RecommendationOutput {
            product_id,
            recommendations,
            recently_viewed: viewed.to_cookie_value(),
        };

        let message = format!(
            "{} recommendations for product {product_id}",
            output.recommendations.len()
        );
        let data = to_data(&output)?;
        Ok::<_, Failure>(CommandResult::success_with("recommend", message, data))
    })
}
