mod common;

use shelfmatch_core::config::EngineSettings;
use shelfmatch_core::domain::product::ProductId;
use rust_decimal::Decimal;
use shelfmatch_core::domain::rule::{
    Action, ActionSource, Condition, ConditionGroup, OrderBy, RuleDraft, RuleId, RulePatch,
};
use shelfmatch_core::matcher::RecommendationArgs;
use shelfmatch_core::ports::IdListStore;
use shelfmatch_db::repositories::catalog::ProductRecord;

use common::{store_catalog, Harness, BACKENDS};

fn group(id: u32, conditions: Vec<Condition>) -> ConditionGroup {
    ConditionGroup::new(id, conditions)
}

fn holsters_bestselling() -> Action {
    Action::new(ActionSource::category("holsters")).with_orderby(OrderBy::Bestselling)
}

fn optics_by_price() -> Action {
    Action::new(ActionSource::category("optics")).with_orderby(OrderBy::Price)
}

#[tokio::test]
async fn highest_priority_matching_rule_wins() {
    for backend in BACKENDS {
        let harness = Harness::new(backend, &store_catalog()).await;
        harness
            .rule(
                RuleDraft::new("brand").with_priority(10),
                vec![group(0, vec![Condition::equals("pa_brand", "glock")])],
                vec![optics_by_price()],
            )
            .await;
        harness
            .rule(
                RuleDraft::new("pistols").with_priority(5),
                vec![group(0, vec![Condition::equals("product_cat", "pistols")])],
                vec![holsters_bestselling()],
            )
            .await;

        assert_eq!(harness.recommend(100).await, vec![200, 201, 301], "{backend:?}");
    }
}

#[tokio::test]
async fn equal_priorities_fall_back_to_lowest_rule_id() {
    for backend in BACKENDS {
        let harness = Harness::new(backend, &store_catalog()).await;
        harness
            .rule(
                RuleDraft::new("first"),
                vec![group(0, vec![Condition::equals("pa_brand", "glock")])],
                vec![optics_by_price()],
            )
            .await;
        harness
            .rule(
                RuleDraft::new("second"),
                vec![group(0, vec![Condition::equals("product_cat", "pistols")])],
                vec![holsters_bestselling()],
            )
            .await;

        assert_eq!(harness.recommend(100).await, vec![301, 300], "{backend:?}");
    }
}

#[tokio::test]
async fn winning_rule_with_empty_actions_does_not_fall_through() {
    for backend in BACKENDS {
        let harness = Harness::new(backend, &store_catalog()).await;
        harness
            .rule(
                RuleDraft::new("dead end").with_priority(1),
                vec![group(0, vec![Condition::equals("product_cat", "pistols")])],
                vec![Action::new(ActionSource::category("discontinued"))],
            )
            .await;
        harness
            .rule(
                RuleDraft::new("fallback").with_priority(50),
                vec![group(0, vec![Condition::equals("pa_brand", "glock")])],
                vec![optics_by_price()],
            )
            .await;

        assert!(harness.recommend(100).await.is_empty(), "{backend:?}");
    }
}

#[tokio::test]
async fn groups_are_anded_inside_and_ored_across() {
    for backend in BACKENDS {
        let harness = Harness::new(backend, &store_catalog()).await;
        harness
            .rule(
                RuleDraft::new("sale pistols or rifles"),
                vec![
                    group(
                        0,
                        vec![
                            Condition::equals("product_cat", "pistols"),
                            Condition::equals("product_tag", "sale"),
                        ],
                    ),
                    group(1, vec![Condition::equals("product_cat", "rifles")]),
                ],
                vec![optics_by_price()],
            )
            .await;

        assert_eq!(harness.recommend(101).await, vec![301, 300], "{backend:?}: rifles only");
        assert_eq!(harness.recommend(102).await, vec![301, 300], "{backend:?}: pistol on sale");
        assert!(harness.recommend(100).await.is_empty(), "{backend:?}: pistol without tag");
    }
}

#[tokio::test]
async fn include_children_matches_descendant_categories() {
    for backend in BACKENDS {
        let harness = Harness::new(backend, &store_catalog()).await;
        let rule = harness
            .rule(
                RuleDraft::new("all firearms"),
                vec![group(0, vec![Condition::equals("product_cat", "firearms").including_children()])],
                vec![optics_by_price()],
            )
            .await;

        assert_eq!(harness.recommend(100).await, vec![301, 300], "{backend:?}");

        let keys: Vec<String> = harness
            .store
            .index_entries(rule.id)
            .await
            .expect("entries")
            .into_iter()
            .map(|entry| entry.condition_key.0)
            .collect();
        assert_eq!(
            keys,
            ["product_cat:firearms", "product_cat:pistols", "product_cat:rifles"],
            "{backend:?}"
        );
    }
}

#[tokio::test]
async fn direct_category_condition_ignores_children() {
    for backend in BACKENDS {
        let harness = Harness::new(backend, &store_catalog()).await;
        harness
            .rule(
                RuleDraft::new("firearms exact"),
                vec![group(0, vec![Condition::equals("product_cat", "firearms")])],
                vec![optics_by_price()],
            )
            .await;

        assert!(harness.recommend(100).await.is_empty(), "{backend:?}");
        assert_eq!(harness.recommend(103).await, vec![301, 300], "{backend:?}");
    }
}

#[tokio::test]
async fn repeated_requests_are_served_from_cache() {
    for backend in BACKENDS {
        let harness = Harness::new(backend, &store_catalog()).await;
        harness
            .rule(
                RuleDraft::new("random holsters"),
                vec![group(0, vec![Condition::equals("product_cat", "pistols")])],
                vec![Action::new(ActionSource::category("holsters"))],
            )
            .await;
        let args = RecommendationArgs::default();

        let first = harness.recommend_with(100, &args).await;
        let queries = harness.memory_catalog.as_ref().map(|catalog| catalog.query_count());
        let second = harness.recommend_with(100, &args).await;

        assert_eq!(first, second, "{backend:?}");
        assert_eq!(
            harness.memory_catalog.as_ref().map(|catalog| catalog.query_count()),
            queries,
            "{backend:?}: cached request must not query the catalog"
        );
        let cached = harness.ports.cache.get(&args.cache_key(ProductId(100))).await.expect("cache");
        assert_eq!(
            cached.map(|ids| ids.into_iter().map(|id| id.0).collect::<Vec<_>>()),
            Some(first),
            "{backend:?}"
        );
    }
}

#[tokio::test]
async fn overlapping_actions_are_deduplicated_in_declaration_order() {
    for backend in BACKENDS {
        let harness = Harness::new(backend, &store_catalog()).await;
        harness
            .rule(
                RuleDraft::new("holsters then optics"),
                vec![group(0, vec![Condition::equals("product_cat", "pistols")])],
                vec![holsters_bestselling(), optics_by_price()],
            )
            .await;

        assert_eq!(harness.recommend(100).await, vec![200, 201, 301, 300], "{backend:?}");
    }
}

#[tokio::test]
async fn limit_override_caps_each_action_and_the_merged_list() {
    for backend in BACKENDS {
        let harness = Harness::new(backend, &store_catalog()).await;
        harness
            .rule(
                RuleDraft::new("holsters then optics"),
                vec![group(0, vec![Condition::equals("product_cat", "pistols")])],
                vec![holsters_bestselling(), optics_by_price()],
            )
            .await;
        let args = RecommendationArgs { limit: Some(2), ..RecommendationArgs::default() };

        assert_eq!(harness.recommend_with(100, &args).await, vec![200, 201], "{backend:?}");
    }
}

#[tokio::test]
async fn disabling_a_rule_removes_it_from_the_index() {
    for backend in BACKENDS {
        let harness = Harness::new(backend, &store_catalog()).await;
        let rule = harness
            .rule(
                RuleDraft::new("pistols"),
                vec![group(0, vec![Condition::equals("product_cat", "pistols")])],
                vec![holsters_bestselling()],
            )
            .await;

        let disabled = harness.store.toggle_status(rule.id).await.expect("disable");
        assert!(!disabled.is_enabled());
        assert!(harness.store.index_entries(rule.id).await.expect("entries").is_empty());
        assert!(harness.recommend(102).await.is_empty(), "{backend:?}");

        harness.store.toggle_status(rule.id).await.expect("enable");
        assert_eq!(harness.store.index_entries(rule.id).await.expect("entries").len(), 1);
        assert_eq!(harness.recommend(102).await, vec![200, 201, 301], "{backend:?}");
    }
}

#[tokio::test]
async fn rule_without_conditions_never_matches() {
    for backend in BACKENDS {
        let harness = Harness::new(backend, &store_catalog()).await;
        let rule = harness
            .rule(
                RuleDraft::new("catch all?"),
                vec![group(0, vec![Condition::equals("product_cat", "")])],
                vec![optics_by_price()],
            )
            .await;

        assert!(harness.store.get_conditions(rule.id).await.expect("conditions").is_empty());
        assert!(harness.store.index_entries(rule.id).await.expect("entries").is_empty());
        for product in [100, 101, 102, 103] {
            assert!(harness.recommend(product).await.is_empty(), "{backend:?}: {product}");
        }
    }
}

#[tokio::test]
async fn stock_filter_prefers_caller_then_rule_then_global() {
    for backend in BACKENDS {
        let harness = Harness::new(backend, &store_catalog()).await;
        harness
            .rule(
                RuleDraft::new("show sold out").with_exclude_outofstock(false),
                vec![group(0, vec![Condition::equals("product_cat", "pistols")])],
                vec![holsters_bestselling()],
            )
            .await;

        assert_eq!(harness.recommend(100).await, vec![202, 200, 201, 301], "{backend:?}: rule");

        let strict = RecommendationArgs { exclude_outofstock: Some(true), ..RecommendationArgs::default() };
        assert_eq!(harness.recommend_with(100, &strict).await, vec![200, 201, 301], "{backend:?}: caller");
    }
}

#[tokio::test]
async fn inherited_stock_filter_uses_the_global_setting() {
    for backend in BACKENDS {
        let harness = Harness::new(backend, &store_catalog()).await;
        harness
            .rule(
                RuleDraft::new("inherit"),
                vec![group(0, vec![Condition::equals("product_cat", "pistols")])],
                vec![holsters_bestselling()],
            )
            .await;
        let lenient = EngineSettings { exclude_outofstock: false, ..EngineSettings::default() };

        let ids = harness
            .matcher_with(lenient)
            .get_recommendations(ProductId(100), &RecommendationArgs::default())
            .await
            .expect("recommendations");

        assert_eq!(ids, [202, 200, 201, 301].map(ProductId), "{backend:?}");
    }
}

#[tokio::test]
async fn unresolvable_actions_are_skipped() {
    for backend in BACKENDS {
        let harness = Harness::new(backend, &store_catalog()).await;
        harness
            .rule(
                RuleDraft::new("mixed"),
                vec![group(0, vec![Condition::equals("pa_brand", "glock")])],
                vec![
                    Action::new(ActionSource::category("nope")),
                    Action::new(ActionSource::attribute_value("", "x")),
                    Action::new(ActionSource::tag("sale")).with_orderby(OrderBy::Price),
                ],
            )
            .await;

        assert_eq!(harness.recommend(100).await, vec![102], "{backend:?}");
    }
}

#[tokio::test]
async fn disabled_engine_and_unknown_products_yield_nothing() {
    for backend in BACKENDS {
        let harness = Harness::new(backend, &store_catalog()).await;
        harness
            .rule(
                RuleDraft::new("pistols"),
                vec![group(0, vec![Condition::equals("product_cat", "pistols")])],
                vec![holsters_bestselling()],
            )
            .await;
        let off = EngineSettings { enabled: false, ..EngineSettings::default() };

        let ids = harness
            .matcher_with(off)
            .get_recommendations(ProductId(100), &RecommendationArgs::default())
            .await
            .expect("recommendations");
        assert!(ids.is_empty());
        assert!(harness.recommend(0).await.is_empty(), "{backend:?}");
        assert!(harness.recommend(999).await.is_empty(), "{backend:?}");
    }
}

#[tokio::test]
async fn deleting_a_rule_drops_it_and_its_index_rows() {
    for backend in BACKENDS {
        let harness = Harness::new(backend, &store_catalog()).await;
        let rule = harness
            .rule(
                RuleDraft::new("pistols"),
                vec![group(0, vec![Condition::equals("product_cat", "pistols")])],
                vec![holsters_bestselling()],
            )
            .await;

        harness.store.delete(rule.id).await.expect("delete");

        assert!(harness.store.index_entries(rule.id).await.expect("entries").is_empty());
        assert!(harness.recommend(100).await.is_empty(), "{backend:?}");
        let missing = harness.store.delete(rule.id).await.expect_err("second delete");
        assert!(missing.is_not_found());
        assert!(harness.store.get(RuleId(rule.id.0 + 100)).await.is_err());
    }
}

#[tokio::test]
async fn full_rebuild_reindexes_only_enabled_rules() {
    for backend in BACKENDS {
        let harness = Harness::new(backend, &store_catalog()).await;
        harness
            .rule(
                RuleDraft::new("pistols"),
                vec![group(0, vec![Condition::equals("product_cat", "pistols")])],
                vec![holsters_bestselling()],
            )
            .await;
        let disabled = harness
            .rule(
                RuleDraft::new("rifles"),
                vec![
                    group(0, vec![Condition::equals("product_cat", "rifles")]),
                    group(1, vec![Condition::equals("product_tag", "sale")]),
                ],
                vec![optics_by_price()],
            )
            .await;
        harness.store.toggle_status(disabled.id).await.expect("disable");

        let report = harness.store.rebuild_full_index().await.expect("rebuild");

        assert_eq!(report.cleared, 1, "{backend:?}");
        assert_eq!(report.rules, 1, "{backend:?}");
        assert_eq!(report.entries, 1, "{backend:?}");
    }
}

#[tokio::test]
async fn diagnostics_trace_the_winning_rule() {
    for backend in BACKENDS {
        let harness = Harness::new(backend, &store_catalog()).await;
        let rule = harness
            .rule(
                RuleDraft::new("holsters then optics").with_priority(3),
                vec![group(0, vec![Condition::equals("product_cat", "pistols")])],
                vec![holsters_bestselling(), Action::new(ActionSource::category("missing"))],
            )
            .await;

        let report = harness.matcher().diagnose(ProductId(100)).await.expect("diagnose");

        let matched = report.matched_rule.expect("matched rule");
        assert_eq!(matched.id, rule.id);
        assert_eq!(matched.priority, 3);
        assert_eq!(report.actions.len(), 2);
        assert!(report.actions[1].resolved_query.is_none());
        assert_eq!(report.product_ids, [200, 201, 301].map(ProductId));
        assert_eq!(report.products.len(), 3);
        assert!(report.keys.iter().any(|key| key.as_str() == "product_cat:pistols"), "{backend:?}");

        let missing = harness.matcher().diagnose(ProductId(999)).await.expect_err("unknown product");
        assert!(missing.is_not_found(), "{backend:?}");
    }
}

#[tokio::test]
async fn updating_priority_reindexes_and_changes_the_winner() {
    for backend in BACKENDS {
        let harness = Harness::new(backend, &store_catalog()).await;
        harness
            .rule(
                RuleDraft::new("brand").with_priority(10),
                vec![group(0, vec![Condition::equals("pa_brand", "glock")])],
                vec![optics_by_price()],
            )
            .await;
        let pistols = harness
            .rule(
                RuleDraft::new("pistols").with_priority(20),
                vec![group(0, vec![Condition::equals("product_cat", "pistols")])],
                vec![holsters_bestselling()],
            )
            .await;
        assert_eq!(harness.recommend(100).await, vec![301, 300], "{backend:?}");

        let patch = RulePatch { priority: Some(1), ..RulePatch::default() };
        let updated = harness.store.update(pistols.id, patch).await.expect("update");

        assert_eq!(updated.priority, 1);
        let entries = harness.store.index_entries(pistols.id).await.expect("entries");
        assert_eq!(entries.len(), 1, "{backend:?}");
        assert!(entries.iter().all(|entry| entry.priority == 1), "{backend:?}");
        let fresh = RecommendationArgs { limit: Some(3), ..RecommendationArgs::default() };
        assert_eq!(harness.recommend_with(100, &fresh).await, vec![200, 201, 301], "{backend:?}");

        let missing = harness
            .store
            .update(RuleId(404), RulePatch { priority: Some(2), ..RulePatch::default() })
            .await
            .expect_err("unknown rule");
        assert!(missing.is_not_found(), "{backend:?}");
    }
}

#[tokio::test]
async fn same_attribute_action_uses_the_products_own_terms() {
    let brand_mate = |id: u64, sales: u64| {
        ProductRecord::new(id, &format!("product {id}"))
            .priced(Decimal::new(30, 0))
            .with_sales(sales)
            .with_terms(&[6, 20])
    };
    let fixture = store_catalog().with_product(brand_mate(500, 7)).with_product(brand_mate(501, 15));

    for backend in BACKENDS {
        let harness = Harness::new(backend, &fixture).await;
        harness
            .rule(
                RuleDraft::new("same brand"),
                vec![group(0, vec![Condition::equals("product_cat", "pistols")])],
                vec![Action::new(ActionSource::Attribute { taxonomy: "pa_brand".to_owned() })
                    .with_orderby(OrderBy::Bestselling)],
            )
            .await;

        assert_eq!(harness.recommend(100).await, vec![501, 500], "{backend:?}");
        assert!(harness.recommend(102).await.is_empty(), "{backend:?}: product has no brand");
    }
}

#[tokio::test]
async fn category_action_can_include_child_categories() {
    for backend in BACKENDS {
        let harness = Harness::new(backend, &store_catalog()).await;
        let rule = harness
            .rule(
                RuleDraft::new("ammo buyers see firearms"),
                vec![group(0, vec![Condition::equals("product_cat", "ammunition")])],
                vec![Action::new(ActionSource::from_parts("category", "firearms", true))
                    .with_orderby(OrderBy::Bestselling)],
            )
            .await;

        assert_eq!(harness.recommend(400).await, vec![100, 101, 102, 103], "{backend:?}");

        harness
            .store
            .save_actions(
                rule.id,
                vec![Action::new(ActionSource::category("firearms")).with_orderby(OrderBy::Bestselling)],
            )
            .await
            .expect("save actions");
        let fresh = RecommendationArgs { limit: Some(5), ..RecommendationArgs::default() };
        assert_eq!(harness.recommend_with(400, &fresh).await, vec![103], "{backend:?}");
    }
}
