mod common;

use shelfmatch_core::domain::rule::{
    Action, ActionSource, Condition, ConditionGroup, OrderBy, RuleDraft, RuleQuery, RuleStatus,
};
use shelfmatch_core::errors::{ApplicationError, DomainError};
use shelfmatch_core::transfer::{export_rules, import_rules};

use common::{store_catalog, Backend, Harness, BACKENDS};

async fn seeded(backend: Backend) -> Harness {
    let harness = Harness::new(backend, &store_catalog()).await;
    harness
        .rule(
            RuleDraft::new("Pistol holsters").with_priority(5).with_exclude_outofstock(false),
            vec![
                ConditionGroup::new(0, vec![Condition::equals("product_cat", "pistols")]),
                ConditionGroup::new(
                    3,
                    vec![
                        Condition::equals("product_cat", "firearms").including_children(),
                        Condition::equals("pa_brand", "glock"),
                    ],
                ),
            ],
            vec![
                Action::new(ActionSource::category("holsters"))
                    .with_orderby(OrderBy::Bestselling)
                    .with_limit(3),
                Action::new(ActionSource::Copurchase),
            ],
        )
        .await;
    let parked = harness
        .rule(
            RuleDraft::new("Parked"),
            vec![ConditionGroup::new(0, vec![Condition::equals("product_tag", "sale")])],
            vec![Action::new(ActionSource::attribute_value("pa_brand", "glock"))],
        )
        .await;
    harness.store.toggle_status(parked.id).await.expect("disable");
    harness
}

#[tokio::test]
async fn export_then_import_reproduces_rules_across_backends() {
    for (from, into) in [(Backend::Memory, Backend::Sqlite), (Backend::Sqlite, Backend::Memory)] {
        let source = seeded(from).await;
        let document = export_rules(&source.store).await.expect("export");
        assert_eq!(document.rules.len(), 2);
        let json = serde_json::to_string_pretty(&document).expect("serialize");

        let target = Harness::new(into, &store_catalog()).await;
        let imported = import_rules(&target.store, &json).await.expect("import");
        assert_eq!(imported, 2, "{from:?} -> {into:?}");

        let rules = target.store.list(&RuleQuery::default()).await.expect("list");
        let holsters = rules.iter().find(|rule| rule.name == "Pistol holsters").expect("holsters rule");
        assert_eq!(holsters.priority, 5);
        assert_eq!(holsters.exclude_outofstock, Some(false));

        let source_rule = source
            .store
            .list(&RuleQuery::default())
            .await
            .expect("source list")
            .into_iter()
            .find(|rule| rule.name == "Pistol holsters")
            .expect("source rule");
        let groups = target.store.get_conditions(holsters.id).await.expect("conditions");
        assert_eq!(groups, source.store.get_conditions(source_rule.id).await.expect("source conditions"));
        assert_eq!(groups.len(), 2);
        let actions = target.store.get_actions(holsters.id).await.expect("actions");
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].limit, 3);
        assert_eq!(actions[1].source, ActionSource::Copurchase);

        let parked = rules.iter().find(|rule| rule.name == "Parked").expect("parked rule");
        assert_eq!(parked.status, RuleStatus::Disabled);
        assert!(target.store.index_entries(parked.id).await.expect("entries").is_empty());

        assert_eq!(target.recommend(100).await, vec![202, 200, 201], "{from:?} -> {into:?}");
    }
}

#[tokio::test]
async fn import_indexes_rules_as_it_creates_them() {
    let json = r#"{
        "version": "0.1.0",
        "date": "2026-01-01 00:00:00",
        "rules": [
            {
                "name": "Optics for rifles",
                "priority": 7,
                "conditions": {"1": [{"attribute": "product_cat", "operator": "equals", "value": "rifles"}]},
                "actions": [{"source": "category", "value": "optics", "limit": "2", "orderby": "price"}]
            },
            {"name": "", "priority": 1},
            {"name": "No conditions", "actions": [{"source": "trending"}]}
        ]
    }"#;

    for backend in BACKENDS {
        let harness = Harness::new(backend, &store_catalog()).await;

        let imported = import_rules(&harness.store, json).await.expect("import");

        assert_eq!(imported, 2, "{backend:?}: nameless entries are skipped");
        assert_eq!(harness.recommend(101).await, vec![301, 300], "{backend:?}");
        let report = harness.store.rebuild_full_index().await.expect("rebuild");
        assert_eq!(report.entries, 1, "{backend:?}");
        assert_eq!(report.rules, 2, "{backend:?}");
    }
}

#[tokio::test]
async fn string_encoded_fields_and_stored_operators_still_match() {
    let json = r#"{
        "rules": [{
            "name": "Pistol holsters",
            "priority": "5",
            "status": "1",
            "conditions": {"0": [{"attribute": "product_cat", "operator": "not_equals", "value": "pistols"}]},
            "actions": [{"source": "category", "value": "holsters", "limit": "4", "orderby": "bestselling"}]
        }]
    }"#;

    for backend in BACKENDS {
        let harness = Harness::new(backend, &store_catalog()).await;

        let imported = import_rules(&harness.store, json).await.expect("import");

        assert_eq!(imported, 1, "{backend:?}");
        let rules = harness.store.list(&RuleQuery::default()).await.expect("list");
        assert_eq!(rules[0].priority, 5, "{backend:?}");
        assert_eq!(rules[0].status, RuleStatus::Enabled, "{backend:?}");
        let entries = harness.store.index_entries(rules[0].id).await.expect("entries");
        assert_eq!(entries.len(), 1, "{backend:?}");
        assert_eq!(harness.recommend(100).await, vec![200, 201, 301], "{backend:?}");
    }
}

#[tokio::test]
async fn documents_without_a_rules_array_are_rejected() {
    let harness = Harness::new(Backend::Memory, &store_catalog()).await;

    for json in ["not json", r#"{"version":"1"}"#, r#"{"rules":{"name":"x"}}"#] {
        let error = import_rules(&harness.store, json).await.expect_err("invalid document");
        assert!(
            matches!(error, ApplicationError::Domain(DomainError::InvalidImport(_))),
            "{json}: {error:?}"
        );
        assert_eq!(error.class(), "invalid_input");
    }
    assert_eq!(harness.store.count(None).await.expect("count"), 0);
}
