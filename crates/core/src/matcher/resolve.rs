//! Exact AND/OR verification of a candidate rule against one product.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::domain::product::{ProductId, ProductTerm};
use crate::domain::rule::{Condition, ConditionGroup, ConditionKey};
use crate::ports::{PortResult, TaxonomyHierarchy};

/// A product's terms and the condition keys derived from them. Computed per
/// request and never stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProductProfile {
    pub product_id: ProductId,
    pub terms: Vec<ProductTerm>,
    pub keys: BTreeSet<ConditionKey>,
}

impl ProductProfile {
    pub fn new(product_id: ProductId, terms: Vec<ProductTerm>) -> Self {
        let keys = terms.iter().map(ProductTerm::condition_key).collect();
        Self { product_id, terms, keys }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn slugs_in(&self, taxonomy: &str) -> Vec<String> {
        self.terms.iter().filter(|term| term.taxonomy == taxonomy).map(|term| term.slug.clone()).collect()
    }
}

/// True when any group has every one of its conditions satisfied.
/// A rule without groups, or a group without conditions, never matches.
pub async fn rule_matches(
    groups: &[ConditionGroup],
    profile: &ProductProfile,
    taxonomy: &dyn TaxonomyHierarchy,
) -> PortResult<bool> {
    for group in groups {
        if group_satisfied(group, profile, taxonomy).await? {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn group_satisfied(
    group: &ConditionGroup,
    profile: &ProductProfile,
    taxonomy: &dyn TaxonomyHierarchy,
) -> PortResult<bool> {
    if group.conditions.is_empty() {
        return Ok(false);
    }
    for condition in &group.conditions {
        if !condition_satisfied(condition, profile, taxonomy).await? {
            return Ok(false);
        }
    }
    Ok(true)
}

async fn condition_satisfied(
    condition: &Condition,
    profile: &ProductProfile,
    taxonomy: &dyn TaxonomyHierarchy,
) -> PortResult<bool> {
    if profile.keys.contains(&condition.key()) {
        return Ok(true);
    }
    if !condition.include_children || !taxonomy.is_hierarchical(&condition.attribute).await? {
        return Ok(false);
    }

    let Some(ancestor) = taxonomy.resolve_term(&condition.attribute, &condition.value).await? else {
        return Ok(false);
    };
    let descendants = taxonomy.descendant_term_ids(ancestor, &condition.attribute).await?;

    Ok(profile
        .terms
        .iter()
        .any(|term| term.taxonomy == condition.attribute && descendants.contains(&term.term_id)))
}

#[cfg(test)]
mod tests {
    use crate::domain::product::{ProductId, ProductTerm};
    use crate::domain::rule::{Condition, ConditionGroup, ConditionOperator};
    use crate::matcher::resolve::{rule_matches, ProductProfile};
    use crate::testing::FakeTaxonomy;

    fn taxonomy() -> FakeTaxonomy {
        FakeTaxonomy::default()
            .with_term("product_cat", "firearms", 1, None)
            .with_term("product_cat", "pistols", 2, Some(1))
            .with_term("product_cat", "optics", 3, None)
            .with_term("product_tag", "sale", 10, None)
    }

    fn profile(terms: Vec<ProductTerm>) -> ProductProfile {
        ProductProfile::new(ProductId(100), terms)
    }

    fn two_group_rule() -> Vec<ConditionGroup> {
        vec![
            ConditionGroup::new(
                0,
                vec![
                    Condition::equals("product_cat", "firearms"),
                    Condition::equals("product_tag", "sale"),
                ],
            ),
            ConditionGroup::new(1, vec![Condition::equals("product_cat", "optics")]),
        ]
    }

    #[tokio::test]
    async fn groups_combine_with_and_inside_and_or_across() {
        let taxonomy = taxonomy();
        let groups = two_group_rule();

        let only_optics = profile(vec![ProductTerm::new("product_cat", "optics", 3)]);
        let both_terms = profile(vec![
            ProductTerm::new("product_cat", "firearms", 1),
            ProductTerm::new("product_tag", "sale", 10),
        ]);
        let only_firearms = profile(vec![ProductTerm::new("product_cat", "firearms", 1)]);

        assert!(rule_matches(&groups, &only_optics, &taxonomy).await.expect("match"));
        assert!(rule_matches(&groups, &both_terms, &taxonomy).await.expect("match"));
        assert!(!rule_matches(&groups, &only_firearms, &taxonomy).await.expect("match"));
    }

    #[tokio::test]
    async fn include_children_matches_descendant_terms() {
        let taxonomy = taxonomy();
        let child_only = profile(vec![ProductTerm::new("product_cat", "pistols", 2)]);
        let with_children = vec![ConditionGroup::new(
            0,
            vec![Condition::equals("product_cat", "firearms").including_children()],
        )];
        let without_children =
            vec![ConditionGroup::new(0, vec![Condition::equals("product_cat", "firearms")])];

        assert!(rule_matches(&with_children, &child_only, &taxonomy).await.expect("match"));
        assert!(!rule_matches(&without_children, &child_only, &taxonomy).await.expect("match"));
    }

    #[tokio::test]
    async fn empty_rules_and_groups_never_match() {
        let taxonomy = taxonomy();
        let product = profile(vec![ProductTerm::new("product_cat", "optics", 3)]);

        assert!(!rule_matches(&[], &product, &taxonomy).await.expect("match"));
        assert!(!rule_matches(&[ConditionGroup::new(0, Vec::new())], &product, &taxonomy)
            .await
            .expect("match"));
    }

    #[tokio::test]
    async fn every_operator_is_compared_as_equality() {
        let taxonomy = taxonomy();
        let product = profile(vec![ProductTerm::new("product_cat", "optics", 3)]);
        let mut condition = Condition::equals("product_cat", "optics");
        condition.operator = ConditionOperator::Contains;

        let matched = rule_matches(&[ConditionGroup::new(0, vec![condition])], &product, &taxonomy)
            .await
            .expect("match");

        assert!(matched);
    }

    #[test]
    fn profile_keys_cover_every_taxonomy() {
        let product = profile(vec![
            ProductTerm::new("product_cat", "pistols", 2),
            ProductTerm::new("pa_brand", "glock", 40),
            ProductTerm::new("pa_brand", "sig", 41),
        ]);

        assert_eq!(product.keys.len(), 3);
        assert_eq!(product.slugs_in("pa_brand"), ["glock", "sig"]);
        assert!(product.slugs_in("pa_color").is_empty());
    }
}
