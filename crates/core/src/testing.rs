//! Small port doubles for unit tests inside this crate. Full in-memory adapters
//! live in `shelfmatch-db`.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use crate::domain::product::{TermId, CATEGORY_TAXONOMY};
use crate::ports::{PortResult, TaxonomyHierarchy};

#[derive(Clone, Debug)]
pub struct FakeTaxonomy {
    terms: BTreeMap<(String, String), u64>,
    parents: BTreeMap<u64, u64>,
    hierarchical: BTreeSet<String>,
}

impl Default for FakeTaxonomy {
    fn default() -> Self {
        Self {
            terms: BTreeMap::new(),
            parents: BTreeMap::new(),
            hierarchical: BTreeSet::from([CATEGORY_TAXONOMY.to_owned()]),
        }
    }
}

impl FakeTaxonomy {
    pub fn with_term(mut self, taxonomy: &str, slug: &str, id: u64, parent: Option<u64>) -> Self {
        self.terms.insert((taxonomy.to_owned(), slug.to_owned()), id);
        if let Some(parent) = parent {
            self.parents.insert(id, parent);
        }
        self
    }

    fn slug_of(&self, taxonomy: &str, id: u64) -> Option<String> {
        self.terms
            .iter()
            .find(|((tax, _), term)| tax == taxonomy && **term == id)
            .map(|((_, slug), _)| slug.clone())
    }
}

#[async_trait]
impl TaxonomyHierarchy for FakeTaxonomy {
    async fn resolve_term(&self, taxonomy: &str, slug: &str) -> PortResult<Option<TermId>> {
        Ok(self.terms.get(&(taxonomy.to_owned(), slug.to_owned())).copied().map(TermId))
    }

    async fn descendant_term_ids(&self, term_id: TermId, taxonomy: &str) -> PortResult<Vec<TermId>> {
        let mut found = Vec::new();
        let mut frontier = vec![term_id.0];
        while let Some(parent) = frontier.pop() {
            for (child, _) in self.parents.iter().filter(|(_, p)| **p == parent) {
                if self.slug_of(taxonomy, *child).is_some() && !found.contains(&TermId(*child)) {
                    found.push(TermId(*child));
                    frontier.push(*child);
                }
            }
        }
        Ok(found)
    }

    async fn term_slug(&self, term_id: TermId, taxonomy: &str) -> PortResult<Option<String>> {
        Ok(self.slug_of(taxonomy, term_id.0))
    }

    async fn is_hierarchical(&self, taxonomy: &str) -> PortResult<bool> {
        Ok(self.hierarchical.contains(taxonomy))
    }
}
