use crate::domain::product::ProductId;

pub const RECENTLY_VIEWED_CAP: usize = 20;

/// Visitor-side rolling list of viewed products, most recent first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecentlyViewed {
    ids: Vec<ProductId>,
}

impl RecentlyViewed {
    /// Parses a comma-separated cookie value. Zero, negative and non-numeric
    /// entries are ignored, repeats keep their first position.
    pub fn parse(raw: &str) -> Self {
        let mut ids: Vec<ProductId> = Vec::new();
        for id in raw.split(',').filter_map(|part| part.trim().parse::<u64>().ok()) {
            let id = ProductId(id);
            if id.0 != 0 && !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids.truncate(RECENTLY_VIEWED_CAP);
        Self { ids }
    }

    /// Moves `product_id` to the front and drops the oldest beyond the cap.
    pub fn record(&mut self, product_id: ProductId) {
        if product_id.0 == 0 {
            return;
        }
        self.ids.retain(|id| *id != product_id);
        self.ids.insert(0, product_id);
        self.ids.truncate(RECENTLY_VIEWED_CAP);
    }

    pub fn ids(&self) -> &[ProductId] {
        &self.ids
    }

    pub fn to_cookie_value(&self) -> String {
        self.ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
    }
}
