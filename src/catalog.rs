use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub campus_id: Option<String>,
    pub name: String,
    pub category: String,
    pub tags: Vec<String>,
    pub price: f64,
    pub original_price: Option<f64>,
    pub rating: f64,
    pub stock: i64,
    pub image_url: Option<String>,
    pub description: Option<String>,
    pub created_at: String,
    pub active: bool,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    Featured,
    PriceLow,
    PriceHigh,
    Rating,
    Newest,
}

impl SortKey {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "featured" => Some(Self::Featured),
            "price-low" => Some(Self::PriceLow),
            "price-high" => Some(Self::PriceHigh),
            "rating" => Some(Self::Rating),
            "newest" => Some(Self::Newest),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Featured => "featured",
            Self::PriceLow => "price-low",
            Self::PriceHigh => "price-high",
            Self::Rating => "rating",
            Self::Newest => "newest",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProductQuery {
    pub category: Option<String>,
    pub tag: Option<String>,
    pub keyword: Option<String>,
    pub sort: SortKey,
    pub include_inactive: bool,
}

/// `None`, empty and "all" all mean no filter.
fn filter_value(v: &Option<String>) -> Option<String> {
    v.as_deref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty() && s != "all")
}

impl ProductQuery {
    pub fn matches(&self, p: &Product) -> bool {
        if !self.include_inactive && !p.active {
            return false;
        }
        if let Some(cat) = filter_value(&self.category) {
            if p.category.to_lowercase() != cat {
                return false;
            }
        }
        if let Some(tag) = filter_value(&self.tag) {
            if !p.tags.iter().any(|t| t.to_lowercase() == tag) {
                return false;
            }
        }
        if let Some(kw) = filter_value(&self.keyword) {
            let in_name = p.name.to_lowercase().contains(&kw);
            let in_desc = p
                .description
                .as_deref()
                .map(|d| d.to_lowercase().contains(&kw))
                .unwrap_or(false);
            if !in_name && !in_desc {
                return false;
            }
        }
        true
    }
}

fn tie_break(a: &Product, b: &Product) -> Ordering {
    a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id))
}

pub fn compare(sort: SortKey, a: &Product, b: &Product) -> Ordering {
    let primary = match sort {
        SortKey::Featured => a.sort_order.cmp(&b.sort_order),
        SortKey::PriceLow => a.price.total_cmp(&b.price),
        SortKey::PriceHigh => b.price.total_cmp(&a.price),
        SortKey::Rating => b.rating.total_cmp(&a.rating),
        SortKey::Newest => b.created_at.cmp(&a.created_at),
    };
    primary.then_with(|| tie_break(a, b))
}

pub fn filter_and_sort(products: Vec<Product>, query: &ProductQuery) -> Vec<Product> {
    let mut out: Vec<Product> = products.into_iter().filter(|p| query.matches(p)).collect();
    out.sort_by(|a, b| compare(query.sort, a, b));
    out
}

/// 1-based page. Returns the pre-paging total alongside the page.
pub fn paginate<T>(items: Vec<T>, page: usize, page_size: usize) -> (usize, Vec<T>) {
    let total = items.len();
    let page = page.max(1);
    let page_size = page_size.max(1);
    let start = (page - 1).saturating_mul(page_size);
    let slice = items.into_iter().skip(start).take(page_size).collect();
    (total, slice)
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FacetCounts {
    pub categories: BTreeMap<String, usize>,
    pub tags: BTreeMap<String, usize>,
}

pub fn facets<'a, I>(products: I) -> FacetCounts
where
    I: IntoIterator<Item = &'a Product>,
{
    let mut out = FacetCounts::default();
    for p in products {
        *out.categories.entry(p.category.clone()).or_insert(0) += 1;
        for t in &p.tags {
            *out.tags.entry(t.clone()).or_insert(0) += 1;
        }
    }
    out
}
