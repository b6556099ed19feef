//! Product service: listing, lookups and normalized writes
//!
//! Handlers never touch the catalog repository directly. This layer turns
//! raw query strings into a [`ProductQuery`], normalizes write payloads (slug
//! generation, category resolution, stock flags) and maps repository outcomes
//! onto the [`AppError`] taxonomy.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::catalog::{ProductQuery, ProductRepository, ProductWrite, SortField};
use crate::error::{AppError, AppResult, FieldError};
use crate::model::{
    Category, NewCategory, Pagination, Product, ProductFilters, ProductId, ProductPage,
    ProductPayload, ProductView, SearchResult, StockUpdate,
};

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 100;
const SLUG_TAKEN: &str = "Product with this slug already exists";

/// Turns a display name into a URL-safe slug
///
/// "Oak  Dining Table!" becomes "oak-dining-table".
pub fn slugify(name: &str) -> String {
    let kept: String = name
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace() || *c == '-')
        .collect();

    let mut slug = String::with_capacity(kept.len());
    for c in kept.chars() {
        let c = if c.is_whitespace() { '-' } else { c };
        if c == '-' && slug.ends_with('-') {
            continue;
        }
        slug.push(c);
    }
    slug
}

/// A write payload after normalization
#[derive(Debug, Default, Clone, PartialEq)]
pub struct NormalizedWrite {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub stock: Option<u32>,
    pub category_id: Option<u64>,
    pub images: Option<Vec<String>>,
    pub featured: Option<bool>,
    pub tags: Option<Vec<String>>,
}

#[derive(Clone)]
pub struct ProductService {
    repo: Arc<dyn ProductRepository>,
}

impl ProductService {
    pub fn new(repo: Arc<dyn ProductRepository>) -> Self {
        Self { repo }
    }

    // ========== Reads ==========

    /// Lists products matching `filters`
    pub fn list(&self, filters: &ProductFilters) -> AppResult<ProductPage> {
        let limit = match parse_number::<usize>("limit", filters.limit.as_deref())? {
            Some(limit) => limit.clamp(1, MAX_LIMIT),
            None => DEFAULT_LIMIT,
        };
        let offset = parse_number::<usize>("offset", filters.offset.as_deref())?.unwrap_or(0);

        let sort = match filters.sort.as_deref().filter(|s| !s.is_empty()) {
            Some(field) => SortField::parse(field)
                .ok_or_else(|| AppError::Validation(format!("Invalid sort field: {field}")))?,
            None => SortField::Name,
        };
        let ascending = match filters.order.as_deref().filter(|s| !s.is_empty()) {
            None | Some("asc") => true,
            Some("desc") => false,
            Some(other) => {
                return Err(AppError::Validation(format!(
                    "Invalid order: {other} (expected asc or desc)"
                )))
            }
        };

        let categories = self.repo.categories()?;
        let category_id = match filters.category.as_deref().filter(|c| !c.is_empty()) {
            Some(slug) => match categories.iter().find(|c| c.slug == slug) {
                Some(category) => Some(category.id),
                None => {
                    return Ok(ProductPage {
                        products: Vec::new(),
                        pagination: pagination(0, limit, offset),
                    })
                }
            },
            None => None,
        };

        let query = ProductQuery {
            category_id,
            search: filters
                .search
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_lowercase),
            min_price: parse_number("minPrice", filters.min_price.as_deref())?,
            max_price: parse_number("maxPrice", filters.max_price.as_deref())?,
            featured_only: filters.featured.as_deref() == Some("true"),
            in_stock_only: filters.in_stock.as_deref() == Some("true"),
            sort,
            ascending,
            limit,
            offset,
        };

        let (products, total) = self.repo.query(&query)?;
        Ok(ProductPage {
            products: products.into_iter().map(|p| project(p, &categories)).collect(),
            pagination: pagination(total, limit, offset),
        })
    }

    /// Raw stored product
    pub fn product(&self, id: ProductId) -> AppResult<Product> {
        self.repo
            .get(id)?
            .ok_or_else(|| AppError::NotFound("Product not found".to_string()))
    }

    pub fn get(&self, id: ProductId) -> AppResult<ProductView> {
        let product = self.product(id)?;
        Ok(project(product, &self.repo.categories()?))
    }

    pub fn categories(&self) -> AppResult<Vec<Category>> {
        Ok(self.repo.categories()?)
    }

    /// Newest featured products
    pub fn featured(&self, limit: usize) -> AppResult<Vec<ProductView>> {
        let query = ProductQuery {
            featured_only: true,
            sort: SortField::CreatedAt,
            ascending: false,
            limit: limit.clamp(1, MAX_LIMIT),
            ..ProductQuery::default()
        };
        let (products, _) = self.repo.query(&query)?;
        let categories = self.repo.categories()?;
        Ok(products.into_iter().map(|p| project(p, &categories)).collect())
    }

    /// Matches `q` against name, description and tags
    pub fn search(&self, q: &str, limit: usize, offset: usize) -> AppResult<SearchResult> {
        let needle = q.trim().to_lowercase();
        if needle.is_empty() {
            return Err(AppError::Validation("Search query is required".to_string()));
        }

        let mut matched: Vec<Product> = self
            .repo
            .all()?
            .into_iter()
            .filter(|p| {
                p.name.to_lowercase().contains(&needle)
                    || p.description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
                    || p.tags.iter().any(|t| t.to_lowercase() == needle)
            })
            .collect();
        matched.sort_by(|a, b| a.name.cmp(&b.name));

        let total = matched.len();
        let categories = self.repo.categories()?;
        let products = matched
            .into_iter()
            .skip(offset)
            .take(limit.clamp(1, MAX_LIMIT))
            .map(|p| project(p, &categories))
            .collect();

        Ok(SearchResult {
            products,
            total,
            query: q.to_string(),
        })
    }

    // ========== Writes ==========

    /// Validates and normalizes a create/update payload
    ///
    /// With `generate_slug`, a missing slug is derived from the name. A
    /// category name or slug is resolved to an id when no id is supplied.
    /// A bare `inStock` flag collapses to a stock of 0 or 1; sending it
    /// together with `stock` is rejected instead of discarding the count.
    pub fn normalize_write_payload(
        &self,
        payload: ProductPayload,
        generate_slug: bool,
    ) -> AppResult<NormalizedWrite> {
        let mut errors = Vec::new();

        if let Some(name) = &payload.name {
            if name.trim().is_empty() {
                errors.push(FieldError::new("name", "Name must not be empty"));
            }
        }
        if let Some(price) = payload.price {
            if !price.is_finite() || price < 0.0 {
                errors.push(FieldError::new("price", "Price must be a non-negative number"));
            }
        }

        let stock = match (payload.stock, payload.in_stock) {
            (Some(_), Some(_)) => {
                errors.push(FieldError::new(
                    "inStock",
                    "inStock cannot be combined with a stock count",
                ));
                None
            }
            (Some(stock), None) => match u32::try_from(stock) {
                Ok(stock) => Some(stock),
                Err(_) => {
                    errors.push(FieldError::new("stock", "Stock must be a non-negative integer"));
                    None
                }
            },
            (None, Some(in_stock)) => Some(u32::from(in_stock)),
            (None, None) => None,
        };

        let mut slug = payload.slug.map(|s| slugify(&s));
        if slug.is_none() && generate_slug {
            slug = payload.name.as_deref().map(slugify);
        }
        if slug.as_deref().is_some_and(str::is_empty) {
            errors.push(FieldError::new("slug", "Slug must contain letters or digits"));
        }

        if !errors.is_empty() {
            return Err(AppError::InvalidFields(errors));
        }

        let mut category_id = payload.category_id;
        if category_id.is_none() {
            if let Some(reference) = payload.category.or(payload.category_slug) {
                category_id = self.resolve_category_id(&reference)?;
            }
        }

        Ok(NormalizedWrite {
            name: payload.name.map(|n| n.trim().to_string()),
            slug,
            description: payload.description,
            price: payload.price,
            stock,
            category_id,
            images: payload.images,
            featured: payload.featured,
            tags: payload.tags,
        })
    }

    /// Finds a category whose slug equals, or whose name case-insensitively
    /// equals, `reference`
    pub fn resolve_category_id(&self, reference: &str) -> AppResult<Option<u64>> {
        let needle = reference.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(None);
        }
        Ok(self
            .repo
            .categories()?
            .into_iter()
            .find(|c| c.slug == needle || c.name.to_lowercase() == needle)
            .map(|c| c.id))
    }

    pub fn create(&self, payload: ProductPayload) -> AppResult<ProductView> {
        let mut missing = Vec::new();
        if payload.name.is_none() {
            missing.push(FieldError::new("name", "Name is required"));
        }
        if payload.price.is_none() {
            missing.push(FieldError::new("price", "Price is required"));
        }
        if !missing.is_empty() {
            return Err(AppError::InvalidFields(missing));
        }

        let write = self.normalize_write_payload(payload, true)?;
        let slug = write.slug.unwrap_or_default();

        if self.repo.find_by_slug(&slug)?.is_some() {
            return Err(AppError::Conflict(SLUG_TAKEN.to_string()));
        }

        let now = Utc::now();
        let product = Product {
            id: 0,
            slug,
            name: write.name.unwrap_or_default(),
            description: write.description,
            price: write.price.unwrap_or_default(),
            stock: write.stock.unwrap_or(0),
            category_id: write.category_id,
            images: write.images.unwrap_or_default(),
            featured: write.featured.unwrap_or(false),
            tags: write.tags.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };

        let id = match self.repo.insert(product)? {
            ProductWrite::Written(id) => id,
            ProductWrite::SlugTaken => return Err(AppError::Conflict(SLUG_TAKEN.to_string())),
            ProductWrite::Rejected => {
                warn!("product insert affected no rows");
                return Err(AppError::WriteRejected(
                    "Insert was blocked by the catalog access policy".to_string(),
                ));
            }
        };

        info!(product_id = id, "product created");
        self.get(id)
    }

    pub fn update(&self, id: ProductId, payload: ProductPayload) -> AppResult<ProductView> {
        let mut product = self.product(id)?;
        let write = self.normalize_write_payload(payload, false)?;

        if let Some(slug) = &write.slug {
            if *slug != product.slug && self.repo.find_by_slug(slug)?.is_some() {
                return Err(AppError::Conflict(SLUG_TAKEN.to_string()));
            }
        }

        if let Some(name) = write.name {
            product.name = name;
        }
        if let Some(slug) = write.slug {
            product.slug = slug;
        }
        if write.description.is_some() {
            product.description = write.description;
        }
        if let Some(price) = write.price {
            product.price = price;
        }
        if let Some(stock) = write.stock {
            product.stock = stock;
        }
        if write.category_id.is_some() {
            product.category_id = write.category_id;
        }
        if let Some(images) = write.images {
            product.images = images;
        }
        if let Some(featured) = write.featured {
            product.featured = featured;
        }
        if let Some(tags) = write.tags {
            product.tags = tags;
        }
        product.updated_at = Utc::now();

        let updated = match self.repo.update(&product)? {
            ProductWrite::Written(id) => id,
            ProductWrite::SlugTaken => return Err(AppError::Conflict(SLUG_TAKEN.to_string())),
            ProductWrite::Rejected => {
                warn!(product_id = id, "product update affected no rows");
                return Err(AppError::WriteRejected(
                    "Update was blocked by the catalog access policy".to_string(),
                ));
            }
        };

        self.get(updated)
    }

    /// Deletes a product, returning it as it was before deletion
    pub fn delete(&self, id: ProductId) -> AppResult<ProductView> {
        let existing = self.get(id)?;
        self.repo.delete(id)?.ok_or_else(|| {
            warn!(product_id = id, "product delete affected no rows");
            AppError::WriteRejected("Delete was blocked by the catalog access policy".to_string())
        })?;
        info!(product_id = id, "product deleted");
        Ok(existing)
    }

    /// Sets, adds to or subtracts from a product's stock. Subtraction floors at zero.
    pub fn update_stock(&self, id: ProductId, update: StockUpdate) -> AppResult<ProductView> {
        let quantity = u32::try_from(update.quantity).map_err(|_| {
            AppError::Validation("Quantity must be a non-negative number".to_string())
        })?;
        let product = self.product(id)?;

        let stock = match update.operation.as_deref().unwrap_or("set") {
            "set" => quantity,
            "add" => product.stock.saturating_add(quantity),
            "subtract" => product.stock.saturating_sub(quantity),
            other => {
                return Err(AppError::Validation(format!(
                    "Invalid stock operation: {other} (expected set, add or subtract)"
                )))
            }
        };

        self.update(
            id,
            ProductPayload {
                stock: Some(i64::from(stock)),
                ..ProductPayload::default()
            },
        )
    }

    pub fn create_category(&self, new: NewCategory) -> AppResult<Category> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidFields(vec![FieldError::new(
                "name",
                "Name is required",
            )]));
        }
        let slug = slugify(new.slug.as_deref().unwrap_or(name));
        if slug.is_empty() {
            return Err(AppError::InvalidFields(vec![FieldError::new(
                "slug",
                "Slug must contain letters or digits",
            )]));
        }
        if self.repo.categories()?.iter().any(|c| c.slug == slug) {
            return Err(AppError::Conflict("Category with this slug already exists".to_string()));
        }

        self.repo
            .insert_category(name, &slug, new.description)?
            .ok_or_else(|| {
                AppError::WriteRejected("Insert was blocked by the catalog access policy".to_string())
            })
    }
}

/// Adds the derived `category` and `inStock` fields
pub fn project(product: Product, categories: &[Category]) -> ProductView {
    let category = product
        .category_id
        .and_then(|id| categories.iter().find(|c| c.id == id))
        .map(|c| c.slug.clone())
        .unwrap_or_else(|| "uncategorized".to_string());
    let in_stock = product.stock > 0;

    ProductView {
        product,
        category,
        in_stock,
    }
}

fn pagination(total: usize, limit: usize, offset: usize) -> Pagination {
    Pagination {
        total,
        limit,
        offset,
        has_more: Some(total > offset.saturating_add(limit)),
    }
}

fn parse_number<T: std::str::FromStr>(field: &str, raw: Option<&str>) -> AppResult<Option<T>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| AppError::Validation(format!("{field} must be a valid number"))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RedbProductRepository;
    use crate::database::init_db;
    use tempfile::NamedTempFile;

    fn service(read_only: bool) -> (ProductService, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let db = init_db(file.path().to_str().unwrap()).unwrap();
        let repo = RedbProductRepository::new(Arc::new(db), read_only);
        (ProductService::new(Arc::new(repo)), file)
    }

    fn payload(name: &str, price: f64) -> ProductPayload {
        ProductPayload {
            name: Some(name.to_string()),
            price: Some(price),
            ..ProductPayload::default()
        }
    }

    #[test]
    fn slugify_normalizes_names() {
        assert_eq!(slugify("  Oak  Dining Table! "), "oak-dining-table");
        assert_eq!(slugify("Mid-Century -- Chair"), "mid-century-chair");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn create_rejects_duplicate_derived_slug() {
        let (svc, _file) = service(false);
        svc.create(payload("Oak Table", 500.0)).unwrap();

        let err = svc.create(payload("oak table", 450.0)).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(svc.list(&ProductFilters::default()).unwrap().pagination.total, 1);
    }

    #[test]
    fn create_resolves_category_by_name() {
        let (svc, _file) = service(false);
        let category = svc
            .create_category(NewCategory {
                name: "Living Room".into(),
                slug: None,
                description: None,
            })
            .unwrap();
        assert_eq!(category.slug, "living-room");

        let created = svc
            .create(ProductPayload {
                category: Some("living room".into()),
                ..payload("Sofa", 900.0)
            })
            .unwrap();
        assert_eq!(created.product.category_id, Some(category.id));
        assert_eq!(created.category, "living-room");
    }

    #[test]
    fn bare_in_stock_flag_collapses_and_conflicting_stock_is_rejected() {
        let (svc, _file) = service(false);
        let created = svc
            .create(ProductPayload {
                in_stock: Some(true),
                ..payload("Lamp", 49.99)
            })
            .unwrap();
        assert_eq!(created.product.stock, 1);
        assert!(created.in_stock);

        let err = svc
            .create(ProductPayload {
                in_stock: Some(true),
                stock: Some(12),
                ..payload("Stool", 30.0)
            })
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidFields(ref f) if f[0].field == "inStock"));
    }

    #[test]
    fn read_only_catalog_rejects_writes_distinctly() {
        let (svc, _file) = service(true);
        let err = svc.create(payload("Lamp", 10.0)).unwrap_err();
        assert!(matches!(err, AppError::WriteRejected(_)));
    }

    #[test]
    fn stock_subtraction_floors_at_zero() {
        let (svc, _file) = service(false);
        let id = svc
            .create(ProductPayload {
                stock: Some(3),
                ..payload("Desk", 300.0)
            })
            .unwrap()
            .product
            .id;

        let view = svc
            .update_stock(
                id,
                StockUpdate {
                    quantity: 5,
                    operation: Some("subtract".into()),
                },
            )
            .unwrap();
        assert_eq!(view.product.stock, 0);
        assert!(!view.in_stock);
    }

    #[test]
    fn list_rejects_unknown_sort_field() {
        let (svc, _file) = service(false);
        let filters = ProductFilters {
            sort: Some("colour".into()),
            ..ProductFilters::default()
        };
        assert!(matches!(svc.list(&filters), Err(AppError::Validation(_))));
    }

    #[test]
    fn concurrent_creates_claim_each_slug_once() {
        let (svc, _file) = service(false);
        let names: Vec<String> = (0..20).map(|i| format!("Armchair {i}")).collect();

        let created = std::sync::atomic::AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..6 {
                scope.spawn(|| {
                    for name in &names {
                        match svc.create(payload(name, 150.0)) {
                            Ok(_) => {
                                created.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                            }
                            Err(err) => assert!(matches!(err, AppError::Conflict(_))),
                        }
                    }
                });
            }
        });

        assert_eq!(created.into_inner(), names.len());
        let filters = ProductFilters {
            limit: Some("100".into()),
            ..ProductFilters::default()
        };
        assert_eq!(svc.list(&filters).unwrap().pagination.total, names.len());
    }

    #[test]
    fn update_into_taken_slug_is_a_conflict() {
        let (svc, _file) = service(false);
        svc.create(payload("Oak Table", 500.0)).unwrap();
        let pine = svc.create(payload("Pine Table", 200.0)).unwrap().product.id;

        let err = svc
            .update(
                pine,
                ProductPayload {
                    slug: Some("Oak Table".into()),
                    ..ProductPayload::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(svc.get(pine).unwrap().product.slug, "pine-table");
    }

    #[test]
    fn huge_offset_returns_an_empty_page() {
        let (svc, _file) = service(false);
        svc.create(payload("Lamp", 49.99)).unwrap();

        let filters = ProductFilters {
            offset: Some(usize::MAX.to_string()),
            ..ProductFilters::default()
        };
        let page = svc.list(&filters).unwrap();
        assert!(page.products.is_empty());
        assert_eq!(page.pagination.total, 1);
        assert_eq!(page.pagination.has_more, Some(false));
    }
}
