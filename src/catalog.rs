//! Product catalog persistence
//!
//! [`ProductRepository`] is the seam between the product service and the
//! storage engine. Deletes and category inserts report what they wrote
//! through an `Option`: `None` means the write went through without error
//! but changed nothing, which the service treats as a policy rejection.
//! Product inserts and updates return a [`ProductWrite`] instead, since the
//! slug check happens inside the same write transaction.

use std::cmp::Ordering;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};

use crate::database::{next_sequence, TABLE_CATEGORIES, TABLE_PRODUCTS, TABLE_PRODUCT_SLUGS};
use crate::error::StoreError;
use crate::model::{Category, Product, ProductId};

pub type StoreResult<T> = Result<T, StoreError>;

/// Sortable product columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Name,
    Price,
    Stock,
    CreatedAt,
    UpdatedAt,
}

impl SortField {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "name" => Some(SortField::Name),
            "price" => Some(SortField::Price),
            "stock" => Some(SortField::Stock),
            "createdAt" | "created_at" => Some(SortField::CreatedAt),
            "updatedAt" | "updated_at" => Some(SortField::UpdatedAt),
            _ => None,
        }
    }

    fn compare(self, a: &Product, b: &Product) -> Ordering {
        match self {
            SortField::Name => a.name.cmp(&b.name),
            SortField::Price => a.price.total_cmp(&b.price),
            SortField::Stock => a.stock.cmp(&b.stock),
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        }
    }
}

/// A validated product listing request
#[derive(Debug, Clone)]
pub struct ProductQuery {
    pub category_id: Option<u64>,
    /// Lowercased needle matched against name and description
    pub search: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub featured_only: bool,
    pub in_stock_only: bool,
    pub sort: SortField,
    pub ascending: bool,
    pub limit: usize,
    pub offset: usize,
}

impl Default for ProductQuery {
    fn default() -> Self {
        Self {
            category_id: None,
            search: None,
            min_price: None,
            max_price: None,
            featured_only: false,
            in_stock_only: false,
            sort: SortField::Name,
            ascending: true,
            limit: 50,
            offset: 0,
        }
    }
}

impl ProductQuery {
    pub fn matches(&self, product: &Product) -> bool {
        if let Some(category_id) = self.category_id {
            if product.category_id != Some(category_id) {
                return false;
            }
        }
        if let Some(needle) = &self.search {
            let in_name = product.name.to_lowercase().contains(needle);
            let in_description = product
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(needle));
            if !in_name && !in_description {
                return false;
            }
        }
        if self.min_price.is_some_and(|min| product.price < min) {
            return false;
        }
        if self.max_price.is_some_and(|max| product.price > max) {
            return false;
        }
        if self.featured_only && !product.featured {
            return false;
        }
        if self.in_stock_only && product.stock == 0 {
            return false;
        }
        true
    }

    /// Filters, sorts and pages `products`, returning the page and the
    /// total number of matches before paging
    pub fn apply(&self, products: Vec<Product>) -> (Vec<Product>, usize) {
        let mut matched: Vec<Product> = products.into_iter().filter(|p| self.matches(p)).collect();
        matched.sort_by(|a, b| {
            let ord = self.sort.compare(a, b);
            if self.ascending {
                ord
            } else {
                ord.reverse()
            }
        });
        let total = matched.len();
        let page = matched.into_iter().skip(self.offset).take(self.limit).collect();
        (page, total)
    }
}

/// Outcome of a product insert or update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductWrite {
    Written(ProductId),
    /// Nothing was written
    Rejected,
    /// Another product owns the slug
    SlugTaken,
}

impl ProductWrite {
    pub fn id(self) -> Option<ProductId> {
        match self {
            ProductWrite::Written(id) => Some(id),
            _ => None,
        }
    }
}

/// Storage capabilities the product service needs
pub trait ProductRepository: Send + Sync {
    fn query(&self, query: &ProductQuery) -> StoreResult<(Vec<Product>, usize)>;

    fn all(&self) -> StoreResult<Vec<Product>>;

    fn get(&self, id: ProductId) -> StoreResult<Option<Product>>;

    fn find_by_slug(&self, slug: &str) -> StoreResult<Option<ProductId>>;

    /// Stores a new product under a freshly issued id (the `id` field of
    /// `product` is ignored). The slug must not be claimed by another product
    fn insert(&self, product: Product) -> StoreResult<ProductWrite>;

    /// Replaces the stored product with the same id. A missing product is
    /// reported as [`ProductWrite::Rejected`]
    fn update(&self, product: &Product) -> StoreResult<ProductWrite>;

    fn delete(&self, id: ProductId) -> StoreResult<Option<ProductId>>;

    fn categories(&self) -> StoreResult<Vec<Category>>;

    fn insert_category(
        &self,
        name: &str,
        slug: &str,
        description: Option<String>,
    ) -> StoreResult<Option<Category>>;
}

/// redb-backed catalog
///
/// With `read_only` set every write commits nothing and reports zero rows,
/// mirroring a database whose access policy blocks the caller.
pub struct RedbProductRepository {
    db: Arc<Database>,
    read_only: bool,
}

impl RedbProductRepository {
    pub fn new(db: Arc<Database>, read_only: bool) -> Self {
        Self { db, read_only }
    }
}

impl ProductRepository for RedbProductRepository {
    fn query(&self, query: &ProductQuery) -> StoreResult<(Vec<Product>, usize)> {
        Ok(query.apply(self.all()?))
    }

    fn all(&self) -> StoreResult<Vec<Product>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TABLE_PRODUCTS)?;

        let mut products = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            products.push(serde_json::from_str::<Product>(value.value())?);
        }
        Ok(products)
    }

    fn get(&self, id: ProductId) -> StoreResult<Option<Product>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TABLE_PRODUCTS)?;

        match table.get(id)? {
            Some(value) => Ok(Some(serde_json::from_str(value.value())?)),
            None => Ok(None),
        }
    }

    fn find_by_slug(&self, slug: &str) -> StoreResult<Option<ProductId>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TABLE_PRODUCT_SLUGS)?;
        let id = table.get(slug)?.map(|v| v.value());
        Ok(id)
    }

    fn insert(&self, mut product: Product) -> StoreResult<ProductWrite> {
        if self.read_only {
            return Ok(ProductWrite::Rejected);
        }

        // redb serializes write transactions, so the slug lookup and the
        // insert below cannot interleave with another writer
        let write_txn = self.db.begin_write()?;
        {
            let mut slugs = write_txn.open_table(TABLE_PRODUCT_SLUGS)?;
            if slugs.get(product.slug.as_str())?.is_some() {
                return Ok(ProductWrite::SlugTaken);
            }

            product.id = next_sequence(&write_txn, "products")?;
            let json = serde_json::to_string(&product)?;

            let mut products = write_txn.open_table(TABLE_PRODUCTS)?;
            products.insert(product.id, json.as_str())?;
            slugs.insert(product.slug.as_str(), product.id)?;
        }
        write_txn.commit()?;

        Ok(ProductWrite::Written(product.id))
    }

    fn update(&self, product: &Product) -> StoreResult<ProductWrite> {
        if self.read_only {
            return Ok(ProductWrite::Rejected);
        }

        let json = serde_json::to_string(product)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut products = write_txn.open_table(TABLE_PRODUCTS)?;
            let previous_slug = match products.get(product.id)? {
                Some(value) => serde_json::from_str::<Product>(value.value())?.slug,
                None => return Ok(ProductWrite::Rejected),
            };

            if previous_slug != product.slug {
                let mut slugs = write_txn.open_table(TABLE_PRODUCT_SLUGS)?;
                let owner = slugs.get(product.slug.as_str())?.map(|v| v.value());
                if owner.is_some_and(|owner| owner != product.id) {
                    return Ok(ProductWrite::SlugTaken);
                }
                slugs.remove(previous_slug.as_str())?;
                slugs.insert(product.slug.as_str(), product.id)?;
            }

            products.insert(product.id, json.as_str())?;
        }
        write_txn.commit()?;

        Ok(ProductWrite::Written(product.id))
    }

    fn delete(&self, id: ProductId) -> StoreResult<Option<ProductId>> {
        if self.read_only {
            return Ok(None);
        }

        let write_txn = self.db.begin_write()?;
        {
            let mut products = write_txn.open_table(TABLE_PRODUCTS)?;
            let removed = match products.remove(id)? {
                Some(value) => serde_json::from_str::<Product>(value.value())?,
                None => return Ok(None),
            };

            let mut slugs = write_txn.open_table(TABLE_PRODUCT_SLUGS)?;
            slugs.remove(removed.slug.as_str())?;
        }
        write_txn.commit()?;

        Ok(Some(id))
    }

    fn categories(&self) -> StoreResult<Vec<Category>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TABLE_CATEGORIES)?;

        let mut categories = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            categories.push(serde_json::from_str::<Category>(value.value())?);
        }
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }

    fn insert_category(
        &self,
        name: &str,
        slug: &str,
        description: Option<String>,
    ) -> StoreResult<Option<Category>> {
        if self.read_only {
            return Ok(None);
        }

        let write_txn = self.db.begin_write()?;
        let category = {
            let category = Category {
                id: next_sequence(&write_txn, "categories")?,
                name: name.to_string(),
                slug: slug.to_string(),
                description,
            };
            let json = serde_json::to_string(&category)?;
            let mut table = write_txn.open_table(TABLE_CATEGORIES)?;
            table.insert(category.id, json.as_str())?;
            category
        };
        write_txn.commit()?;

        Ok(Some(category))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_db;
    use chrono::Utc;
    use tempfile::NamedTempFile;

    fn product(name: &str, price: f64, stock: u32) -> Product {
        Product {
            id: 0,
            slug: name.to_lowercase().replace(' ', "-"),
            name: name.to_string(),
            description: None,
            price,
            stock,
            category_id: None,
            images: vec![],
            featured: false,
            tags: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn repo(read_only: bool) -> (RedbProductRepository, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let db = init_db(file.path().to_str().unwrap()).unwrap();
        (RedbProductRepository::new(Arc::new(db), read_only), file)
    }

    #[test]
    fn query_filters_sorts_and_pages() {
        let products = vec![
            product("Sofa", 900.0, 2),
            product("Lamp", 49.99, 0),
            product("Desk", 300.0, 5),
            product("Chair", 120.0, 1),
        ];
        let query = ProductQuery {
            min_price: Some(100.0),
            sort: SortField::Price,
            ascending: false,
            limit: 2,
            ..ProductQuery::default()
        };

        let (page, total) = query.apply(products);
        assert_eq!(total, 3);
        let names: Vec<_> = page.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["Sofa", "Desk"]);
    }

    #[test]
    fn search_is_case_insensitive_over_description() {
        let mut desk = product("Desk", 300.0, 5);
        desk.description = Some("Solid OAK top".into());
        let query = ProductQuery {
            search: Some("oak".into()),
            ..ProductQuery::default()
        };
        assert!(query.matches(&desk));
        assert!(!query.matches(&product("Lamp", 10.0, 1)));
    }

    #[test]
    fn slug_index_follows_updates_and_deletes() {
        let (repo, _file) = repo(false);
        let id = repo.insert(product("Oak Table", 500.0, 3)).unwrap().id().unwrap();
        assert_eq!(repo.find_by_slug("oak-table").unwrap(), Some(id));

        let mut stored = repo.get(id).unwrap().unwrap();
        stored.slug = "walnut-table".into();
        assert_eq!(repo.update(&stored).unwrap(), ProductWrite::Written(id));
        assert_eq!(repo.find_by_slug("oak-table").unwrap(), None);
        assert_eq!(repo.find_by_slug("walnut-table").unwrap(), Some(id));

        assert_eq!(repo.delete(id).unwrap(), Some(id));
        assert_eq!(repo.find_by_slug("walnut-table").unwrap(), None);
        assert!(repo.get(id).unwrap().is_none());
    }

    #[test]
    fn read_only_catalog_reports_zero_rows() {
        let (repo, _file) = repo(true);
        assert_eq!(repo.insert(product("Stool", 40.0, 1)).unwrap(), ProductWrite::Rejected);
        assert!(repo.all().unwrap().is_empty());
        assert!(repo.insert_category("Chairs", "chairs", None).unwrap().is_none());
    }

    #[test]
    fn slug_claims_are_checked_inside_the_write() {
        let (repo, _file) = repo(false);
        let oak = repo.insert(product("Oak Table", 500.0, 3)).unwrap().id().unwrap();
        let pine = repo.insert(product("Pine Table", 200.0, 3)).unwrap().id().unwrap();

        assert_eq!(repo.insert(product("Oak Table", 450.0, 1)).unwrap(), ProductWrite::SlugTaken);

        let mut stored = repo.get(pine).unwrap().unwrap();
        stored.slug = "oak-table".into();
        assert_eq!(repo.update(&stored).unwrap(), ProductWrite::SlugTaken);
        assert_eq!(repo.find_by_slug("oak-table").unwrap(), Some(oak));
        assert_eq!(repo.get(pine).unwrap().unwrap().slug, "pine-table");
        assert_eq!(repo.all().unwrap().len(), 2);
    }
}
