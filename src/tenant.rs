//! Tenant pool management
//!
//! In single-tenant mode one shared pool serves every request. In multi-tenant
//! mode each tenant owns a database and a pool, created on first use. The
//! tenant → pool map is a [`TenantRegistry`]: each tenant has its own
//! initialization slot, so concurrent first requests for one tenant share a
//! single provisioning run while other tenants proceed independently.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info};

use crate::catalog::CatalogTables;
use crate::config::{PoolSettings, StoreConfig, TenantMode};
use crate::error::{Result, TableStoreError, is_duplicate_database};
use crate::migrate;
use crate::sql::ddl::DdlGenerator;
use crate::sql::sanitize::validate_tenant_id;

/// Request header carrying the tenant id
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Tenant selector carried with a request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: Option<String>,
}

impl TenantContext {
    /// A context without a tenant (valid only in single-tenant mode)
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(tenant_id: impl Into<String>) -> Self {
        let tenant_id = tenant_id.into();
        Self {
            tenant_id: (!tenant_id.is_empty()).then_some(tenant_id),
        }
    }

    /// Build from the raw `x-tenant-id` header value; blank means absent
    pub fn from_header_value(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(id) if !id.is_empty() => Self::new(id),
            _ => Self::none(),
        }
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }
}

/// Lifecycle of a tenant's pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantState {
    /// Never provisioned, or the last attempt failed
    Absent,
    /// A provisioning run is in flight
    Provisioning,
    /// The pool is published and usable
    Ready,
}

struct Slot<P> {
    cell: OnceCell<P>,
    waiting: AtomicUsize,
}

impl<P> Slot<P> {
    fn empty() -> Self {
        Self {
            cell: OnceCell::new(),
            waiting: AtomicUsize::new(0),
        }
    }

    fn ready(value: P) -> Self {
        Self {
            cell: OnceCell::new_with(Some(value)),
            waiting: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> TenantState {
        if self.cell.initialized() {
            TenantState::Ready
        } else if self.waiting.load(Ordering::Acquire) > 0 {
            TenantState::Provisioning
        } else {
            TenantState::Absent
        }
    }
}

/// Decrements the waiter count even if the waiting future is dropped
struct Waiting<'a>(&'a AtomicUsize);

impl<'a> Waiting<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Tenant id → pool map with at most one initialization per tenant
///
/// A failed initialization leaves the slot empty; the next caller retries.
pub struct TenantRegistry<P> {
    slots: RwLock<HashMap<String, Arc<Slot<P>>>>,
}

impl<P: Clone> Default for TenantRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Clone> TenantRegistry<P> {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// The published pool for a tenant, if any
    pub async fn get(&self, tenant_id: &str) -> Option<P> {
        let slots = self.slots.read().await;
        slots.get(tenant_id).and_then(|s| s.cell.get().cloned())
    }

    /// Return the tenant's pool, running `init` if it has none yet
    ///
    /// Concurrent callers for the same tenant wait for one `init` run and all
    /// receive its result.
    pub async fn get_or_try_init<F, Fut>(&self, tenant_id: &str, init: F) -> Result<P>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<P>>,
    {
        let existing = {
            let slots = self.slots.read().await;
            slots.get(tenant_id).cloned()
        };
        let slot = match existing {
            Some(slot) => slot,
            None => {
                let mut slots = self.slots.write().await;
                slots
                    .entry(tenant_id.to_string())
                    .or_insert_with(|| Arc::new(Slot::empty()))
                    .clone()
            }
        };

        if let Some(value) = slot.cell.get() {
            return Ok(value.clone());
        }

        let _waiting = Waiting::enter(&slot.waiting);
        slot.cell.get_or_try_init(init).await.cloned()
    }

    /// Publish a pool unconditionally, returning the one it replaces
    ///
    /// An init still running on the old slot is awaited and its pool returned,
    /// so the caller owns every pool that is no longer published. An old slot
    /// left empty is filled with the new pool for callers still holding it.
    pub async fn replace(&self, tenant_id: &str, value: P) -> Option<P> {
        let old = {
            let mut slots = self.slots.write().await;
            slots.insert(tenant_id.to_string(), Arc::new(Slot::ready(value.clone())))?
        };

        let mut stale = true;
        let settled = old
            .cell
            .get_or_init(|| {
                stale = false;
                async move { value }
            })
            .await;
        stale.then(|| settled.clone())
    }

    pub async fn state(&self, tenant_id: &str) -> TenantState {
        let slots = self.slots.read().await;
        slots
            .get(tenant_id)
            .map(|s| s.state())
            .unwrap_or(TenantState::Absent)
    }

    /// Ids of tenants with a published pool, sorted
    pub async fn tenant_ids(&self) -> Vec<String> {
        let slots = self.slots.read().await;
        let mut ids: Vec<String> = slots
            .iter()
            .filter(|(_, s)| s.cell.initialized())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Remove every slot, returning the published pools
    pub async fn drain(&self) -> Vec<P> {
        let mut slots = self.slots.write().await;
        slots
            .drain()
            .filter_map(|(_, s)| s.cell.get().cloned())
            .collect()
    }
}

enum Pools {
    Single(PgPool),
    Multi {
        admin: PgPool,
        registry: Arc<TenantRegistry<PgPool>>,
    },
}

/// Owns the connection pools for every tenant
pub struct TenantPoolManager {
    config: StoreConfig,
    catalog: CatalogTables,
    pools: Pools,
}

impl TenantPoolManager {
    /// Connect according to the configured tenant mode
    ///
    /// Single-tenant mode creates the data database when an admin DSN is
    /// configured, then opens and migrates the shared pool. Multi-tenant mode
    /// only opens the admin pool; tenant pools are created on demand.
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        Self::with_registry(config, Arc::new(TenantRegistry::new())).await
    }

    /// Connect using a caller-supplied tenant registry (multi-tenant mode)
    pub async fn with_registry(
        config: StoreConfig,
        registry: Arc<TenantRegistry<PgPool>>,
    ) -> Result<Self> {
        config.validate()?;
        let catalog = CatalogTables::new(&config.catalog_prefix);

        let pools = match config.tenant_mode {
            TenantMode::Single => {
                let data_url = config.data_database_url().ok_or_else(|| {
                    TableStoreError::config("single tenant mode requires a database URL")
                })?;

                if let Some(admin_url) = config.admin_database_url.as_deref() {
                    let database = database_name_from_dsn(data_url)?;
                    let admin = open_pool(admin_url, &config.pool).await?;
                    let created = create_database(&admin, &config, &database).await;
                    admin.close().await;
                    created?;
                }

                let pool = open_pool(data_url, &config.pool).await?;
                if let Err(e) = migrate::run(&pool, &catalog).await {
                    pool.close().await;
                    return Err(e);
                }
                info!("Single-tenant pool ready");
                Pools::Single(pool)
            }
            TenantMode::Multi => {
                let admin_dsn = config.tenant_dsn(&config.tenant_admin_db).ok_or_else(|| {
                    TableStoreError::config("multi tenant mode requires TENANT_DSN_TEMPLATE")
                })?;
                let admin = open_pool(&admin_dsn, &config.pool).await?;
                info!(admin_db = %config.tenant_admin_db, "Multi-tenant admin pool ready");
                Pools::Multi { admin, registry }
            }
        };

        Ok(Self {
            config,
            catalog,
            pools,
        })
    }

    pub fn mode(&self) -> TenantMode {
        self.config.tenant_mode
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Resolve the pool for a request, provisioning the tenant on first use
    pub async fn pool_for(&self, ctx: &TenantContext) -> Result<PgPool> {
        match &self.pools {
            Pools::Single(pool) => Ok(pool.clone()),
            Pools::Multi { admin, registry } => {
                let tenant_id = ctx.tenant_id().ok_or_else(|| {
                    TableStoreError::tenant("tenant id is required in multi-tenant mode")
                })?;
                validate_tenant_id(tenant_id).map_err(TableStoreError::tenant)?;

                if let Some(pool) = registry.get(tenant_id).await {
                    return Ok(pool);
                }
                registry
                    .get_or_try_init(tenant_id, || self.provision(admin, tenant_id))
                    .await
            }
        }
    }

    /// Create (if missing) and bootstrap a tenant database, replacing any cached pool
    pub async fn create_tenant(&self, tenant_id: &str) -> Result<()> {
        let Pools::Multi { admin, registry } = &self.pools else {
            return Err(TableStoreError::tenant(
                "creating tenants is only supported in multi-tenant mode",
            ));
        };
        validate_tenant_id(tenant_id).map_err(TableStoreError::tenant)?;

        let pool = self.provision(admin, tenant_id).await?;
        if let Some(old) = registry.replace(tenant_id, pool).await {
            debug!(tenant_id, "Closing replaced tenant pool");
            old.close().await;
        }
        Ok(())
    }

    pub async fn tenant_state(&self, tenant_id: &str) -> TenantState {
        match &self.pools {
            Pools::Single(_) => TenantState::Ready,
            Pools::Multi { registry, .. } => registry.state(tenant_id).await,
        }
    }

    /// Tenants with a ready pool (always empty in single-tenant mode)
    pub async fn tenant_ids(&self) -> Vec<String> {
        match &self.pools {
            Pools::Single(_) => Vec::new(),
            Pools::Multi { registry, .. } => registry.tenant_ids().await,
        }
    }

    /// Close every pool owned by the manager
    pub async fn close(&self) {
        match &self.pools {
            Pools::Single(pool) => pool.close().await,
            Pools::Multi { admin, registry } => {
                for pool in registry.drain().await {
                    pool.close().await;
                }
                admin.close().await;
            }
        }
    }

    async fn provision(&self, admin: &PgPool, tenant_id: &str) -> Result<PgPool> {
        info!(tenant_id, "Provisioning tenant");
        create_database(admin, &self.config, tenant_id).await?;

        let dsn = self.config.tenant_dsn(tenant_id).ok_or_else(|| {
            TableStoreError::config("multi tenant mode requires TENANT_DSN_TEMPLATE")
        })?;
        let pool = open_pool(&dsn, &self.config.pool).await?;
        if let Err(e) = migrate::run(&pool, &self.catalog).await {
            pool.close().await;
            return Err(e);
        }
        info!(tenant_id, "Tenant ready");
        Ok(pool)
    }
}

/// Open a pool with the configured bounds; the DSN is never logged
pub async fn open_pool(dsn: &str, settings: &PoolSettings) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .max_lifetime(Some(settings.max_lifetime))
        .acquire_timeout(settings.acquire_timeout)
        .connect(dsn)
        .await
        .map_err(|e| TableStoreError::Connection(format!("Database connection failed: {}", e)))
}

/// CREATE DATABASE, treating "already exists" as success
///
/// Sent as a simple query; CREATE DATABASE cannot run in a transaction block.
async fn create_database(admin: &PgPool, config: &StoreConfig, database: &str) -> Result<()> {
    let sql = DdlGenerator::new(config).generate_create_database(database);
    match sqlx::raw_sql(&sql).execute(admin).await {
        Ok(_) => {
            info!(database, "Created database");
            Ok(())
        }
        Err(e) if is_duplicate_database(&e) => {
            debug!(database, "Database already exists");
            Ok(())
        }
        Err(e) => Err(TableStoreError::Sql(e)),
    }
}

/// Database name of a DSN: the last segment of its path
pub fn database_name_from_dsn(dsn: &str) -> Result<String> {
    let url = url::Url::parse(dsn)
        .map_err(|e| TableStoreError::config(format!("invalid database URL: {}", e)))?;
    url.path()
        .trim_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| TableStoreError::config("database URL does not name a database"))
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // TenantContext Tests
    // =========================================================================

    #[test]
    fn test_context_from_header_value() {
        assert_eq!(
            TenantContext::from_header_value(Some(" acme ")).tenant_id(),
            Some("acme")
        );
        assert_eq!(TenantContext::from_header_value(Some("   ")).tenant_id(), None);
        assert_eq!(TenantContext::from_header_value(None).tenant_id(), None);
        assert_eq!(TenantContext::new("").tenant_id(), None);
        assert_eq!(TENANT_HEADER, "x-tenant-id");
    }

    // =========================================================================
    // DSN Tests
    // =========================================================================

    #[test]
    fn test_database_name_from_dsn() {
        assert_eq!(
            database_name_from_dsn("postgres://u:p@localhost:5432/tables").unwrap(),
            "tables"
        );
        assert_eq!(
            database_name_from_dsn("postgresql://localhost/a/b?sslmode=disable").unwrap(),
            "b"
        );
        assert_eq!(
            database_name_from_dsn("postgres://localhost/tables/").unwrap(),
            "tables"
        );
    }

    #[test]
    fn test_database_name_missing() {
        assert!(matches!(
            database_name_from_dsn("postgres://localhost:5432"),
            Err(TableStoreError::Config(_))
        ));
        assert!(matches!(
            database_name_from_dsn("not a url"),
            Err(TableStoreError::Config(_))
        ));
    }

    // =========================================================================
    // TenantRegistry Tests
    // =========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_access_initializes_once() {
        let registry = Arc::new(TenantRegistry::<usize>::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            let runs = runs.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .get_or_try_init("acme", || async {
                        let n = runs.fetch_add(1, Ordering::SeqCst);
                        for _ in 0..10 {
                            tokio::task::yield_now().await;
                        }
                        Ok(n + 100)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 100);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(registry.state("acme").await, TenantState::Ready);
        assert_eq!(registry.get("acme").await, Some(100));
    }

    #[tokio::test]
    async fn test_failed_init_is_retried() {
        let registry = TenantRegistry::<usize>::new();

        let failed = registry
            .get_or_try_init("acme", || async {
                Err(TableStoreError::Connection("refused".to_string()))
            })
            .await;
        assert!(matches!(failed, Err(TableStoreError::Connection(_))));
        assert_eq!(registry.state("acme").await, TenantState::Absent);
        assert!(registry.get("acme").await.is_none());

        let value = registry
            .get_or_try_init("acme", || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(registry.state("acme").await, TenantState::Ready);
    }

    #[tokio::test]
    async fn test_tenants_are_independent() {
        let registry = TenantRegistry::<&'static str>::new();
        registry.get_or_try_init("b", || async { Ok("pool-b") }).await.unwrap();
        registry.get_or_try_init("a", || async { Ok("pool-a") }).await.unwrap();

        assert_eq!(registry.get("a").await, Some("pool-a"));
        assert_eq!(registry.get("b").await, Some("pool-b"));
        assert_eq!(registry.state("c").await, TenantState::Absent);
        assert_eq!(registry.tenant_ids().await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_replace_returns_previous_pool() {
        let registry = TenantRegistry::<u32>::new();
        assert_eq!(registry.replace("acme", 1).await, None);
        assert_eq!(registry.replace("acme", 2).await, Some(1));
        assert_eq!(registry.get("acme").await, Some(2));

        // A replaced slot is already initialized; init never runs
        let value = registry
            .get_or_try_init("acme", || async { Ok(3) })
            .await
            .unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_replace_waits_for_init_in_flight() {
        let registry = Arc::new(TenantRegistry::<u32>::new());
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let init = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .get_or_try_init("acme", || async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        Ok(1)
                    })
                    .await
            })
        };
        started_rx.await.unwrap();

        let replace = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.replace("acme", 2).await })
        };
        while registry.get("acme").await != Some(2) {
            tokio::task::yield_now().await;
        }
        assert!(!replace.is_finished());

        release_tx.send(()).unwrap();
        // The pool built by the superseded init goes back to the replacer
        assert_eq!(replace.await.unwrap(), Some(1));
        assert_eq!(init.await.unwrap().unwrap(), 1);
        assert_eq!(registry.get("acme").await, Some(2));
        assert_eq!(registry.drain().await, vec![2]);
    }

    #[tokio::test]
    async fn test_replace_after_failed_init() {
        let registry = TenantRegistry::<u32>::new();
        let failed = registry
            .get_or_try_init("acme", || async {
                Err(TableStoreError::Connection("refused".to_string()))
            })
            .await;
        assert!(failed.is_err());

        // The empty slot holds nothing to hand back
        assert_eq!(registry.replace("acme", 5).await, None);
        assert_eq!(registry.state("acme").await, TenantState::Ready);
        assert_eq!(registry.get("acme").await, Some(5));
    }

    #[tokio::test]
    async fn test_drain_empties_registry() {
        let registry = TenantRegistry::<u32>::new();
        registry.replace("a", 1).await;
        registry.replace("b", 2).await;

        let mut drained = registry.drain().await;
        drained.sort();
        assert_eq!(drained, vec![1, 2]);
        assert!(registry.tenant_ids().await.is_empty());
        assert_eq!(registry.state("a").await, TenantState::Absent);
    }
}
