use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pds_sketch::engine::{MemoryEngine, RedisEngine};
use pds_sketch::identity::FilterIdentity;
use pds_sketch::{
    new_cardinal, new_filter, Cardinal, CardinalDescriptor, CardinalType, EngineRef, Filter,
    FilterDescriptor, FilterType,
};
use rusqlite::Transaction;
use tracing::{debug, info, warn};

use crate::config::{CatalogConfig, ParameterPolicy};
use crate::error::{CatalogError, Result};
use crate::registry::HandleRegistry;
use crate::repository::{self, CatalogRepository};

/// Catalog creates, restores and persists sketch handles.
///
/// Creation is create-or-get: a live handle for the identity is reused, a
/// cataloged one is rebuilt from its snapshot, and only an unknown identity
/// gets a fresh sketch. Each step that writes does so in one short
/// transaction, and no transaction is open across a remote engine call.
pub struct Catalog {
    repo: CatalogRepository,
    engine: EngineRef,
    policy: ParameterPolicy,
    filters: HandleRegistry<FilterIdentity, dyn Filter>,
    cardinals: HandleRegistry<CardinalDescriptor, dyn Cardinal>,
}

impl Catalog {
    pub fn new(repo: CatalogRepository, engine: EngineRef, policy: ParameterPolicy) -> Self {
        Self {
            repo,
            engine,
            policy,
            filters: HandleRegistry::new(),
            cardinals: HandleRegistry::new(),
        }
    }

    /// open wires a catalog from `config`: the SQLite database, the Redis
    /// engine when a URL is configured (the in-process engine otherwise),
    /// and the schema.
    pub async fn open(config: &CatalogConfig) -> Result<Self> {
        let repo = CatalogRepository::open(&config.database_path)?;

        let engine: EngineRef = match &config.remote_url {
            Some(url) => {
                let engine = RedisEngine::connect(url)
                    .await
                    .map_err(|e| CatalogError::Remote(format!("{}: {}", url, e)))?;
                info!(url = %url, "connected remote engine");
                Arc::new(engine)
            }
            None => {
                warn!("no remote engine configured, remote sketch state is lost on exit");
                Arc::new(MemoryEngine::new())
            }
        };

        repo.ensure_schema().await?;
        info!(path = %config.database_path.display(), "catalog opened");

        Ok(Self::new(repo, engine, config.parameter_policy))
    }

    pub fn repository(&self) -> &CatalogRepository {
        &self.repo
    }

    /// create_filter returns a live filter for the declared identity and
    /// records it in the catalog.
    pub async fn create_filter(
        &self,
        filter_type: &str,
        key: &str,
        max_cardinality: u64,
        max_fp: f64,
    ) -> Result<Arc<dyn Filter>> {
        let filter_type: FilterType = filter_type.parse()?;
        let descriptor = FilterDescriptor::new(filter_type, key, max_cardinality, max_fp)?;
        let identity = descriptor.identity();

        let slot = self.filters.slot(&identity);
        let allocated = AtomicBool::new(false);
        let (flag, declared) = (&allocated, &descriptor);
        let handle = slot
            .get_or_try_init(|| async move {
                flag.store(true, Ordering::SeqCst);
                self.load_filter(declared.clone(), false).await
            })
            .await;
        let handle = match handle {
            Ok(handle) => handle.clone(),
            Err(err) => {
                self.filters.evict_empty(&identity);
                return Err(err);
            }
        };

        let state = match handle.serialize().await {
            Ok(state) => state,
            Err(err) => {
                if allocated.load(Ordering::SeqCst) {
                    self.filters.evict(&identity);
                }
                return Err(err.into());
            }
        };
        let policy = self.policy;
        let record = descriptor.clone();
        let persisted = self
            .repo
            .transaction(move |tx| {
                check_filter_tuning(tx, &record, policy)?;
                repository::insert_filter(tx, &record, &state)
            })
            .await;

        if let Err(err) = persisted {
            if allocated.load(Ordering::SeqCst) {
                self.filters.evict(&identity);
            }
            return Err(err);
        }

        info!(
            filter_type = %descriptor.filter_type,
            key = %descriptor.key,
            max_cardinality = descriptor.max_cardinality,
            max_fp = descriptor.max_fp,
            hash_func_num = descriptor.hash_func_num,
            hash_func_type = %descriptor.hash_func_type,
            "created filter"
        );
        Ok(handle)
    }

    /// get_filter returns the cataloged filter with the given identity.
    pub async fn get_filter(
        &self,
        filter_type: &str,
        key: &str,
        max_cardinality: u64,
        max_fp: f64,
    ) -> Result<Arc<dyn Filter>> {
        let filter_type: FilterType = filter_type.parse()?;
        let descriptor = FilterDescriptor::new(filter_type, key, max_cardinality, max_fp)?;
        let identity = descriptor.identity();

        let slot = self.filters.slot(&identity);
        let handle = slot
            .get_or_try_init(|| self.load_filter(descriptor, true))
            .await;
        match handle {
            Ok(handle) => Ok(handle.clone()),
            Err(err) => {
                self.filters.evict_empty(&identity);
                Err(err)
            }
        }
    }

    /// save_filter persists the current snapshot of `filter`.
    pub async fn save_filter(&self, filter: &dyn Filter) -> Result<()> {
        let state = filter.serialize().await?;
        let descriptor = filter.descriptor().clone();
        let len = state.len();
        self.repo.upsert_filter(&descriptor, state).await?;
        debug!(filter_type = %descriptor.filter_type, key = %descriptor.key, bytes = len, "saved filter");
        Ok(())
    }

    /// create_cardinal returns a live counter for the declared identity and
    /// records it in the catalog.
    pub async fn create_cardinal(&self, cardinal_type: &str, key: &str) -> Result<Arc<dyn Cardinal>> {
        let cardinal_type: CardinalType = cardinal_type.parse()?;
        let descriptor = CardinalDescriptor::new(cardinal_type, key);

        let slot = self.cardinals.slot(&descriptor);
        let allocated = AtomicBool::new(false);
        let (flag, declared) = (&allocated, &descriptor);
        let handle = slot
            .get_or_try_init(|| async move {
                flag.store(true, Ordering::SeqCst);
                self.load_cardinal(declared.clone(), false).await
            })
            .await;
        let handle = match handle {
            Ok(handle) => handle.clone(),
            Err(err) => {
                self.cardinals.evict_empty(&descriptor);
                return Err(err);
            }
        };

        let persisted = match handle.serialize().await {
            Ok(state) => self.repo.upsert_cardinal(&descriptor, state).await,
            Err(err) => Err(err.into()),
        };
        if let Err(err) = persisted {
            if allocated.load(Ordering::SeqCst) {
                self.cardinals.evict(&descriptor);
            }
            return Err(err);
        }

        info!(cardinal_type = %descriptor.cardinal_type, key = %descriptor.key, "created cardinal");
        Ok(handle)
    }

    /// get_cardinal returns the cataloged counter for (type, key).
    pub async fn get_cardinal(&self, cardinal_type: &str, key: &str) -> Result<Arc<dyn Cardinal>> {
        let cardinal_type: CardinalType = cardinal_type.parse()?;
        let descriptor = CardinalDescriptor::new(cardinal_type, key);

        let slot = self.cardinals.slot(&descriptor);
        let handle = slot
            .get_or_try_init(|| self.load_cardinal(descriptor.clone(), true))
            .await;
        match handle {
            Ok(handle) => Ok(handle.clone()),
            Err(err) => {
                self.cardinals.evict_empty(&descriptor);
                Err(err)
            }
        }
    }

    /// save_cardinal persists the current snapshot of `cardinal`.
    pub async fn save_cardinal(&self, cardinal: &dyn Cardinal) -> Result<()> {
        let state = cardinal.serialize().await?;
        let descriptor = cardinal.descriptor().clone();
        let len = state.len();
        self.repo.upsert_cardinal(&descriptor, state).await?;
        debug!(cardinal_type = %descriptor.cardinal_type, key = %descriptor.key, bytes = len, "saved cardinal");
        Ok(())
    }

    /// load_filter builds the handle for `descriptor`, restoring the cataloged
    /// snapshot when there is one.
    async fn load_filter(&self, descriptor: FilterDescriptor, must_exist: bool) -> Result<Arc<dyn Filter>> {
        let stored = match self.repo.get_filter(&descriptor.identity()).await {
            Ok(record) => Some(record),
            Err(CatalogError::NotFound(_)) if !must_exist => None,
            Err(err) => return Err(err),
        };

        let handle = new_filter(descriptor, &self.engine)?;
        if let Some(record) = stored {
            if !record.state.is_empty() {
                handle.restore(&record.state).await?;
            }
            info!(
                filter_type = %record.descriptor.filter_type,
                key = %record.descriptor.key,
                bytes = record.state.len(),
                "restored filter"
            );
        }
        Ok(handle)
    }

    async fn load_cardinal(
        &self,
        descriptor: CardinalDescriptor,
        must_exist: bool,
    ) -> Result<Arc<dyn Cardinal>> {
        let stored = match self
            .repo
            .get_cardinal(descriptor.cardinal_type, &descriptor.key)
            .await
        {
            Ok(record) => Some(record),
            Err(CatalogError::NotFound(_)) if !must_exist => None,
            Err(err) => return Err(err),
        };

        let handle = new_cardinal(descriptor, &self.engine)?;
        if let Some(record) = stored {
            if !record.state.is_empty() {
                handle.restore(&record.state).await?;
            }
            info!(
                cardinal_type = %record.descriptor.cardinal_type,
                key = %record.descriptor.key,
                bytes = record.state.len(),
                "restored cardinal"
            );
        }
        Ok(handle)
    }
}

/// check_filter_tuning applies `policy` when `descriptor` declares tuning that
/// differs from every row already cataloged under its (type, key).
/// Re-declaring an existing row is always accepted.
fn check_filter_tuning(
    tx: &Transaction<'_>,
    descriptor: &FilterDescriptor,
    policy: ParameterPolicy,
) -> Result<()> {
    let rows = repository::select_filters(tx, descriptor.filter_type, &descriptor.key)?;

    if let Some(row) = rows
        .iter()
        .find(|r| r.descriptor.identity() == descriptor.identity())
    {
        if row.descriptor.hash_func_num != descriptor.hash_func_num {
            warn!(
                key = %descriptor.key,
                stored = row.descriptor.hash_func_num,
                derived = descriptor.hash_func_num,
                "derived hash count differs from the cataloged one, keeping the cataloged value"
            );
        }
        return Ok(());
    }

    let Some(existing) = rows.first() else {
        return Ok(());
    };

    let message = format!(
        "{} {} is cataloged with capacity {} and error rate {}, requested capacity {} and error rate {}",
        descriptor.filter_type,
        descriptor.key,
        existing.descriptor.max_cardinality,
        existing.descriptor.max_fp,
        descriptor.max_cardinality,
        descriptor.max_fp
    );
    match policy {
        ParameterPolicy::Reject => Err(CatalogError::ParameterConflict(message)),
        ParameterPolicy::Warn => {
            warn!("{}", message);
            Ok(())
        }
    }
}
