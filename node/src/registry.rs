use std::sync::Arc;

use anyhow::{bail, Error};

use delver::components::transformer::{EventTransformer, StorageTransformer};
use delver_store_postgres::ConnectionPool;

pub type EventTransformerInitializer = fn(Arc<ConnectionPool>) -> Arc<dyn EventTransformer>;
pub type StorageTransformerInitializer = fn(Arc<ConnectionPool>) -> Arc<dyn StorageTransformer>;

/// Transformer factories linked into this binary, keyed by name. The
/// `execute` and `backfill-events` commands select from this registry;
/// an empty selection runs everything registered.
#[derive(Default)]
pub struct TransformerRegistry {
    events: Vec<(String, EventTransformerInitializer)>,
    storage: Vec<(String, StorageTransformerInitializer)>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn register_event_transformer(&mut self, name: &str, init: EventTransformerInitializer) {
        self.events.push((name.to_string(), init));
    }

    pub fn register_storage_transformer(
        &mut self,
        name: &str,
        init: StorageTransformerInitializer,
    ) {
        self.storage.push((name.to_string(), init));
    }

    pub fn event_transformers(
        &self,
        pool: &Arc<ConnectionPool>,
        names: &[String],
    ) -> Result<Vec<Arc<dyn EventTransformer>>, Error> {
        Self::select(&self.events, pool, names)
    }

    pub fn storage_transformers(
        &self,
        pool: &Arc<ConnectionPool>,
        names: &[String],
    ) -> Result<Vec<Arc<dyn StorageTransformer>>, Error> {
        Self::select(&self.storage, pool, names)
    }

    fn select<T: ?Sized>(
        registered: &[(String, fn(Arc<ConnectionPool>) -> Arc<T>)],
        pool: &Arc<ConnectionPool>,
        names: &[String],
    ) -> Result<Vec<Arc<T>>, Error> {
        if names.is_empty() {
            return Ok(registered
                .iter()
                .map(|(_, init)| init(pool.clone()))
                .collect());
        }
        let mut selected = Vec::with_capacity(names.len());
        for name in names {
            match registered.iter().find(|(known, _)| known == name) {
                Some((_, init)) => selected.push(init(pool.clone())),
                None => bail!("no transformer registered under `{}`", name),
            }
        }
        Ok(selected)
    }
}

/// The transformers shipped with this binary. A deployment links its
/// transformer crates and registers them here.
pub fn builtin() -> TransformerRegistry {
    TransformerRegistry::new()
}
