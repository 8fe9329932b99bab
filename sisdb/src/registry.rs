//! The schema registry: one [`EntityType`] per schema of the data service.

use crate::config::SisDbConfig;
use crate::error::{SisDbError, SisDbResult};
use crate::schema::EntityType;
use sisdb_client::{ClientError, QueryParams, SchemaDescriptor, SisClient};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, info};

/// Registry state shared (weakly) with the entity types it owns, so that
/// reference fields can find their target type at coercion time.
pub(crate) struct Catalog {
    client: Rc<dyn SisClient>,
    config: SisDbConfig,
    types: RefCell<BTreeMap<String, Rc<EntityType>>>,
}

impl Catalog {
    pub(crate) fn config(&self) -> &SisDbConfig {
        &self.config
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<Rc<EntityType>> {
        self.types.borrow().get(name).cloned()
    }
}

/// A connection to the data service together with the compiled schemas.
///
/// ```ignore
/// let db = SisDb::connect(Rc::new(MemoryClient::new()))?;
/// let hosts = db.entity_type("hosts")?;
/// let mut host = hosts.new_entity();
/// host.set("hostname", "a.example.com")?;
/// host.save()?;
/// ```
#[derive(Clone)]
pub struct SisDb {
    catalog: Rc<Catalog>,
}

impl SisDb {
    /// Connects with the default configuration.
    pub fn connect(client: Rc<dyn SisClient>) -> SisDbResult<Self> {
        Self::connect_with_config(client, SisDbConfig::default())
    }

    /// Checks the service's API version and, unless disabled, pulls the
    /// schema list.
    pub fn connect_with_config(client: Rc<dyn SisClient>, config: SisDbConfig) -> SisDbResult<Self> {
        let version = client.version();
        if version < config.min_api_version {
            return Err(SisDbError::UnsupportedVersion {
                found: version,
                required: config.min_api_version,
            });
        }
        let refresh = config.refresh_on_connect;
        let db = Self {
            catalog: Rc::new(Catalog {
                client,
                config,
                types: RefCell::new(BTreeMap::new()),
            }),
        };
        info!(%version, "connected to data service");
        if refresh {
            db.refresh()?;
        }
        Ok(db)
    }

    pub fn client(&self) -> &Rc<dyn SisClient> {
        &self.catalog.client
    }

    pub fn config(&self) -> &SisDbConfig {
        &self.catalog.config
    }

    /// Synchronizes with every schema of the data service.
    pub fn refresh(&self) -> SisDbResult<()> {
        self.refresh_with(None)
    }

    /// Synchronizes with the schemas selected by `params`. Types whose
    /// schema is no longer listed are dropped, new schemas get a type and
    /// known ones are reconciled in place.
    pub fn refresh_with(&self, params: Option<&QueryParams>) -> SisDbResult<()> {
        let descriptors = self.catalog.client.schemas().fetch_all(params)?;
        let listed: BTreeSet<&str> = descriptors.iter().map(|d| d.name.as_str()).collect();

        let removed: Vec<String> = {
            let mut types = self.catalog.types.borrow_mut();
            let gone: Vec<String> = types
                .keys()
                .filter(|name| !listed.contains(name.as_str()))
                .cloned()
                .collect();
            for name in &gone {
                types.remove(name);
            }
            gone
        };
        for name in &removed {
            info!(schema = %name, "schema removed");
        }

        let count = descriptors.len();
        for descriptor in descriptors {
            self.install(descriptor)?;
        }
        info!(schemas = count, removed = removed.len(), "schema registry refreshed");
        Ok(())
    }

    /// Installs a type for `descriptor`, or reconciles the existing one.
    fn install(&self, descriptor: SchemaDescriptor) -> SisDbResult<Rc<EntityType>> {
        if let Some(existing) = self.catalog.lookup(&descriptor.name) {
            let diff = existing.reconcile(descriptor)?;
            if !diff.is_empty() {
                info!(
                    schema = existing.name(),
                    added = ?diff.added,
                    removed = ?diff.removed,
                    changed = ?diff.changed,
                    "schema redefined"
                );
            }
            return Ok(existing);
        }

        let name = descriptor.name.clone();
        let entity_type = EntityType::root(
            descriptor,
            Rc::downgrade(&self.catalog),
            Rc::clone(&self.catalog.client),
        )?;
        self.catalog
            .types
            .borrow_mut()
            .insert(name.clone(), Rc::clone(&entity_type));
        info!(schema = %name, "schema added");
        Ok(entity_type)
    }

    /// Names of the known schemas, sorted.
    pub fn available_schemas(&self) -> Vec<String> {
        self.catalog.types.borrow().keys().cloned().collect()
    }

    /// The type of the schema called `name`.
    pub fn entity_type(&self, name: &str) -> SisDbResult<Rc<EntityType>> {
        self.get(name)
            .ok_or_else(|| SisDbError::UnknownSchema(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<Rc<EntityType>> {
        self.catalog.lookup(name)
    }

    /// Pushes a schema to the schema service and installs the stored result.
    ///
    /// Known schemas are updated and unknown ones created; a create that
    /// finds the schema already present remotely falls back to an update.
    /// Pushing a descriptor identical to the local one does nothing.
    pub fn update_schema(&self, descriptor: SchemaDescriptor) -> SisDbResult<Rc<EntityType>> {
        let schemas = self.catalog.client.schemas();
        let stored = match self.catalog.lookup(&descriptor.name) {
            Some(existing) if existing.descriptor() == descriptor => {
                debug!(schema = existing.name(), "schema unchanged");
                return Ok(existing);
            }
            Some(_) => schemas.update(&descriptor.name, &descriptor)?,
            None => match schemas.create(&descriptor) {
                Err(ClientError::Conflict(_)) => schemas.update(&descriptor.name, &descriptor)?,
                other => other?,
            },
        };
        self.install(stored)
    }

    /// Deletes a schema remotely and drops its local type.
    pub fn delete_schema(&self, name: &str) -> SisDbResult<()> {
        self.catalog.client.schemas().delete(name)?;
        self.catalog.types.borrow_mut().remove(name);
        info!(schema = name, "schema deleted");
        Ok(())
    }
}

impl fmt::Debug for SisDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SisDb")
            .field("version", &self.catalog.client.version())
            .field("config", &self.catalog.config)
            .field("schemas", &self.available_schemas())
            .finish()
    }
}
