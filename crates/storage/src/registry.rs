//! Class registry
//!
//! Maps class names to the small integer ids persisted in the store and
//! holds the factory that materializes instances of each class.
//!
//! The registry is seeded with the schemas compiled into this process.
//! Persisted [`ClassRecord`]s are installed at startup; ids whose class is
//! absent from the local schema stay resolvable for placeholder allocation
//! but report [`Error::UnknownClass`] on lookup.

use crate::object::DomainObject;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use versa_core::{
    ClassId, ClassRecord, CommitNumber, Error, Oid, Result, ROOT_CLASS_ID, ROOT_CLASS_NAME,
};

/// Builds the in-memory instance for an oid
///
/// The second argument is the base commit number for the instance's boxes.
pub type ObjectFactory = Arc<dyn Fn(Oid, CommitNumber) -> DomainObject + Send + Sync>;

/// Class as declared by the application
#[derive(Clone)]
pub struct ClassSchema {
    name: String,
    attributes: Vec<String>,
    factory: Option<ObjectFactory>,
}

impl ClassSchema {
    /// Declare a class
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            factory: None,
        }
    }

    /// Declare an attribute whose box is created with every instance
    pub fn attribute(mut self, name: impl Into<String>) -> Self {
        self.attributes.push(name.into());
        self
    }

    /// Replace the default factory
    pub fn factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(Oid, CommitNumber) -> DomainObject + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Class name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared attributes
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }
}

impl fmt::Debug for ClassSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassSchema")
            .field("name", &self.name)
            .field("attributes", &self.attributes)
            .field("custom_factory", &self.factory.is_some())
            .finish()
    }
}

/// Registered class: schema plus its persisted id
pub struct ClassEntry {
    name: String,
    id: ClassId,
    factory: ObjectFactory,
}

impl ClassEntry {
    fn from_schema(schema: &ClassSchema, id: ClassId) -> Self {
        let factory = match &schema.factory {
            Some(factory) => Arc::clone(factory),
            None => {
                let attributes = schema.attributes.clone();
                Arc::new(move |oid, base| {
                    DomainObject::with_attributes(oid, base, attributes.iter().cloned())
                }) as ObjectFactory
            }
        };
        Self {
            name: schema.name.clone(),
            id,
            factory,
        }
    }

    /// Class name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Persisted class id
    pub fn id(&self) -> ClassId {
        self.id
    }

    /// Materialize an instance
    pub fn instantiate(&self, oid: Oid, base: CommitNumber) -> DomainObject {
        (self.factory)(oid, base)
    }
}

impl fmt::Debug for ClassEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassEntry")
            .field("name", &self.name)
            .field("id", &self.id)
            .finish()
    }
}

#[derive(Default)]
struct Installed {
    by_id: FxHashMap<ClassId, Arc<ClassEntry>>,
    by_name: FxHashMap<String, Arc<ClassEntry>>,
    /// Persisted ids with no local schema
    foreign: FxHashMap<ClassId, String>,
}

/// Class id assignments known to this process
pub struct ClassRegistry {
    schemas: Vec<ClassSchema>,
    installed: RwLock<Installed>,
}

impl ClassRegistry {
    /// Create a registry for the given schema
    ///
    /// The root class is always installed with id 0.
    pub fn new(schemas: Vec<ClassSchema>) -> Self {
        let mut installed = Installed::default();
        let root = Arc::new(ClassEntry::from_schema(
            &ClassSchema::new(ROOT_CLASS_NAME),
            ROOT_CLASS_ID,
        ));
        installed.by_id.insert(ROOT_CLASS_ID, Arc::clone(&root));
        installed.by_name.insert(ROOT_CLASS_NAME.to_string(), root);
        Self {
            schemas: schemas
                .into_iter()
                .filter(|schema| schema.name != ROOT_CLASS_NAME)
                .collect(),
            installed: RwLock::new(installed),
        }
    }

    /// Install a persisted id assignment
    ///
    /// Returns the entry when the class is part of the local schema. Records
    /// for the root class are ignored.
    pub fn install(&self, record: &ClassRecord) -> Option<Arc<ClassEntry>> {
        if record.class_id == ROOT_CLASS_ID {
            return None;
        }
        let mut installed = self.installed.write();
        if let Some(existing) = installed.by_id.get(&record.class_id) {
            return Some(Arc::clone(existing));
        }
        match self.schemas.iter().find(|schema| schema.name == record.class_name) {
            Some(schema) => {
                let entry = Arc::new(ClassEntry::from_schema(schema, record.class_id));
                installed.by_id.insert(record.class_id, Arc::clone(&entry));
                installed.by_name.insert(schema.name.clone(), Arc::clone(&entry));
                Some(entry)
            }
            None => {
                tracing::debug!(
                    class_id = %record.class_id,
                    class_name = %record.class_name,
                    "Persisted class is not part of the local schema"
                );
                installed
                    .foreign
                    .insert(record.class_id, record.class_name.clone());
                None
            }
        }
    }

    /// Declared classes that have no persisted id yet, in declaration order
    pub fn unregistered(&self) -> Vec<String> {
        let installed = self.installed.read();
        self.schemas
            .iter()
            .filter(|schema| !installed.by_name.contains_key(&schema.name))
            .map(|schema| schema.name.clone())
            .collect()
    }

    /// True when `id` is installed or known as a persisted foreign class
    pub fn is_known(&self, id: ClassId) -> bool {
        let installed = self.installed.read();
        installed.by_id.contains_key(&id) || installed.foreign.contains_key(&id)
    }

    /// Highest id known, persisted or local
    pub fn max_class_id(&self) -> ClassId {
        let installed = self.installed.read();
        installed
            .by_id
            .keys()
            .chain(installed.foreign.keys())
            .copied()
            .max()
            .unwrap_or(ROOT_CLASS_ID)
    }

    /// Look up a class by name
    pub fn by_name(&self, name: &str) -> Result<Arc<ClassEntry>> {
        self.installed
            .read()
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownClass(name.to_string()))
    }

    /// Look up a class by id
    pub fn by_id(&self, id: ClassId) -> Result<Arc<ClassEntry>> {
        let installed = self.installed.read();
        if let Some(entry) = installed.by_id.get(&id) {
            return Ok(Arc::clone(entry));
        }
        Err(Error::UnknownClass(match installed.foreign.get(&id) {
            Some(name) => format!("{} (id {})", name, id),
            None => format!("id {}", id),
        }))
    }

    /// Materialize an instance for `oid`
    ///
    /// Ids without a local class get a plain instance with no declared slots.
    pub fn instantiate(&self, oid: Oid, base: CommitNumber) -> DomainObject {
        let entry = self.installed.read().by_id.get(&oid.class_id()).cloned();
        match entry {
            Some(entry) => entry.instantiate(oid, base),
            None => DomainObject::new(oid, base),
        }
    }

    /// All installed local classes, by id
    pub fn records(&self) -> Vec<ClassRecord> {
        let mut records: Vec<ClassRecord> = self
            .installed
            .read()
            .by_id
            .values()
            .map(|entry| ClassRecord::new(entry.name.clone(), entry.id))
            .collect();
        records.sort_by_key(|record| record.class_id);
        records
    }
}

impl fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassRegistry")
            .field("schemas", &self.schemas.len())
            .field("installed", &self.installed.read().by_id.len())
            .finish()
    }
}
