//! Mapper fixtures and a sample metamodel.
//!
//! Every fixture owns its temporary directory, so file-backed stores are
//! cleaned up when the fixture is dropped.

use modelstore_core::{
    BackendConfig, CacheConfig, ClassDescriptor, ClassInfo, DataMapper, EncodingKind,
    FeatureCachingMapper, FeatureDescriptor, GraphBackend, KvBackend, MetaModelRegistry,
    ModelStore, Multiplicity, StoreConfig,
};
use modelstore_storage::{LogStore, LogStoreOptions};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// The mapper configurations exercised by conformance tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapperFlavor {
    /// [`KvBackend`] over a `MemoryStore`.
    Memory(EncodingKind),
    /// [`KvBackend`] over a `LogStore` in a temporary directory.
    Log(EncodingKind),
    /// [`GraphBackend`] over a fresh graph.
    Graph,
    /// [`FeatureCachingMapper`] around an in-memory [`KvBackend`].
    Cached(EncodingKind),
}

impl MapperFlavor {
    /// Returns every flavour.
    #[must_use]
    pub fn all() -> Vec<Self> {
        let mut flavors = Vec::new();
        for encoding in EncodingKind::ALL {
            flavors.push(Self::Memory(encoding));
            flavors.push(Self::Log(encoding));
            flavors.push(Self::Cached(encoding));
        }
        flavors.push(Self::Graph);
        flavors
    }
}

impl fmt::Display for MapperFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory(e) => write!(f, "memory/{e}"),
            Self::Log(e) => write!(f, "log/{e}"),
            Self::Graph => write!(f, "graph"),
            Self::Cached(e) => write!(f, "cached/{e}"),
        }
    }
}

/// A mapper with automatic cleanup.
pub struct TestMapper {
    /// The mapper instance.
    pub mapper: Box<dyn DataMapper>,
    /// The flavour it was opened with.
    pub flavor: MapperFlavor,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestMapper {
    /// Opens a mapper of the given flavour.
    pub fn open(flavor: MapperFlavor) -> Self {
        let mut temp_dir = None;
        let mapper: Box<dyn DataMapper> = match flavor {
            MapperFlavor::Memory(encoding) => Box::new(memory_backend(encoding)),
            MapperFlavor::Log(encoding) => {
                let dir = TempDir::new().expect("Failed to create temp directory");
                let backend = log_backend(&dir.path().join("model.log"), encoding);
                temp_dir = Some(dir);
                Box::new(backend)
            }
            MapperFlavor::Graph => Box::new(GraphBackend::in_memory()),
            MapperFlavor::Cached(encoding) => Box::new(FeatureCachingMapper::new(
                memory_backend(encoding),
                CacheConfig::default(),
            )),
        };
        Self {
            mapper,
            flavor,
            _temp_dir: temp_dir,
        }
    }
}

impl TestMapper {
    /// Wraps the mapper in a [`ModelStore`] described by `model`.
    pub fn into_store(self, model: &SampleModel) -> TestStore {
        TestStore {
            store: model.store(self.mapper),
            flavor: self.flavor,
            _temp_dir: self._temp_dir,
        }
    }
}

impl std::ops::Deref for TestMapper {
    type Target = dyn DataMapper;

    fn deref(&self) -> &Self::Target {
        self.mapper.as_ref()
    }
}

/// A store façade with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: ModelStore<Box<dyn DataMapper>>,
    /// The flavour of the underlying mapper.
    pub flavor: MapperFlavor,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl std::ops::Deref for TestStore {
    type Target = ModelStore<Box<dyn DataMapper>>;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Opens an in-memory key-value backend.
pub fn memory_backend(encoding: EncodingKind) -> KvBackend {
    KvBackend::in_memory(BackendConfig::new().encoding(encoding))
        .expect("Failed to open in-memory backend")
}

/// Opens (or creates) a key-value backend on a log file.
pub fn log_backend(path: &Path, encoding: EncodingKind) -> KvBackend {
    let store = LogStore::open(path, LogStoreOptions::default()).expect("Failed to open log store");
    KvBackend::open(Arc::new(store), BackendConfig::new().encoding(encoding))
        .expect("Failed to open log backend")
}

/// Runs `f` once for every mapper flavour.
pub fn for_each_mapper<F>(mut f: F)
where
    F: FnMut(MapperFlavor, &dyn DataMapper),
{
    for flavor in MapperFlavor::all() {
        let test_mapper = TestMapper::open(flavor);
        f(flavor, &*test_mapper);
    }
}

/// Runs `f` once for every mapper flavour, wrapped in a store described
/// by `model`.
pub fn for_each_store<F>(model: &SampleModel, mut f: F)
where
    F: FnMut(MapperFlavor, &ModelStore<Box<dyn DataMapper>>),
{
    for flavor in MapperFlavor::all() {
        let test_store = TestMapper::open(flavor).into_store(model);
        f(flavor, &test_store);
    }
}

/// Runs `f` with a log file path inside a temporary directory.
pub fn with_log_path<F, R>(f: F) -> R
where
    F: FnOnce(&Path) -> R,
{
    let dir = TempDir::new().expect("Failed to create temp directory");
    let path: PathBuf = dir.path().join("model.log");
    f(&path)
}

/// Descriptors of the sample metamodel.
///
/// - `Element` (abstract) declares `name`
/// - `Shape` extends `Element`; `Circle` and `Square` extend `Shape`
/// - `Folder` extends `Element` and contains `children` (many) and
///   `root` (single); it also holds `tags` and a `link` reference
#[derive(Debug, Clone)]
pub struct SampleModel {
    /// Abstract root class.
    pub element: ClassDescriptor,
    /// Concrete shape.
    pub shape: ClassDescriptor,
    /// Subtype of shape.
    pub circle: ClassDescriptor,
    /// Subtype of shape.
    pub square: ClassDescriptor,
    /// Container class.
    pub folder: ClassDescriptor,
    /// Single attribute.
    pub name: FeatureDescriptor,
    /// Many attribute.
    pub tags: FeatureDescriptor,
    /// Single non-containment reference.
    pub link: FeatureDescriptor,
    /// Many containment reference.
    pub children: FeatureDescriptor,
    /// Single containment reference.
    pub root: FeatureDescriptor,
}

impl SampleModel {
    /// Builds the descriptors.
    #[must_use]
    pub fn new() -> Self {
        let class = |name: &str| ClassDescriptor::new("urn:modelstore:sample", name);
        Self {
            element: class("Element"),
            shape: class("Shape"),
            circle: class("Circle"),
            square: class("Square"),
            folder: class("Folder"),
            name: FeatureDescriptor::attribute("name", Multiplicity::Single),
            tags: FeatureDescriptor::attribute("tags", Multiplicity::Many),
            link: FeatureDescriptor::reference("link", Multiplicity::Single),
            children: FeatureDescriptor::containment("children", Multiplicity::Many),
            root: FeatureDescriptor::containment("root", Multiplicity::Single),
        }
    }

    /// Builds the registry describing the sample classes.
    #[must_use]
    pub fn registry(&self) -> MetaModelRegistry {
        MetaModelRegistry::new()
            .with(
                ClassInfo::new(self.element.clone())
                    .abstract_class(true)
                    .feature(self.name.clone()),
            )
            .with(ClassInfo::new(self.shape.clone()).extends(self.element.clone()))
            .with(ClassInfo::new(self.circle.clone()).extends(self.shape.clone()))
            .with(ClassInfo::new(self.square.clone()).extends(self.shape.clone()))
            .with(
                ClassInfo::new(self.folder.clone())
                    .extends(self.element.clone())
                    .feature(self.tags.clone())
                    .feature(self.link.clone())
                    .feature(self.children.clone())
                    .feature(self.root.clone()),
            )
    }

    /// Opens a store over `mapper` described by this model.
    pub fn store<M: DataMapper>(&self, mapper: M) -> ModelStore<M> {
        ModelStore::new(mapper, Arc::new(self.registry()), StoreConfig::default())
    }
}

impl Default for SampleModel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_flavor_opens() {
        let flavors = MapperFlavor::all();
        assert_eq!(flavors.len(), 10);
        for flavor in flavors {
            let mapper = TestMapper::open(flavor);
            assert!(!mapper.is_closed(), "{flavor}");
            assert_eq!(mapper.flavor, flavor);
        }
    }

    #[test]
    fn flavor_names() {
        assert_eq!(MapperFlavor::Memory(EncodingKind::List).to_string(), "memory/list");
        assert_eq!(MapperFlavor::Graph.to_string(), "graph");
    }

    #[test]
    fn sample_registry_hierarchy() {
        use modelstore_core::MetaModel;

        let model = SampleModel::new();
        let registry = model.registry();
        assert!(registry.is_abstract(&model.element));
        assert_eq!(
            registry.subtypes(&model.shape),
            [model.circle.clone(), model.square.clone()].into_iter().collect()
        );
        assert!(registry.feature(&model.folder, "name").is_some());
    }
}
