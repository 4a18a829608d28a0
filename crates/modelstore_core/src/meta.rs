//! Metamodel description consumed by the engine.
//!
//! The engine never owns a type system. Callers describe their classes
//! through [`MetaModel`]; [`MetaModelRegistry`] is a ready-made explicit
//! implementation.

use crate::class::ClassDescriptor;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Single- or many-valued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Multiplicity {
    /// At most one value.
    Single,
    /// An ordered sequence of values.
    Many,
}

/// What a feature holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    /// Scalar attribute values.
    Attribute(Multiplicity),
    /// References to other entities.
    Reference {
        /// Single or many.
        multiplicity: Multiplicity,
        /// Whether the referenced entities are contained by the owner.
        containment: bool,
    },
}

/// A named, typed feature of a class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeatureDescriptor {
    /// Feature name, unique within its class hierarchy.
    pub name: String,
    /// Feature kind.
    pub kind: FeatureKind,
}

impl FeatureDescriptor {
    /// Creates an attribute feature.
    pub fn attribute(name: impl Into<String>, multiplicity: Multiplicity) -> Self {
        Self {
            name: name.into(),
            kind: FeatureKind::Attribute(multiplicity),
        }
    }

    /// Creates a non-containment reference feature.
    pub fn reference(name: impl Into<String>, multiplicity: Multiplicity) -> Self {
        Self {
            name: name.into(),
            kind: FeatureKind::Reference {
                multiplicity,
                containment: false,
            },
        }
    }

    /// Creates a containment reference feature.
    pub fn containment(name: impl Into<String>, multiplicity: Multiplicity) -> Self {
        Self {
            name: name.into(),
            kind: FeatureKind::Reference {
                multiplicity,
                containment: true,
            },
        }
    }

    /// Returns the multiplicity.
    #[must_use]
    pub const fn multiplicity(&self) -> Multiplicity {
        match self.kind {
            FeatureKind::Attribute(m) | FeatureKind::Reference { multiplicity: m, .. } => m,
        }
    }

    /// Returns `true` for many-valued features.
    #[must_use]
    pub const fn is_many(&self) -> bool {
        matches!(self.multiplicity(), Multiplicity::Many)
    }

    /// Returns `true` for reference features.
    #[must_use]
    pub const fn is_reference(&self) -> bool {
        matches!(self.kind, FeatureKind::Reference { .. })
    }

    /// Returns `true` for containment references.
    #[must_use]
    pub const fn is_containment(&self) -> bool {
        matches!(
            self.kind,
            FeatureKind::Reference {
                containment: true,
                ..
            }
        )
    }
}

/// The type-system collaborator.
pub trait MetaModel: Send + Sync {
    /// Returns `true` if `class` is known.
    fn contains_class(&self, class: &ClassDescriptor) -> bool;

    /// Returns `true` if `class` is abstract (or an interface).
    fn is_abstract(&self, class: &ClassDescriptor) -> bool;

    /// Returns every feature of `class`, inherited ones included.
    fn features(&self, class: &ClassDescriptor) -> Vec<FeatureDescriptor>;

    /// Returns the transitive subtypes of `class`, excluding `class` itself.
    fn subtypes(&self, class: &ClassDescriptor) -> BTreeSet<ClassDescriptor>;

    /// Looks up one feature of `class` by name.
    fn feature(&self, class: &ClassDescriptor, name: &str) -> Option<FeatureDescriptor> {
        self.features(class).into_iter().find(|f| f.name == name)
    }
}

/// Declaration of one class.
///
/// # Example
///
/// ```rust
/// use modelstore_core::{ClassDescriptor, ClassInfo, FeatureDescriptor, Multiplicity};
///
/// let shape = ClassDescriptor::new("http://shapes", "Shape");
/// let circle = ClassInfo::new(ClassDescriptor::new("http://shapes", "Circle"))
///     .extends(shape)
///     .feature(FeatureDescriptor::attribute("radius", Multiplicity::Single));
/// assert_eq!(circle.declared_features().len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct ClassInfo {
    descriptor: ClassDescriptor,
    is_abstract: bool,
    supertypes: Vec<ClassDescriptor>,
    features: Vec<FeatureDescriptor>,
}

impl ClassInfo {
    /// Declares a concrete class with no supertypes or features.
    #[must_use]
    pub fn new(descriptor: ClassDescriptor) -> Self {
        Self {
            descriptor,
            is_abstract: false,
            supertypes: Vec::new(),
            features: Vec::new(),
        }
    }

    /// Marks the class abstract.
    #[must_use]
    pub fn abstract_class(mut self, value: bool) -> Self {
        self.is_abstract = value;
        self
    }

    /// Adds a direct supertype.
    #[must_use]
    pub fn extends(mut self, supertype: ClassDescriptor) -> Self {
        self.supertypes.push(supertype);
        self
    }

    /// Declares a feature.
    #[must_use]
    pub fn feature(mut self, feature: FeatureDescriptor) -> Self {
        self.features.push(feature);
        self
    }

    /// Returns the class descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &ClassDescriptor {
        &self.descriptor
    }

    /// Returns the features declared directly on this class.
    #[must_use]
    pub fn declared_features(&self) -> &[FeatureDescriptor] {
        &self.features
    }
}

/// An explicit, caller-owned metamodel.
#[derive(Debug, Clone, Default)]
pub struct MetaModelRegistry {
    classes: BTreeMap<ClassDescriptor, ClassInfo>,
}

impl MetaModelRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a class, replacing any previous declaration.
    pub fn register(&mut self, info: ClassInfo) -> &mut Self {
        self.classes.insert(info.descriptor.clone(), info);
        self
    }

    /// Registers a class, builder style.
    #[must_use]
    pub fn with(mut self, info: ClassInfo) -> Self {
        self.register(info);
        self
    }

    /// Returns every registered class.
    pub fn classes(&self) -> impl Iterator<Item = &ClassDescriptor> {
        self.classes.keys()
    }

    /// Returns the declaration of a class.
    #[must_use]
    pub fn get(&self, class: &ClassDescriptor) -> Option<&ClassInfo> {
        self.classes.get(class)
    }
}

impl MetaModel for MetaModelRegistry {
    fn contains_class(&self, class: &ClassDescriptor) -> bool {
        self.classes.contains_key(class)
    }

    fn is_abstract(&self, class: &ClassDescriptor) -> bool {
        self.classes.get(class).is_some_and(|c| c.is_abstract)
    }

    fn features(&self, class: &ClassDescriptor) -> Vec<FeatureDescriptor> {
        // Supertypes first, then own features; first declaration of a name wins
        let mut order = Vec::new();
        let mut visited = BTreeSet::new();
        let mut stack = vec![(class.clone(), false)];
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                order.push(current);
                continue;
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            stack.push((current.clone(), true));
            if let Some(info) = self.classes.get(&current) {
                for supertype in info.supertypes.iter().rev() {
                    stack.push((supertype.clone(), false));
                }
            }
        }

        let mut seen = BTreeSet::new();
        order
            .iter()
            .filter_map(|c| self.classes.get(c))
            .flat_map(|info| info.features.iter())
            .filter(|f| seen.insert(f.name.clone()))
            .cloned()
            .collect()
    }

    fn subtypes(&self, class: &ClassDescriptor) -> BTreeSet<ClassDescriptor> {
        let mut result = BTreeSet::new();
        let mut queue = VecDeque::from([class.clone()]);
        while let Some(current) = queue.pop_front() {
            for info in self.classes.values() {
                if info.supertypes.contains(&current)
                    && info.descriptor != *class
                    && result.insert(info.descriptor.clone())
                {
                    queue.push_back(info.descriptor.clone());
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(name: &str) -> ClassDescriptor {
        ClassDescriptor::new("http://shapes", name)
    }

    fn shapes() -> MetaModelRegistry {
        MetaModelRegistry::new()
            .with(
                ClassInfo::new(class("Shape"))
                    .abstract_class(true)
                    .feature(FeatureDescriptor::attribute("name", Multiplicity::Single)),
            )
            .with(
                ClassInfo::new(class("Circle"))
                    .extends(class("Shape"))
                    .feature(FeatureDescriptor::attribute("radius", Multiplicity::Single)),
            )
            .with(ClassInfo::new(class("Square")).extends(class("Shape")))
            .with(ClassInfo::new(class("Disc")).extends(class("Circle")))
    }

    #[test]
    fn subtypes_are_transitive() {
        let meta = shapes();
        let subs = meta.subtypes(&class("Shape"));
        assert_eq!(
            subs,
            BTreeSet::from([class("Circle"), class("Square"), class("Disc")])
        );
        assert!(meta.subtypes(&class("Square")).is_empty());
    }

    #[test]
    fn features_include_inherited() {
        let meta = shapes();
        let names: Vec<_> = meta
            .features(&class("Disc"))
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["name".to_string(), "radius".to_string()]);
        assert!(meta.feature(&class("Square"), "name").is_some());
        assert!(meta.feature(&class("Square"), "radius").is_none());
    }

    #[test]
    fn abstract_flag() {
        let meta = shapes();
        assert!(meta.is_abstract(&class("Shape")));
        assert!(!meta.is_abstract(&class("Circle")));
        assert!(!meta.is_abstract(&class("Unknown")));
    }

    #[test]
    fn cyclic_hierarchy_terminates() {
        let meta = MetaModelRegistry::new()
            .with(ClassInfo::new(class("A")).extends(class("B")))
            .with(ClassInfo::new(class("B")).extends(class("A")));
        assert_eq!(meta.subtypes(&class("A")), BTreeSet::from([class("B")]));
        assert!(meta.features(&class("A")).is_empty());
    }

    #[test]
    fn descriptor_kinds() {
        let children = FeatureDescriptor::containment("children", Multiplicity::Many);
        assert!(children.is_many());
        assert!(children.is_containment());
        let owner = FeatureDescriptor::reference("owner", Multiplicity::Single);
        assert!(owner.is_reference());
        assert!(!owner.is_containment());
    }
}
