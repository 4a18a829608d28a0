//! Class descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The runtime type of an entity: a namespace URI and a local name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassDescriptor {
    /// Namespace URI of the metamodel declaring the class.
    pub uri: String,
    /// Local name of the class.
    pub name: String,
}

impl ClassDescriptor {
    /// Creates a class descriptor.
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.uri, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_uri_and_name() {
        let class = ClassDescriptor::new("http://shapes", "Circle");
        assert_eq!(class.to_string(), "http://shapes#Circle");
    }
}
