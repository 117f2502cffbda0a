use std::fmt;

use serde::Serialize;

/// A single installed build: product name plus the version string the
/// registry knows it by. Versions are compared as exact strings only.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize)]
pub struct ProductVersion {
    pub product: String,
    pub version: String,
}

impl ProductVersion {
    pub fn new(product: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            product: product.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ProductVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.product, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let pv = ProductVersion::new("afw", "19.0.0+3");
        assert_eq!(pv.to_string(), "afw 19.0.0+3");
    }

    #[test]
    fn test_ordering_is_by_product_then_version() {
        let mut pvs = vec![
            ProductVersion::new("daf_butler", "2.0"),
            ProductVersion::new("afw", "2.0"),
            ProductVersion::new("afw", "10.0"),
        ];
        pvs.sort();
        assert_eq!(pvs[0], ProductVersion::new("afw", "10.0"));
        assert_eq!(pvs[2].product, "daf_butler");
    }
}
