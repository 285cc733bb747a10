use dockyard_core::{Error, Result};

/// A content-addressable digest (e.g., "sha256:abc123...")
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    algorithm: String,
    hash: String,
}

impl Digest {
    /// Parse a digest string in format "algorithm:hash"
    pub fn parse(digest: &str) -> Result<Self> {
        let (algorithm, hash) = digest
            .trim()
            .split_once(':')
            .filter(|(a, h)| !a.is_empty() && !h.is_empty())
            .ok_or_else(|| {
                Error::Build(format!(
                    "Invalid digest format (expected 'algorithm:hash'): {}",
                    digest
                ))
            })?;

        Ok(Self {
            algorithm: algorithm.to_string(),
            hash: hash.to_string(),
        })
    }

    /// Pick the digest out of a push status line such as
    /// `latest: digest: sha256:abc... size: 1234`.
    pub fn from_push_status(status: &str) -> Option<Self> {
        let (_, rest) = status.split_once("digest:")?;
        let candidate = rest.split_whitespace().next()?;
        Self::parse(candidate).ok()
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_digest() {
        let digest = Digest::parse("sha256:abc123").unwrap();
        assert_eq!(digest.algorithm(), "sha256");
        assert_eq!(digest.hash(), "abc123");
        assert_eq!(digest.to_string(), "sha256:abc123");
    }

    #[test]
    fn test_parse_invalid_digest() {
        assert!(Digest::parse("invalid").is_err());
        assert!(Digest::parse("").is_err());
        assert!(Digest::parse("sha256:").is_err());
    }

    #[test]
    fn test_from_push_status() {
        let digest =
            Digest::from_push_status("42: digest: sha256:0a1b2c size: 1573").unwrap();
        assert_eq!(digest.to_string(), "sha256:0a1b2c");

        assert!(Digest::from_push_status("Pushed").is_none());
        assert!(Digest::from_push_status("Layer already exists").is_none());
    }
}
