//! Skill reference parsing.
//!
//! Parses references like `ghcr.io/acme/review:v1` into structured components.

use skr_core::error::{Result, SkrError};

use super::digest::Digest;

/// Default registry when none is specified.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when none is specified.
pub const DEFAULT_TAG: &str = "latest";

/// Parsed skill reference: `[host/]namespace/.../name[:tag|@digest]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillReference {
    /// Registry hostname (e.g., "ghcr.io", "localhost:5000")
    pub registry: String,
    /// Repository path (e.g., "acme/review")
    pub repository: String,
    /// Tag (e.g., "latest", "v1")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<Digest>,
}

impl SkillReference {
    /// Parse a reference string.
    ///
    /// Supports formats:
    /// - `review` → docker.io/review:latest
    /// - `acme/review:v1` → docker.io/acme/review:v1
    /// - `ghcr.io/acme/review:v1` → ghcr.io/acme/review:v1
    /// - `localhost:5000/review@sha256:…` → digest reference on a local registry
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(SkrError::InvalidReference("Empty reference".to_string()));
        }

        // Digest first (@ separator)
        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((name_tag, digest)) => (name_tag, Some(Digest::parse(digest)?)),
            None => (reference, None),
        };

        // Tag: a colon after the last slash
        let (name, tag) = split_repository_tag(name_tag);
        if let Some(tag) = tag {
            validate_tag(tag, reference)?;
        }

        let (registry, repository) = split_registry_repository(name, reference)?;

        let tag = match (tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (tag, _) => tag.map(str::to_string),
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(&digest.to_string());
        }
        s
    }
}

impl std::fmt::Display for SkillReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

/// Split `name[:tag]` on the last colon that follows the last slash.
///
/// `localhost:5000/review` has no tag; `localhost:5000/review:v1` has tag `v1`.
pub fn split_repository_tag(name_tag: &str) -> (&str, Option<&str>) {
    let after_slash = name_tag.rfind('/').map_or(0, |i| i + 1);
    match name_tag[after_slash..].rfind(':') {
        Some(colon) => {
            let at = after_slash + colon;
            (&name_tag[..at], Some(&name_tag[at + 1..]))
        }
        None => (name_tag, None),
    }
}

/// The tag suffix of a reference string, if any (digest references have none).
pub fn tag_of(reference: &str) -> Option<&str> {
    if reference.contains('@') {
        return None;
    }
    split_repository_tag(reference).1
}

fn validate_tag(tag: &str, reference: &str) -> Result<()> {
    let valid = !tag.is_empty()
        && tag.len() <= 128
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if valid {
        Ok(())
    } else {
        Err(SkrError::InvalidReference(format!(
            "Invalid tag '{}' in reference '{}'",
            tag, reference
        )))
    }
}

/// Split a name into registry and repository components.
fn split_registry_repository(name: &str, reference: &str) -> Result<(String, String)> {
    // A registry hostname contains a dot or colon, or is "localhost"
    let (registry, repository) = match name.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (first.to_string(), rest.to_string())
        }
        _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
    };

    let valid = !repository.is_empty()
        && repository.split('/').all(|component| {
            !component.is_empty()
                && component.chars().all(|c| {
                    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')
                })
        });
    if !valid {
        return Err(SkrError::InvalidReference(format!(
            "Invalid repository '{}' in reference '{}'",
            repository, reference
        )));
    }

    Ok((registry, repository))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:abcdef1234567890abcdef1234567890abcdef1234567890abcdef1234567890";

    #[test]
    fn test_parse_simple_name() {
        let r = SkillReference::parse("review").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "review");
        assert_eq!(r.tag, Some("latest".to_string()));
        assert_eq!(r.digest, None);
    }

    #[test]
    fn test_parse_name_with_tag() {
        let r = SkillReference::parse("review:1.25").unwrap();
        assert_eq!(r.repository, "review");
        assert_eq!(r.tag, Some("1.25".to_string()));
    }

    #[test]
    fn test_parse_custom_registry() {
        let r = SkillReference::parse("ghcr.io/acme/review:v0.1.0").unwrap();
        assert_eq!(r.registry, "ghcr.io");
        assert_eq!(r.repository, "acme/review");
        assert_eq!(r.tag, Some("v0.1.0".to_string()));
    }

    #[test]
    fn test_parse_custom_registry_no_tag() {
        let r = SkillReference::parse("ghcr.io/acme/review").unwrap();
        assert_eq!(r.tag, Some("latest".to_string()));
    }

    #[test]
    fn test_parse_digest_only() {
        let r = SkillReference::parse(&format!("ghcr.io/acme/review@{}", DIGEST)).unwrap();
        assert_eq!(r.repository, "acme/review");
        assert_eq!(r.tag, None);
        assert_eq!(r.digest.unwrap().to_string(), DIGEST);
    }

    #[test]
    fn test_parse_tag_and_digest() {
        let r = SkillReference::parse(&format!("ghcr.io/acme/review:v1@{}", DIGEST)).unwrap();
        assert_eq!(r.tag, Some("v1".to_string()));
        assert!(r.digest.is_some());
    }

    #[test]
    fn test_parse_registry_with_port() {
        let r = SkillReference::parse("localhost:5000/review:v1").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "review");
        assert_eq!(r.tag, Some("v1".to_string()));

        let r = SkillReference::parse("localhost:5000/review").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.tag, Some("latest".to_string()));
    }

    #[test]
    fn test_deep_repository_path() {
        let r = SkillReference::parse("ghcr.io/org/sub/review:v1").unwrap();
        assert_eq!(r.repository, "org/sub/review");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(SkillReference::parse("").is_err());
        assert!(SkillReference::parse("review@invaliddigest").is_err());
        assert!(SkillReference::parse("Review:v1").is_err());
        assert!(SkillReference::parse("review:").is_err());
        assert!(SkillReference::parse("ghcr.io/").is_err());
        assert!(SkillReference::parse("acme//review").is_err());
    }

    #[test]
    fn test_full_reference_and_display() {
        let r = SkillReference::parse("ghcr.io/acme/review:v1").unwrap();
        assert_eq!(r.full_reference(), "ghcr.io/acme/review:v1");
        let r = SkillReference::parse("review:1.25").unwrap();
        assert_eq!(format!("{}", r), "docker.io/review:1.25");
    }

    #[test]
    fn test_split_repository_tag() {
        assert_eq!(split_repository_tag("review:v1"), ("review", Some("v1")));
        assert_eq!(
            split_repository_tag("localhost:5000/review"),
            ("localhost:5000/review", None)
        );
        assert_eq!(
            split_repository_tag("ghcr.io/acme/review:latest"),
            ("ghcr.io/acme/review", Some("latest"))
        );
    }

    #[test]
    fn test_tag_of() {
        assert_eq!(tag_of("review:latest"), Some("latest"));
        assert_eq!(tag_of("review"), None);
        assert_eq!(tag_of(&format!("review@{}", DIGEST)), None);
    }
}
