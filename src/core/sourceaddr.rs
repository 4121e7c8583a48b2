//! SF-003: Source addresses for stacks and components.
//!
//! Three spellings are accepted in stack files:
//! - local paths: `./network`, `../shared/db`
//! - remote packages: `git::https://example.com/infra.git//stacks/net?ref=v2`
//! - registry packages: `[host/]namespace/name/system[//subdir]`
//!
//! Registry sources are not final until a version is selected. Every other
//! kind is final already, and `FinalSource` is the closed set of addresses
//! that can be loaded from a source bundle.

use semver::Version;
use std::fmt;

/// Registry host used when a registry address names only three parts.
pub const DEFAULT_REGISTRY_HOST: &str = "registry.stackform.io";

/// Error parsing or combining source addresses.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceAddrError {
    #[error("source address must not be empty")]
    Empty,
    #[error("absolute filesystem paths are not allowed; use a relative path starting with \"./\"")]
    AbsolutePath,
    #[error("invalid remote source address {addr:?}: {reason}")]
    InvalidRemote { addr: String, reason: String },
    #[error("invalid registry source address {addr:?}: {reason}")]
    InvalidRegistry { addr: String, reason: String },
    #[error("unrecognized source address {0:?}")]
    Unrecognized(String),
    #[error("relative path {rel:?} traverses up too many levels from {base}")]
    EscapesPackage { rel: String, base: String },
}

// ============================================================================
// Local
// ============================================================================

/// A path relative to the address of whatever refers to it.
///
/// Always normalized to begin with `./` or one or more `../`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalSource {
    rel_path: String,
}

impl LocalSource {
    pub fn new(raw: &str) -> Result<Self, SourceAddrError> {
        if raw.starts_with('/') {
            return Err(SourceAddrError::AbsolutePath);
        }
        if !(raw.starts_with("./") || raw.starts_with("../") || raw == "." || raw == "..") {
            return Err(SourceAddrError::Unrecognized(raw.to_string()));
        }
        Ok(Self {
            rel_path: normalize_local(raw),
        })
    }

    pub fn rel_path(&self) -> &str {
        &self.rel_path
    }

    /// Segments below the leading `./` or `../` prefix.
    fn segments(&self) -> impl Iterator<Item = &str> {
        self.rel_path.split('/').filter(|s| !s.is_empty() && *s != ".")
    }

    /// Interpret `rel` relative to this path.
    pub fn join(&self, rel: &LocalSource) -> LocalSource {
        Self {
            rel_path: normalize_local(&format!("{}/{}", self.rel_path, rel.rel_path)),
        }
    }
}

impl fmt::Display for LocalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.rel_path)
    }
}

fn normalize_local(raw: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let mut ups = 0usize;
    for seg in raw.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    ups += 1;
                }
            }
            s => parts.push(s),
        }
    }
    let mut out = if ups == 0 {
        "./".to_string()
    } else {
        "../".repeat(ups)
    };
    out.push_str(&parts.join("/"));
    out
}

/// Apply `rel` to a clean sub-path, refusing to climb above the package root.
fn join_subpath(
    base_sub: &str,
    rel: &LocalSource,
    base: &dyn fmt::Display,
) -> Result<String, SourceAddrError> {
    let mut parts: Vec<&str> = base_sub.split('/').filter(|s| !s.is_empty()).collect();
    for seg in rel.rel_path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(SourceAddrError::EscapesPackage {
                        rel: rel.to_string(),
                        base: base.to_string(),
                    });
                }
            }
            s => parts.push(s),
        }
    }
    Ok(parts.join("/"))
}

/// Clean a sub-path written inside an absolute address. `..` is not allowed.
fn clean_subpath(raw: &str) -> Result<String, String> {
    let mut parts = Vec::new();
    for seg in raw.split('/') {
        match seg {
            "" | "." => {}
            ".." => return Err("sub-path must not contain \"..\" segments".to_string()),
            s => parts.push(s),
        }
    }
    Ok(parts.join("/"))
}

// ============================================================================
// Remote
// ============================================================================

/// A remote package: everything in a remote address except the sub-path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemotePackage {
    url: String,
    query: String,
}

impl RemotePackage {
    pub fn parse(raw: &str) -> Result<Self, SourceAddrError> {
        let src = RemoteSource::parse(raw)?;
        if !src.subpath.is_empty() {
            return Err(SourceAddrError::InvalidRemote {
                addr: raw.to_string(),
                reason: "a package address must not have a sub-path".to_string(),
            });
        }
        Ok(src.package)
    }
}

impl fmt::Display for RemotePackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.url, self.query)
    }
}

/// A final address inside a remote package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteSource {
    package: RemotePackage,
    subpath: String,
}

impl RemoteSource {
    pub fn parse(raw: &str) -> Result<Self, SourceAddrError> {
        let invalid = |reason: &str| SourceAddrError::InvalidRemote {
            addr: raw.to_string(),
            reason: reason.to_string(),
        };
        let (before_query, query) = match raw.find('?') {
            Some(i) => (&raw[..i], &raw[i..]),
            None => (raw, ""),
        };
        let scheme_end = before_query
            .find("://")
            .map(|i| i + 3)
            .ok_or_else(|| invalid("missing scheme"))?;
        if scheme_end == before_query.len() {
            return Err(invalid("missing host"));
        }
        let (url, subpath) = match before_query[scheme_end..].find("//") {
            Some(i) => (
                &before_query[..scheme_end + i],
                &before_query[scheme_end + i + 2..],
            ),
            None => (before_query, ""),
        };
        let subpath = clean_subpath(subpath).map_err(|e| invalid(&e))?;
        Ok(Self {
            package: RemotePackage {
                url: url.to_string(),
                query: query.to_string(),
            },
            subpath,
        })
    }

    pub fn package(&self) -> &RemotePackage {
        &self.package
    }

    pub fn subpath(&self) -> &str {
        &self.subpath
    }

    fn join_local(&self, rel: &LocalSource) -> Result<Self, SourceAddrError> {
        Ok(Self {
            package: self.package.clone(),
            subpath: join_subpath(&self.subpath, rel, self)?,
        })
    }

    fn with_extra_subpath(&self, extra: &str) -> Self {
        let subpath = match (self.subpath.is_empty(), extra.is_empty()) {
            (_, true) => self.subpath.clone(),
            (true, false) => extra.to_string(),
            (false, false) => format!("{}/{}", self.subpath, extra),
        };
        Self {
            package: self.package.clone(),
            subpath,
        }
    }
}

impl fmt::Display for RemoteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.package.url)?;
        if !self.subpath.is_empty() {
            write!(f, "//{}", self.subpath)?;
        }
        write!(f, "{}", self.package.query)
    }
}

// ============================================================================
// Registry
// ============================================================================

/// A package in a source registry: `host/namespace/name/system`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistryPackage {
    pub host: String,
    pub namespace: String,
    pub name: String,
    pub target_system: String,
}

impl RegistryPackage {
    pub fn parse(raw: &str) -> Result<Self, SourceAddrError> {
        let src = RegistrySource::parse(raw)?;
        if !src.subpath.is_empty() {
            return Err(SourceAddrError::InvalidRegistry {
                addr: raw.to_string(),
                reason: "a package address must not have a sub-path".to_string(),
            });
        }
        Ok(src.package)
    }
}

impl fmt::Display for RegistryPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.host, self.namespace, self.name, self.target_system
        )
    }
}

/// A registry address with no version selected yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistrySource {
    package: RegistryPackage,
    subpath: String,
}

impl RegistrySource {
    pub fn parse(raw: &str) -> Result<Self, SourceAddrError> {
        let invalid = |reason: String| SourceAddrError::InvalidRegistry {
            addr: raw.to_string(),
            reason,
        };
        let (pkg, subpath) = match raw.find("//") {
            Some(i) => (&raw[..i], &raw[i + 2..]),
            None => (raw, ""),
        };
        let parts: Vec<&str> = pkg.split('/').collect();
        let (host, rest) = match parts.len() {
            3 => (DEFAULT_REGISTRY_HOST, &parts[..]),
            4 => (parts[0], &parts[1..]),
            n => {
                return Err(invalid(format!(
                    "expected namespace/name/system with an optional host, got {} parts",
                    n
                )))
            }
        };
        for part in std::iter::once(&host).chain(rest.iter()) {
            if part.is_empty() {
                return Err(invalid("address parts must not be empty".to_string()));
            }
            if !part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
            {
                return Err(invalid(format!("invalid character in {:?}", part)));
            }
        }
        let subpath = clean_subpath(subpath).map_err(invalid)?;
        Ok(Self {
            package: RegistryPackage {
                host: host.to_ascii_lowercase(),
                namespace: rest[0].to_string(),
                name: rest[1].to_string(),
                target_system: rest[2].to_string(),
            },
            subpath,
        })
    }

    pub fn package(&self) -> &RegistryPackage {
        &self.package
    }

    pub fn subpath(&self) -> &str {
        &self.subpath
    }

    /// Pin this address to a selected version.
    pub fn versioned(&self, version: Version) -> RegistrySourceFinal {
        RegistrySourceFinal {
            src: self.clone(),
            version,
        }
    }
}

impl fmt::Display for RegistrySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.package)?;
        if !self.subpath.is_empty() {
            write!(f, "//{}", self.subpath)?;
        }
        Ok(())
    }
}

/// A registry address pinned to one version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistrySourceFinal {
    src: RegistrySource,
    version: Version,
}

impl RegistrySourceFinal {
    pub fn package(&self) -> &RegistryPackage {
        &self.src.package
    }

    pub fn selected_version(&self) -> &Version {
        &self.version
    }

    pub fn subpath(&self) -> &str {
        &self.src.subpath
    }

    pub fn unversioned(&self) -> &RegistrySource {
        &self.src
    }

    fn join_local(&self, rel: &LocalSource) -> Result<Self, SourceAddrError> {
        Ok(Self {
            src: RegistrySource {
                package: self.src.package.clone(),
                subpath: join_subpath(&self.src.subpath, rel, self)?,
            },
            version: self.version.clone(),
        })
    }

    /// The remote address this registry address refers to, given the remote
    /// address the registry reports for the package as a whole.
    pub fn final_source_addr(&self, underlying: &RemoteSource) -> RemoteSource {
        underlying.with_extra_subpath(&self.src.subpath)
    }
}

impl fmt::Display for RegistrySourceFinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.src.package, self.version)?;
        if !self.src.subpath.is_empty() {
            write!(f, "//{}", self.src.subpath)?;
        }
        Ok(())
    }
}

// ============================================================================
// Source / FinalSource
// ============================================================================

/// Any source address as written in a stack file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Local(LocalSource),
    Remote(RemoteSource),
    Registry(RegistrySource),
    RegistryFinal(RegistrySourceFinal),
}

impl Source {
    pub fn is_registry(&self) -> bool {
        matches!(self, Self::Registry(_))
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(s) => fmt::Display::fmt(s, f),
            Self::Remote(s) => fmt::Display::fmt(s, f),
            Self::Registry(s) => fmt::Display::fmt(s, f),
            Self::RegistryFinal(s) => fmt::Display::fmt(s, f),
        }
    }
}

/// A source address with nothing left to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalSource {
    Local(LocalSource),
    Remote(RemoteSource),
    Registry(RegistrySourceFinal),
}

impl fmt::Display for FinalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(s) => fmt::Display::fmt(s, f),
            Self::Remote(s) => fmt::Display::fmt(s, f),
            Self::Registry(s) => fmt::Display::fmt(s, f),
        }
    }
}

/// Parse any source address.
///
/// A registry address may carry a version with `@`, e.g.
/// `acme/network/aws@1.2.0//modules/vpc`, which makes it final.
pub fn parse_source(raw: &str) -> Result<Source, SourceAddrError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(SourceAddrError::Empty);
    }
    if raw.starts_with('/') {
        return Err(SourceAddrError::AbsolutePath);
    }
    if raw.starts_with("./") || raw.starts_with("../") || raw == "." || raw == ".." {
        return LocalSource::new(raw).map(Source::Local);
    }
    if raw.contains("::") || raw.contains("://") {
        return RemoteSource::parse(raw).map(Source::Remote);
    }
    if raw.contains('/') {
        return parse_registry(raw);
    }
    Err(SourceAddrError::Unrecognized(raw.to_string()))
}

fn parse_registry(raw: &str) -> Result<Source, SourceAddrError> {
    let (pkg_part, subpath) = match raw.find("//") {
        Some(i) => (&raw[..i], &raw[i..]),
        None => (raw, ""),
    };
    let Some((pkg, version)) = pkg_part.split_once('@') else {
        return RegistrySource::parse(raw).map(Source::Registry);
    };
    let version = Version::parse(version).map_err(|e| SourceAddrError::InvalidRegistry {
        addr: raw.to_string(),
        reason: format!("invalid version: {}", e),
    })?;
    let src = RegistrySource::parse(&format!("{}{}", pkg, subpath))?;
    Ok(Source::RegistryFinal(src.versioned(version)))
}

/// Parse a source address that must already be final (e.g. a root address).
pub fn parse_final_source(raw: &str) -> Result<FinalSource, SourceAddrError> {
    match parse_source(raw)? {
        Source::Local(s) => Ok(FinalSource::Local(s)),
        Source::Remote(s) => Ok(FinalSource::Remote(s)),
        Source::RegistryFinal(s) => Ok(FinalSource::Registry(s)),
        Source::Registry(s) => Err(SourceAddrError::InvalidRegistry {
            addr: s.to_string(),
            reason: "a version must be selected with \"@\"".to_string(),
        }),
    }
}

/// Resolve `rel` relative to `base`.
///
/// Absolute addresses are returned unchanged. A local path under a remote or
/// registry base must stay inside that base's package.
pub fn resolve_relative_final_source(
    base: &FinalSource,
    rel: &FinalSource,
) -> Result<FinalSource, SourceAddrError> {
    let local = match rel {
        FinalSource::Local(local) => local,
        FinalSource::Remote(_) | FinalSource::Registry(_) => return Ok(rel.clone()),
    };
    match base {
        FinalSource::Local(b) => Ok(FinalSource::Local(b.join(local))),
        FinalSource::Remote(b) => b.join_local(local).map(FinalSource::Remote),
        FinalSource::Registry(b) => b.join_local(local).map(FinalSource::Registry),
    }
}

/// Path segments of a local source, for mapping onto a directory.
pub(crate) fn local_segments(src: &LocalSource) -> (usize, Vec<&str>) {
    let ups = src.rel_path.matches("../").count();
    (ups, src.segments().filter(|s| *s != "..").collect())
}
