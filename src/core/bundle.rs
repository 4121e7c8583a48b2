//! SF-005: Source bundle, the local cache that every non-local source is
//! read from.
//!
//! Nothing is fetched here. A bundle is described by a `bundle.yaml`
//! manifest listing which remote packages have been unpacked where, and
//! which registry package versions are available along with the remote
//! address each version was published from:
//!
//! ```yaml
//! remote:
//!   - source: "git::https://example.com/net.git?ref=v1.2.0"
//!     dir: pkgs/net-1.2.0
//! registry:
//!   - package: example.com/acme/network/aws
//!     versions:
//!       "1.2.0": "git::https://example.com/net.git?ref=v1.2.0"
//! ```
//!
//! Local sources are interpreted relative to the bundle's local root, which
//! for an opened manifest starts as the bundle directory.

use super::sourceaddr::{
    local_segments, FinalSource, RegistryPackage, RemotePackage, RemoteSource,
};
use indexmap::IndexMap;
use semver::Version;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// File name of a bundle manifest inside a bundle directory.
pub const BUNDLE_MANIFEST: &str = "bundle.yaml";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BundleManifest {
    #[serde(default)]
    remote: Vec<RemoteEntry>,
    #[serde(default)]
    registry: Vec<RegistryEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RemoteEntry {
    source: String,
    dir: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistryEntry {
    package: String,
    versions: IndexMap<String, String>,
}

/// Already-fetched sources available to a configuration load.
#[derive(Debug, Clone, Default)]
pub struct SourceBundle {
    local_root: PathBuf,
    remote_packages: IndexMap<RemotePackage, PathBuf>,
    registry_packages: IndexMap<RegistryPackage, BTreeMap<Version, RemoteSource>>,
}

impl SourceBundle {
    /// An empty bundle that resolves local sources under `local_root`.
    pub fn new(local_root: impl Into<PathBuf>) -> Self {
        Self {
            local_root: local_root.into(),
            ..Self::default()
        }
    }

    /// Resolve local sources under `local_root` instead.
    pub fn with_local_root(mut self, local_root: impl Into<PathBuf>) -> Self {
        self.local_root = local_root.into();
        self
    }

    /// Record that `package` has been unpacked into `dir`.
    pub fn with_remote_package(mut self, package: RemotePackage, dir: impl Into<PathBuf>) -> Self {
        self.remote_packages.insert(package, dir.into());
        self
    }

    /// Record that `version` of a registry package is available and was
    /// published from `underlying`.
    pub fn with_registry_package(
        mut self,
        package: RegistryPackage,
        version: Version,
        underlying: RemoteSource,
    ) -> Self {
        self.registry_packages
            .entry(package)
            .or_default()
            .insert(version, underlying);
        self
    }

    /// Open the bundle manifest in `dir`. Relative paths in the manifest are
    /// relative to `dir`, which is also the default local root.
    pub fn open(dir: &Path) -> Result<Self, String> {
        let path = dir.join(BUNDLE_MANIFEST);
        let content = std::fs::read_to_string(&path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        let bundle = Self::parse_manifest(&content, dir)
            .map_err(|e| format!("{}: {}", path.display(), e))?;
        tracing::debug!(
            manifest = %path.display(),
            remote = bundle.remote_packages.len(),
            registry = bundle.registry_packages.len(),
            "opened source bundle"
        );
        Ok(bundle)
    }

    /// Parse a manifest, resolving relative directories against `base_dir`.
    pub fn parse_manifest(yaml: &str, base_dir: &Path) -> Result<Self, String> {
        let manifest: BundleManifest =
            serde_yaml_ng::from_str(yaml).map_err(|e| format!("bundle manifest parse error: {}", e))?;

        let mut bundle = Self::new(base_dir);

        for entry in manifest.remote {
            let package = RemotePackage::parse(&entry.source).map_err(|e| e.to_string())?;
            bundle = bundle.with_remote_package(package, base_dir.join(entry.dir));
        }
        for entry in manifest.registry {
            let package = RegistryPackage::parse(&entry.package).map_err(|e| e.to_string())?;
            for (version, underlying) in entry.versions {
                let version = Version::parse(&version).map_err(|e| {
                    format!("invalid version {:?} for {}: {}", version, package, e)
                })?;
                let underlying = RemoteSource::parse(&underlying).map_err(|e| e.to_string())?;
                bundle = bundle.with_registry_package(package.clone(), version, underlying);
            }
        }
        Ok(bundle)
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    /// Every cached version of a registry package.
    pub fn registry_package_versions(&self, package: &RegistryPackage) -> BTreeSet<Version> {
        self.registry_packages
            .get(package)
            .map(|versions| versions.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// The remote address a registry package version was published from.
    pub fn registry_package_source_addr(
        &self,
        package: &RegistryPackage,
        version: &Version,
    ) -> Option<RemoteSource> {
        self.registry_packages.get(package)?.get(version).cloned()
    }

    /// Where on disk the content of a final source address lives.
    pub fn local_path_for_source(&self, addr: &FinalSource) -> Result<PathBuf, String> {
        match addr {
            FinalSource::Local(local) => {
                let (ups, segs) = local_segments(local);
                let mut path = self.local_root.clone();
                for _ in 0..ups {
                    path.push("..");
                }
                path.extend(segs);
                Ok(path)
            }
            FinalSource::Remote(remote) => self.remote_path(remote),
            FinalSource::Registry(reg) => {
                let underlying = self
                    .registry_package_source_addr(reg.package(), reg.selected_version())
                    .ok_or_else(|| {
                        format!(
                            "source bundle has no entry for {} version {}",
                            reg.package(),
                            reg.selected_version()
                        )
                    })?;
                self.remote_path(&reg.final_source_addr(&underlying))
            }
        }
    }

    fn remote_path(&self, remote: &RemoteSource) -> Result<PathBuf, String> {
        let dir = self
            .remote_packages
            .get(remote.package())
            .ok_or_else(|| format!("source bundle does not contain {}", remote.package()))?;
        let mut path = dir.clone();
        path.extend(remote.subpath().split('/').filter(|s| !s.is_empty()));
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sourceaddr::parse_final_source;

    const MANIFEST: &str = r#"
remote:
  - source: "git::https://example.com/net.git?ref=v1.2.0"
    dir: pkgs/net-1.2.0
registry:
  - package: example.com/acme/network/aws
    versions:
      "1.0.0": "git::https://example.com/net.git?ref=v1.0.0"
      "1.2.0": "git::https://example.com/net.git?ref=v1.2.0"
"#;

    fn bundle() -> SourceBundle {
        SourceBundle::parse_manifest(MANIFEST, Path::new("/cache")).unwrap()
    }

    #[test]
    fn test_sf005_registry_versions() {
        let pkg = RegistryPackage::parse("example.com/acme/network/aws").unwrap();
        let versions: Vec<String> = bundle()
            .registry_package_versions(&pkg)
            .iter()
            .map(|v| v.to_string())
            .collect();
        assert_eq!(versions, vec!["1.0.0", "1.2.0"]);

        let other = RegistryPackage::parse("acme/other/aws").unwrap();
        assert!(bundle().registry_package_versions(&other).is_empty());
    }

    #[test]
    fn test_sf005_registry_source_addr() {
        let pkg = RegistryPackage::parse("example.com/acme/network/aws").unwrap();
        let addr = bundle()
            .registry_package_source_addr(&pkg, &Version::new(1, 2, 0))
            .unwrap();
        assert_eq!(addr.to_string(), "git::https://example.com/net.git?ref=v1.2.0");
        assert!(bundle()
            .registry_package_source_addr(&pkg, &Version::new(9, 9, 9))
            .is_none());
    }

    #[test]
    fn test_sf005_local_path_for_local() {
        let b = SourceBundle::new("/work");
        let path = b
            .local_path_for_source(&parse_final_source("./stacks/net").unwrap())
            .unwrap();
        assert_eq!(path, PathBuf::from("/work/stacks/net"));
        let path = b
            .local_path_for_source(&parse_final_source("../shared").unwrap())
            .unwrap();
        assert_eq!(path, PathBuf::from("/work/../shared"));
    }

    #[test]
    fn test_sf005_local_path_for_registry() {
        let addr = parse_final_source("example.com/acme/network/aws@1.2.0//stacks/vpc").unwrap();
        let path = bundle().local_path_for_source(&addr).unwrap();
        assert_eq!(path, PathBuf::from("/cache/pkgs/net-1.2.0/stacks/vpc"));

        // 1.0.0 is listed but its remote package was never unpacked.
        let addr = parse_final_source("example.com/acme/network/aws@1.0.0").unwrap();
        let err = bundle().local_path_for_source(&addr).unwrap_err();
        assert!(err.contains("does not contain"));
    }

    #[test]
    fn test_sf005_manifest_errors() {
        assert!(SourceBundle::parse_manifest("remote: [{source: nope, dir: x}]", Path::new("/")).is_err());
        assert!(SourceBundle::parse_manifest("unknown_key: 1", Path::new("/")).is_err());
        // the local root comes from the caller, never the manifest
        assert!(SourceBundle::parse_manifest("local_root: src", Path::new("/")).is_err());
        let bad_version = r#"
registry:
  - package: acme/network/aws
    versions:
      "one": "https://example.com/x.tgz"
"#;
        let err = SourceBundle::parse_manifest(bad_version, Path::new("/")).unwrap_err();
        assert!(err.contains("invalid version"));
    }

    #[test]
    fn test_sf005_open_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(BUNDLE_MANIFEST), MANIFEST).unwrap();
        let b = SourceBundle::open(dir.path()).unwrap();
        assert_eq!(b.local_root(), dir.path());
        let b = b.with_local_root("/elsewhere");
        assert_eq!(b.local_root(), Path::new("/elsewhere"));

        let missing = tempfile::tempdir().unwrap();
        assert!(SourceBundle::open(missing.path()).is_err());
    }
}
