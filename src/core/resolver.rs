//! SF-008: Final source address resolution.
//!
//! Turns the source address written in a call (possibly relative, possibly an
//! unversioned registry address) into one absolute, version-pinned address,
//! given the already-final address of the calling stack.

use super::bundle::SourceBundle;
use super::sourceaddr::{
    resolve_relative_final_source, FinalSource, RegistryPackage, SourceAddrError, Source,
};
use super::versions::VersionConstraints;

/// Why a call's source address could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Relative(#[from] SourceAddrError),

    /// The bundle lists versions of a registry package but not the remote
    /// address one of them came from.
    #[error("can't find underlying source address for {package}")]
    MissingUnderlyingSource { package: RegistryPackage },

    #[error("no cached versions of {package} match the given version constraints")]
    NoMatchingVersion { package: RegistryPackage },
}

impl ResolveError {
    /// Whether this error means the source bundle is inconsistent, as
    /// opposed to a mistake in the configuration being loaded.
    pub fn is_internal(&self) -> bool {
        match self {
            Self::Relative(_) => false,
            Self::MissingUnderlyingSource { .. } | Self::NoMatchingVersion { .. } => true,
        }
    }
}

/// Resolve `rel`, written in the stack at `base`, to a final address.
///
/// Unversioned registry addresses are pinned to the newest version cached in
/// `bundle` that `constraints` allows.
pub fn resolve_final_source_addr(
    base: &FinalSource,
    rel: &Source,
    constraints: &VersionConstraints,
    bundle: &SourceBundle,
) -> Result<FinalSource, ResolveError> {
    let rel = match rel {
        Source::Local(s) => FinalSource::Local(s.clone()),
        Source::Remote(s) => FinalSource::Remote(s.clone()),
        Source::RegistryFinal(s) => FinalSource::Registry(s.clone()),
        Source::Registry(s) => {
            let available = bundle.registry_package_versions(s.package());
            let version = constraints.newest_in(&available).ok_or_else(|| {
                ResolveError::NoMatchingVersion {
                    package: s.package().clone(),
                }
            })?;
            tracing::debug!(source = %s, %version, %constraints, "selected registry version");
            FinalSource::Registry(s.versioned(version))
        }
    };
    resolve_final(base, &rel, bundle)
}

fn resolve_final(
    base: &FinalSource,
    rel: &FinalSource,
    bundle: &SourceBundle,
) -> Result<FinalSource, ResolveError> {
    let FinalSource::Registry(reg) = base else {
        return Ok(resolve_relative_final_source(base, rel)?);
    };

    match resolve_relative_final_source(base, rel) {
        Ok(addr) => Ok(addr),
        Err(e) => {
            // The path leaves the registry package, so continue from the real
            // location the package was published from.
            let underlying = bundle
                .registry_package_source_addr(reg.package(), reg.selected_version())
                .ok_or_else(|| ResolveError::MissingUnderlyingSource {
                    package: reg.package().clone(),
                })?;
            let real_base = FinalSource::Remote(reg.final_source_addr(&underlying));
            tracing::debug!(%base, %real_base, rel = %rel, cause = %e, "resolving outside registry package");
            Ok(resolve_relative_final_source(&real_base, rel)?)
        }
    }
}
