use cargo_toml::{Dependency, Manifest};
use nitrite::errors::{ErrorKind, NitriteError, NitriteResult};

/// Version requirement of the fjall engine this adapter was built with.
pub(crate) fn fjall_version() -> NitriteResult<String> {
    dependency_version(include_str!("../Cargo.toml"), "fjall")
}

fn dependency_version(manifest: &str, name: &str) -> NitriteResult<String> {
    let manifest = Manifest::from_str(manifest).map_err(|e| {
        log::error!("Failed to parse adapter manifest: {}", e);
        NitriteError::new(
            &format!("Failed to parse adapter manifest: {}", e),
            ErrorKind::PluginError,
        )
    })?;

    let version = match manifest.dependencies.get(name) {
        Some(Dependency::Simple(version)) => Some(version.clone()),
        Some(Dependency::Detailed(detail)) => detail.version.clone(),
        Some(Dependency::Inherited(_)) | None => None,
    };

    version.ok_or_else(|| {
        log::error!("No version requirement for {} in adapter manifest", name);
        NitriteError::new(
            &format!("No version requirement for {} in adapter manifest", name),
            ErrorKind::PluginError,
        )
    })
}
