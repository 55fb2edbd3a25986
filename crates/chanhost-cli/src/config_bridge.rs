//! Bridge from `chanhost_config::Config` to registry and logging types.

use std::sync::Arc;

use anyhow::Context;
use chanhost_config::{Config, DiscoverySection, ResolvedConfig};
use chanhost_crypto::Fingerprint;
use chanhost_extensions::{
    DirectoryEnvironment, ExtensionRegistry, FilePreferences, LifecycleWatcher, ModuleLoader,
    NativeModuleLoader, PackageEnvironment, Preferences, RegistryBuilder,
};
use chanhost_telemetry::LogConfig;

/// Logging configuration from the `[logging]` section.
pub(crate) fn to_log_config(config: &Config) -> LogConfig {
    LogConfig::from(&config.logging)
}

/// Fingerprint of the certificates the host is signed with.
///
/// Empty when no certificate files are configured, in which case nothing is
/// trusted implicitly.
pub(crate) fn host_fingerprint(section: &DiscoverySection) -> anyhow::Result<Fingerprint> {
    let certificates = section
        .host_certificates
        .iter()
        .map(|path| {
            std::fs::read(path)
                .with_context(|| format!("failed to read host certificate {}", path.display()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Fingerprint::from_certificates(&certificates))
}

/// Scan the configured extension directories and build the registry.
pub(crate) fn build_registry(
    resolved: &ResolvedConfig,
) -> anyhow::Result<(ExtensionRegistry, LifecycleWatcher)> {
    let config = &resolved.config;

    let environment: Arc<dyn PackageEnvironment> = Arc::new(DirectoryEnvironment::new(
        config.discovery.extension_dirs.clone(),
    ));
    let loader: Arc<dyn ModuleLoader> = Arc::new(NativeModuleLoader::new());
    let preferences_path = resolved.preferences_path();
    let preferences: Arc<dyn Preferences> = Arc::new(
        FilePreferences::open(&preferences_path).with_context(|| {
            format!("failed to open preferences {}", preferences_path.display())
        })?,
    );

    let fingerprint = host_fingerprint(&config.discovery)?;

    Ok(RegistryBuilder::new(environment, loader, preferences)
        .config(&config.registry)
        .host_fingerprint(fingerprint)
        .build())
}
