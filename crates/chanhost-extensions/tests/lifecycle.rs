//! Lifecycle events, trust decisions, and notifications.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chanhost_crypto::Fingerprint;
use chanhost_events::FnSubscriber;
use chanhost_extensions::{
    CapabilityBundle, CatalogModuleLoader, ExtensionDescriptor, ExtensionError, LifecycleEvent,
    LoadError, MemoryPreferences, ModuleLoader, RegistryBuilder, RegistryEvent, TrustState,
    TrustStore,
};
use chanhost_test::{
    MemoryEnvironment, MockModule, PackageBuilder, RecordedEvent, RegistryHarness, fingerprint_of,
    init_test_logging,
};
use tokio::time::timeout;

const FOO: &str = "org.example.foochan";
const BAR: &str = "org.example.barchan";
const LIB: &str = "org.example.webmlib";

#[tokio::test]
async fn test_install_trusted_extension() {
    init_test_logging();
    let harness = RegistryHarness::new().start().await;
    let package = PackageBuilder::content(FOO, "foochan").build();
    harness.trust(&package);

    harness
        .install(package, Some(&MockModule::new(FOO)))
        .await;

    let registry = harness.registry();
    assert!(!registry.get("foochan").is_fallback());
    assert_eq!(
        harness.recorder().events(),
        vec![RecordedEvent::new("extension_installed", "foochan")]
    );
}

#[tokio::test]
async fn test_install_untrusted_prompts_then_trust_loads() {
    let harness = RegistryHarness::new().start().await;
    let package = PackageBuilder::content(FOO, "foochan").signed_by(b"AA").build();
    let module = MockModule::new(FOO);

    harness.install(package, Some(&module)).await;
    assert_eq!(
        harness.recorder().names_of("extension_untrusted_pending"),
        vec!["foochan"]
    );
    assert!(harness.registry().get("foochan").is_fallback());
    assert_eq!(module.constructed(), 0);

    harness.registry().set_trust("foochan", true).await.unwrap();

    assert!(!harness.registry().get("foochan").is_fallback());
    assert_eq!(module.constructed(), 1);
    assert!(
        harness
            .preferences()
            .is_trusted(FOO, &fingerprint_of(b"AA").to_string())
    );
    assert_eq!(
        harness.recorder().names_of("extension_installed"),
        vec!["foochan"]
    );
}

#[tokio::test]
async fn test_set_trust_is_idempotent() {
    let package = PackageBuilder::content(FOO, "foochan").build();
    let module = MockModule::new(FOO);
    let harness = RegistryHarness::new()
        .with_package(package, Some(&module))
        .start()
        .await;
    let registry = harness.registry();

    registry.set_trust("foochan", false).await.unwrap();
    assert_eq!(
        registry.descriptor("foochan").unwrap().trust,
        TrustState::Discarded
    );

    // Terminal states ignore further decisions.
    registry.set_trust("foochan", true).await.unwrap();
    registry.set_trust("foochan", false).await.unwrap();
    assert_eq!(
        registry.descriptor("foochan").unwrap().trust,
        TrustState::Discarded
    );
    assert_eq!(module.constructed(), 0);

    // Unknown names are ignored too.
    registry.set_trust("unknown", true).await.unwrap();
    assert!(harness.recorder().names_of("extension_installed").is_empty());
}

#[tokio::test]
async fn test_trusting_twice_loads_once() {
    let package = PackageBuilder::content(FOO, "foochan").build();
    let module = MockModule::new(FOO);
    let harness = RegistryHarness::new()
        .with_package(package, Some(&module))
        .start()
        .await;

    harness.registry().set_trust("foochan", true).await.unwrap();
    harness.registry().set_trust("foochan", true).await.unwrap();

    assert_eq!(module.constructed(), 1);
    assert_eq!(harness.recorder().count("extension_installed"), 1);
}

#[tokio::test]
async fn test_reinstall_with_new_signer_resets_trust() {
    let original = PackageBuilder::content(FOO, "foochan").signed_by(b"AA").build();
    let harness = RegistryHarness::new()
        .trusting(&original)
        .with_package(original, Some(&MockModule::new(FOO)))
        .start()
        .await;
    let old_bundle = harness.registry().get("foochan");
    assert!(!old_bundle.is_fallback());

    let resigned = PackageBuilder::content(FOO, "foochan")
        .signed_by(b"BB")
        .version("2.0", 2)
        .build();
    harness
        .update(resigned, Some(&MockModule::new(FOO)))
        .await;

    let registry = harness.registry();
    let descriptor = registry.descriptor("foochan").unwrap();
    assert_eq!(descriptor.trust, TrustState::Untrusted);
    assert_eq!(descriptor.fingerprint, fingerprint_of(b"BB"));
    assert!(registry.get("foochan").is_fallback());
    assert!(!registry.is_restart_required());
    assert_eq!(
        harness.recorder().events(),
        vec![
            RecordedEvent::new("extension_uninstalled", "foochan"),
            RecordedEvent::new("extension_untrusted_pending", "foochan"),
        ]
    );

    // The old bundle stays usable for whoever still holds it.
    assert_eq!(old_bundle.name(), Some("foochan"));
}

#[tokio::test]
async fn test_update_with_same_signer_reloads() {
    let package = PackageBuilder::content(FOO, "foochan").build();
    let module = MockModule::new(FOO);
    let harness = RegistryHarness::new()
        .trusting(&package)
        .with_package(package, Some(&module))
        .start()
        .await;
    let old_bundle = harness.registry().get("foochan");

    let updated = PackageBuilder::content(FOO, "foochan")
        .version("2.0", 2)
        .build();
    harness.update(updated, Some(&module)).await;

    let registry = harness.registry();
    let new_bundle = registry.get("foochan");
    assert!(!new_bundle.is_fallback());
    assert!(!Arc::ptr_eq(&old_bundle, &new_bundle));
    assert_eq!(registry.descriptor("foochan").unwrap().version.code, 2);
    assert_eq!(module.constructed(), 2);
    assert_eq!(registry.snapshot().len(), 1);
    assert_eq!(
        harness.recorder().events(),
        vec![
            RecordedEvent::new("extension_uninstalled", "foochan"),
            RecordedEvent::new("extension_installed", "foochan"),
        ]
    );
}

#[tokio::test]
async fn test_discarded_survives_same_signer_update() {
    let package = PackageBuilder::content(FOO, "foochan").build();
    let harness = RegistryHarness::new()
        .with_package(package.clone(), Some(&MockModule::new(FOO)))
        .start()
        .await;
    harness.registry().set_trust("foochan", false).await.unwrap();

    harness
        .update(package, Some(&MockModule::new(FOO)))
        .await;

    assert_eq!(
        harness.registry().descriptor("foochan").unwrap().trust,
        TrustState::Discarded
    );
    assert_eq!(harness.recorder().count("extension_untrusted_pending"), 0);
}

#[tokio::test]
async fn test_replacing_removal_is_deferred() {
    let package = PackageBuilder::content(FOO, "foochan").build();
    let harness = RegistryHarness::new()
        .trusting(&package)
        .with_package(package, Some(&MockModule::new(FOO)))
        .start()
        .await;

    harness
        .send(LifecycleEvent::PackageRemoved {
            package: FOO.to_owned(),
            replacing: true,
        })
        .await;

    let registry = harness.registry();
    assert!(!registry.get("foochan").is_fallback());
    assert!(harness.recorder().events().is_empty());
}

#[tokio::test]
async fn test_uninstall_removes_entry() {
    let package = PackageBuilder::content(FOO, "foochan").build();
    let harness = RegistryHarness::new()
        .trusting(&package)
        .with_package(package, Some(&MockModule::new(FOO)))
        .start()
        .await;

    harness.uninstall(FOO).await;

    let registry = harness.registry();
    assert!(!registry.is_known("foochan"));
    assert!(registry.get("foochan").is_fallback());
    assert!(registry.descriptors().is_empty());
    assert!(!registry.is_restart_required());
    assert_eq!(
        harness.recorder().events(),
        vec![RecordedEvent::new("extension_uninstalled", "foochan")]
    );

    // Removing something that is not there changes nothing.
    let generation = registry.snapshot().generation();
    harness.uninstall("org.example.nothing").await;
    assert_eq!(registry.snapshot().generation(), generation);
}

#[tokio::test]
async fn test_conflicting_install_is_dropped() {
    let first = PackageBuilder::content(FOO, "foochan").build();
    let harness = RegistryHarness::new()
        .trusting(&first)
        .with_package(first, Some(&MockModule::new(FOO)))
        .start()
        .await;

    let intruder = PackageBuilder::content(BAR, "foochan").build();
    harness.trust(&intruder);
    harness
        .install(intruder, Some(&MockModule::new(BAR)))
        .await;

    let registry = harness.registry();
    assert_eq!(registry.package_of("foochan").as_deref(), Some(FOO));
    assert_eq!(registry.available().len(), 1);
    assert!(harness.recorder().events().is_empty());
}

#[tokio::test]
async fn test_package_that_stops_being_an_extension_is_removed() {
    let package = PackageBuilder::content(FOO, "foochan").build();
    let harness = RegistryHarness::new()
        .trusting(&package)
        .with_package(package, Some(&MockModule::new(FOO)))
        .start()
        .await;

    harness.install(PackageBuilder::plain(FOO).build(), None).await;
    assert!(!harness.registry().is_known("foochan"));

    harness.install(PackageBuilder::plain(BAR).build(), None).await;
    assert!(harness.registry().descriptors().is_empty());
}

#[tokio::test]
async fn test_removing_loaded_library_requires_restart() {
    let library = PackageBuilder::library(LIB, "webmlib").build();
    let harness = RegistryHarness::new()
        .trusting(&library)
        .with_package(library, None)
        .start()
        .await;
    let mut receiver = harness.registry().subscribe();
    assert!(!harness.registry().is_restart_required());

    harness.uninstall(LIB).await;
    assert!(harness.registry().is_restart_required());
    assert_eq!(harness.recorder().count("restart_required_changed"), 1);
    let event = receiver.recv().await.unwrap();
    assert!(matches!(
        *event,
        RegistryEvent::RestartRequiredChanged {
            restart_required: true,
            ..
        }
    ));

    // Sticky across unrelated events.
    let package = PackageBuilder::content(FOO, "foochan").build();
    harness.trust(&package);
    harness
        .install(package, Some(&MockModule::new(FOO)))
        .await;
    harness.uninstall(FOO).await;
    harness.registry().set_order(Vec::new()).await.unwrap();

    assert!(harness.registry().is_restart_required());
    assert!(harness.registry().snapshot().restart_required());
    assert_eq!(harness.recorder().count("restart_required_changed"), 1);
}

#[tokio::test]
async fn test_updating_loaded_library_requires_restart() {
    let library = PackageBuilder::library(LIB, "webmlib").build();
    let harness = RegistryHarness::new()
        .trusting(&library)
        .with_package(library, None)
        .start()
        .await;

    let updated = PackageBuilder::library(LIB, "webmlib")
        .version("2.0", 2)
        .build();
    harness.update(updated, None).await;

    assert!(harness.registry().is_restart_required());
    assert!(harness.registry().library("webmlib").is_some());
}

#[tokio::test]
async fn test_untrusted_library_does_not_require_restart() {
    let harness = RegistryHarness::new().start().await;
    let library = PackageBuilder::library(LIB, "webmlib").build();

    harness.install(library, None).await;
    harness.uninstall(LIB).await;

    assert!(!harness.registry().is_restart_required());
}

#[tokio::test]
async fn test_subscribers_see_published_snapshot() {
    let harness = RegistryHarness::new().start().await;
    let registry = harness.registry().clone();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let observer = {
        let registry = registry.clone();
        let seen = Arc::clone(&seen);
        FnSubscriber::new("observer", move |event: &RegistryEvent| {
            if let RegistryEvent::Installed { bundle, .. } = event {
                let name = bundle.name().unwrap_or_default().to_owned();
                let current = registry.get(&name);
                seen.lock().unwrap().push(Arc::ptr_eq(&current, bundle));
            }
        })
    };
    let subscriber = registry.register_subscriber(Arc::new(observer));

    for (id, name) in [(FOO, "foochan"), (BAR, "barchan")] {
        let package = PackageBuilder::content(id, name).build();
        harness.trust(&package);
        harness
            .install(package, Some(&MockModule::new(id)))
            .await;
    }

    assert!(registry.unregister_subscriber(subscriber));
    assert_eq!(*seen.lock().unwrap(), vec![true, true]);
}

#[tokio::test]
async fn test_old_snapshot_is_never_partially_updated() {
    let harness = RegistryHarness::new().start().await;
    let registry = harness.registry();
    let before = registry.snapshot();

    let package = PackageBuilder::content(FOO, "foochan").build();
    harness.trust(&package);
    harness
        .install(package, Some(&MockModule::new(FOO)))
        .await;

    assert!(before.is_empty());
    assert!(before.entry("foochan").is_none());
    assert!(before.bundle("foochan").is_none());

    let after = registry.snapshot();
    let entry = after.entry("foochan").unwrap();
    assert!(entry.is_loaded());
    assert!(after.generation() > before.generation());
}

#[tokio::test]
async fn test_concurrent_readers_see_whole_entries() {
    let harness = RegistryHarness::new().start().await;
    let registry = harness.registry().clone();

    let reader = tokio::spawn(async move {
        for _ in 0..200 {
            let snapshot = registry.snapshot();
            for entry in snapshot.entries() {
                if entry.trust() == TrustState::Trusted && !entry.load_failed && !entry.loading {
                    assert!(entry.is_loaded(), "{} published half-built", entry.name());
                }
            }
            tokio::task::yield_now().await;
        }
    });

    for i in 0..20 {
        let id = format!("pkg.n{i}");
        let package = PackageBuilder::content(&id, &format!("chan{i:02}")).build();
        harness.trust(&package);
        harness
            .install(package, Some(&MockModule::new(id.clone())))
            .await;
    }

    reader.await.unwrap();
    assert_eq!(harness.registry().available().len(), 20);
}

#[tokio::test]
async fn test_enqueue_is_processed_in_order() {
    let harness = RegistryHarness::new().with_queue_capacity(2).start().await;
    let registry = harness.registry();

    for name in ["aaaa", "bbbb", "cccc", "dddd"] {
        let package = PackageBuilder::content(&format!("pkg.{name}"), name).build();
        harness.environment().install(package);
        registry
            .enqueue(LifecycleEvent::PackageAdded {
                package: format!("pkg.{name}"),
            })
            .await
            .unwrap();
    }
    registry.set_order(Vec::new()).await.unwrap();

    assert_eq!(
        registry.snapshot().names(),
        vec!["aaaa", "bbbb", "cccc", "dddd"]
    );
    assert_eq!(
        harness.recorder().names_of("extension_untrusted_pending"),
        vec!["aaaa", "bbbb", "cccc", "dddd"]
    );
}

#[tokio::test]
async fn test_writes_fail_once_lifecycle_task_is_gone() {
    let (harness, watcher) = RegistryHarness::new().build();
    drop(watcher);

    let result = harness.registry().set_trust("foochan", true).await;
    assert!(matches!(result, Err(ExtensionError::RegistryClosed)));
    let result = harness
        .registry()
        .enqueue(LifecycleEvent::PackageAdded {
            package: FOO.to_owned(),
        })
        .await;
    assert!(matches!(result, Err(ExtensionError::RegistryClosed)));
}

#[tokio::test]
async fn test_lifecycle_task_stops_with_last_handle() {
    let harness = RegistryHarness::new().start().await;
    harness.shutdown().await;
}

#[tokio::test]
async fn test_slow_constructor_does_not_stall_other_events() {
    const SLOW: &str = "org.example.slowchan";
    let harness = RegistryHarness::new().start().await;
    let registry = harness.registry();

    let slow = PackageBuilder::content(SLOW, "slowchan").build();
    harness.trust(&slow);
    let slow_module = MockModule::new(SLOW).blocking_constructor(Duration::from_secs(3));
    let id = harness.stage(slow, Some(&slow_module));
    registry
        .enqueue(LifecycleEvent::PackageAdded { package: id })
        .await
        .unwrap();

    let package = PackageBuilder::content(FOO, "foochan").build();
    harness.trust(&package);
    timeout(
        Duration::from_secs(1),
        harness.install(package, Some(&MockModule::new(FOO))),
    )
    .await
    .expect("install waited on an unrelated load");
    timeout(
        Duration::from_secs(1),
        registry.set_order(vec!["foochan".to_owned()]),
    )
    .await
    .expect("reorder waited on an unrelated load")
    .unwrap();

    assert!(!registry.get("foochan").is_fallback());
    assert_eq!(registry.snapshot().names(), vec!["foochan", "slowchan"]);
    assert!(registry.snapshot().entry("slowchan").unwrap().loading);
    assert!(registry.get("slowchan").is_fallback());

    registry.settled().await.unwrap();
    assert!(!registry.get("slowchan").is_fallback());
    assert_eq!(slow_module.constructed(), 1);
}

#[tokio::test]
async fn test_replacing_removal_without_add_completes_removal() {
    let package = PackageBuilder::content(FOO, "foochan").build();
    let harness = RegistryHarness::new()
        .with_replace_timeout(Duration::from_millis(50))
        .trusting(&package)
        .with_package(package, Some(&MockModule::new(FOO)))
        .start()
        .await;
    let mut receiver = harness.registry().subscribe();

    harness.environment().uninstall(FOO);
    harness
        .send(LifecycleEvent::PackageRemoved {
            package: FOO.to_owned(),
            replacing: true,
        })
        .await;
    assert!(harness.registry().is_known("foochan"));

    let event = timeout(Duration::from_secs(2), receiver.recv())
        .await
        .expect("deferred removal never settled")
        .unwrap();
    assert!(matches!(*event, RegistryEvent::Uninstalled { .. }));
    assert!(!harness.registry().is_known("foochan"));
}

#[tokio::test]
async fn test_replacing_removal_without_add_rescans_package() {
    let package = PackageBuilder::content(FOO, "foochan").build();
    let module = MockModule::new(FOO);
    let harness = RegistryHarness::new()
        .with_replace_timeout(Duration::from_millis(50))
        .trusting(&package)
        .with_package(package, Some(&module))
        .start()
        .await;
    let mut receiver = harness.registry().subscribe();

    let updated = PackageBuilder::content(FOO, "foochan")
        .version("2.0", 2)
        .build();
    harness.environment().install(updated);
    harness
        .send(LifecycleEvent::PackageRemoved {
            package: FOO.to_owned(),
            replacing: true,
        })
        .await;

    timeout(Duration::from_secs(2), async {
        while let Some(event) = receiver.recv().await {
            if matches!(*event, RegistryEvent::Installed { .. }) {
                break;
            }
        }
    })
    .await
    .expect("deferred update never rescanned");
    let registry = harness.registry();
    assert_eq!(registry.descriptor("foochan").unwrap().version.code, 2);
    assert!(!registry.get("foochan").is_fallback());
    assert_eq!(module.constructed(), 2);
}

#[tokio::test]
async fn test_completed_update_is_not_settled_again() {
    let package = PackageBuilder::content(FOO, "foochan").build();
    let harness = RegistryHarness::new()
        .with_replace_timeout(Duration::from_millis(20))
        .trusting(&package)
        .with_package(package.clone(), Some(&MockModule::new(FOO)))
        .start()
        .await;

    harness.update(package, Some(&MockModule::new(FOO))).await;
    let generation = harness.registry().snapshot().generation();
    tokio::time::sleep(Duration::from_millis(100)).await;
    harness.registry().settled().await.unwrap();

    assert_eq!(harness.registry().snapshot().generation(), generation);
    assert_eq!(harness.recorder().count("extension_installed"), 1);
}

/// Serves catalogs until the library behind them is marked as swapped.
#[derive(Default)]
struct SwappableLoader {
    inner: CatalogModuleLoader,
    swapped: AtomicBool,
}

impl ModuleLoader for SwappableLoader {
    fn load(&self, descriptor: &ExtensionDescriptor) -> Result<Arc<CapabilityBundle>, LoadError> {
        if self.swapped.load(Ordering::SeqCst) {
            return Err(LoadError::LibraryReplaced {
                path: PathBuf::from("/extensions/foochan/libfoochan.so"),
            });
        }
        self.inner.load(descriptor)
    }
}

#[tokio::test]
async fn test_replaced_library_requires_restart() {
    let package = PackageBuilder::content(FOO, "foochan").build();
    let preferences = MemoryPreferences::new();
    preferences
        .grant(
            FOO,
            &Fingerprint::from_certificates(&package.certificates).to_string(),
        )
        .unwrap();
    let environment = Arc::new(MemoryEnvironment::with_packages([package.clone()]));
    let loader = Arc::new(SwappableLoader::default());
    loader.inner.register(FOO, MockModule::new(FOO).catalog());

    let (registry, watcher) =
        RegistryBuilder::new(environment, loader.clone(), Arc::new(preferences)).build();
    tokio::spawn(watcher.run());
    registry.settled().await.unwrap();
    assert!(!registry.get("foochan").is_fallback());
    let mut receiver = registry.subscribe();

    loader.swapped.store(true, Ordering::SeqCst);
    registry
        .notify(LifecycleEvent::PackageAdded {
            package: FOO.to_owned(),
        })
        .await
        .unwrap();

    let entry = registry.snapshot().entry("foochan").cloned().unwrap();
    assert!(entry.load_failed);
    assert!(registry.get("foochan").is_fallback());
    assert!(registry.is_restart_required());
    let first = receiver.recv().await.unwrap();
    assert!(matches!(*first, RegistryEvent::Uninstalled { .. }));
    let second = receiver.recv().await.unwrap();
    assert!(matches!(
        *second,
        RegistryEvent::RestartRequiredChanged {
            restart_required: true,
            ..
        }
    ));
}
