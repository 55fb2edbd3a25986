//! Registry reads after the initial scan.

use std::cmp::Ordering;

use chanhost_crypto::Fingerprint;
use chanhost_extensions::{
    MemoryPreferences, OrderStore, TrustEvaluator, TrustState, discovery::Discovery,
};
use chanhost_test::{
    MockModule, PackageBuilder, RegistryHarness, TEST_CERTIFICATE, fingerprint_of,
    init_test_logging,
};

const FOO: &str = "org.example.foochan";
const BAR: &str = "org.example.barchan";

#[tokio::test]
async fn test_untrusted_extension_is_known_but_falls_back() {
    init_test_logging();
    let package = PackageBuilder::content(FOO, "foochan").signed_by(b"AA").build();
    let module = MockModule::new(FOO);
    let harness = RegistryHarness::new()
        .with_host_fingerprint(fingerprint_of(b"HH"))
        .with_package(package, Some(&module))
        .start()
        .await;
    let registry = harness.registry();

    let descriptor = registry.descriptor("foochan").unwrap();
    assert_eq!(descriptor.trust, TrustState::Untrusted);
    assert!(registry.is_known("foochan"));
    assert!(registry.get("foochan").is_fallback());
    assert!(registry.available().is_empty());
    assert_eq!(module.constructed(), 0);
    assert_eq!(
        registry.first_untrusted().map(|d| d.name.clone()),
        Some("foochan".to_owned())
    );
}

#[tokio::test]
async fn test_persisted_grant_loads_extension() {
    let package = PackageBuilder::content(FOO, "foochan").signed_by(b"AA").build();
    let module = MockModule::new(FOO);
    let preferences =
        MemoryPreferences::new().with_grant(FOO, fingerprint_of(b"AA").to_string());
    let harness = RegistryHarness::new()
        .with_host_fingerprint(fingerprint_of(b"HH"))
        .with_preferences(preferences)
        .with_package(package, Some(&module))
        .start()
        .await;
    let registry = harness.registry();

    assert_eq!(
        registry.descriptor("foochan").unwrap().trust,
        TrustState::Trusted
    );
    let bundle = registry.get("foochan");
    assert!(!bundle.is_fallback());
    assert_eq!(bundle.name(), Some("foochan"));
    assert_eq!(module.constructed(), 1);
    assert!(registry.first_untrusted().is_none());
}

#[tokio::test]
async fn test_host_signed_extension_is_trusted_without_grant() {
    let package = PackageBuilder::content(FOO, "foochan").signed_by(b"HH").build();
    let harness = RegistryHarness::new()
        .with_host_fingerprint(fingerprint_of(b"HH"))
        .with_package(package, Some(&MockModule::new(FOO)))
        .start()
        .await;

    assert!(!harness.registry().get("foochan").is_fallback());
}

#[tokio::test]
async fn test_grant_for_other_fingerprint_does_not_apply() {
    let package = PackageBuilder::content(FOO, "foochan")
        .signed_by_all(&[b"AA", b"CC"])
        .build();
    let preferences =
        MemoryPreferences::new().with_grant(FOO, fingerprint_of(b"AA").to_string());
    let harness = RegistryHarness::new()
        .with_preferences(preferences)
        .with_package(package, Some(&MockModule::new(FOO)))
        .start()
        .await;

    assert_eq!(
        harness.registry().descriptor("foochan").unwrap().trust,
        TrustState::Untrusted
    );
}

#[tokio::test]
async fn test_duplicate_name_keeps_first_package() {
    let first = PackageBuilder::content(FOO, "foochan").build();
    let second = PackageBuilder::content(BAR, "foochan").build();
    let harness = RegistryHarness::new()
        .trusting(&first)
        .trusting(&second)
        .with_package(first, Some(&MockModule::new(FOO)))
        .with_package(second, Some(&MockModule::new(BAR)))
        .start()
        .await;
    let registry = harness.registry();

    assert_eq!(registry.available().len(), 1);
    assert_eq!(registry.package_of("foochan").as_deref(), Some(FOO));
    assert!(!registry.is_extension_package(BAR));
}

#[tokio::test]
async fn test_names_are_unique_in_snapshot() {
    let mut harness = RegistryHarness::new();
    for (i, name) in ["aaaa", "bbbb", "aaaa", "cccc", "bbbb"].iter().enumerate() {
        let package = PackageBuilder::content(&format!("pkg.{i}"), name).build();
        harness = harness.with_package(package, None);
    }
    let harness = harness.start().await;

    let names = harness.registry().snapshot().names();
    assert_eq!(names, vec!["aaaa", "bbbb", "cccc"]);
    let descriptors = harness.registry().descriptors();
    assert_eq!(descriptors[0].package, "pkg.0");
    assert_eq!(descriptors[1].package, "pkg.1");
}

#[tokio::test]
async fn test_get_never_returns_nothing() {
    let package = PackageBuilder::content(FOO, "foochan").build();
    let harness = RegistryHarness::new()
        .trusting(&package)
        .with_package(package, Some(&MockModule::new(FOO)))
        .start()
        .await;
    let registry = harness.registry();

    for name in ["", "unknown", "FOOCHAN", "foochan "] {
        let bundle = registry.get(name);
        assert!(bundle.is_fallback(), "{name:?}");
        assert!(!bundle.locator().is_chan_host("example.org"));
    }
    assert!(std::sync::Arc::ptr_eq(&registry.get(""), &registry.fallback()));
}

#[tokio::test]
async fn test_library_is_not_known_as_content() {
    let library = PackageBuilder::library("org.example.webmlib", "webmlib").build();
    let harness = RegistryHarness::new()
        .trusting(&library)
        .with_package(library, None)
        .start()
        .await;
    let registry = harness.registry();

    assert!(!registry.is_known("webmlib"));
    assert!(registry.get("webmlib").is_fallback());
    assert_eq!(
        registry.library("webmlib").unwrap().package,
        "org.example.webmlib"
    );
    assert!(registry.is_extension_package("org.example.webmlib"));
    assert!(registry.library("foochan").is_none());
}

#[tokio::test]
async fn test_unsupported_version_is_visible_but_never_loaded() {
    let package = PackageBuilder::content(FOO, "foochan").api_version(7).build();
    let module = MockModule::new(FOO);
    let harness = RegistryHarness::new()
        .trusting(&package)
        .with_package(package, Some(&module))
        .start()
        .await;
    let registry = harness.registry();

    assert!(registry.is_known("foochan"));
    assert!(!registry.descriptor("foochan").unwrap().is_supported());
    assert!(registry.get("foochan").is_fallback());
    assert_eq!(module.constructed(), 0);
}

#[tokio::test]
async fn test_load_failures_stay_unloaded_and_isolated() {
    let broken = [
        ("pkg.one", "onechan", MockModule::new("pkg.one").missing_markup()),
        ("pkg.two", "twochan", MockModule::new("pkg.two").failing_constructor()),
        ("pkg.three", "threechan", MockModule::new("pkg.three").panicking_constructor()),
        ("pkg.four", "fourchan", MockModule::new("pkg.four").consuming_twice()),
        ("pkg.five", "fivechan", MockModule::new("pkg.five").failing_init()),
    ];
    let good = PackageBuilder::content(FOO, "foochan").build();

    let mut harness = RegistryHarness::new().trusting(&good);
    for (id, name, module) in &broken {
        let package = PackageBuilder::content(id, name).build();
        harness = harness.trusting(&package).with_package(package, Some(module));
    }
    let harness = harness
        .with_package(good, Some(&MockModule::new(FOO)))
        .start()
        .await;
    let registry = harness.registry();
    let snapshot = registry.snapshot();

    for (_, name, _) in &broken {
        let entry = snapshot.entry(name).unwrap();
        assert_eq!(entry.trust(), TrustState::Trusted, "{name}");
        assert!(entry.load_failed, "{name}");
        assert!(registry.get(name).is_fallback(), "{name}");
    }
    assert_eq!(registry.available().len(), 1);
    assert_eq!(registry.default_name().as_deref(), Some("foochan"));
    assert!(!registry.has_multiple_available());
}

#[tokio::test]
async fn test_host_template_parser_is_preferred() {
    use chanhost_extensions::{ChanMarkup, ModuleCatalog, TEMPLATE_PARSER_CLASS};

    struct HostParser;
    impl ChanMarkup for HostParser {}

    let mut host = ModuleCatalog::new();
    host.register_markup(TEMPLATE_PARSER_CLASS, |_| Ok(HostParser));

    let package = PackageBuilder::content(FOO, "foochan")
        .meta(
            chanhost_extensions::discovery::meta::CHAN_CLASS_MARKUP,
            TEMPLATE_PARSER_CLASS,
        )
        .build();
    let harness = RegistryHarness::with_host_catalog(host)
        .trusting(&package)
        .with_package(package, Some(&MockModule::new(FOO).missing_markup()))
        .start()
        .await;

    assert!(!harness.registry().get("foochan").is_fallback());
}

#[tokio::test]
async fn test_constructors_resolve_host_template_parser_first() {
    use chanhost_extensions::{ModuleCatalog, TEMPLATE_PARSER_CLASS};
    use chanhost_test::MockTemplateParser;

    let mut host = ModuleCatalog::new();
    host.register_shared(TEMPLATE_PARSER_CLASS, MockTemplateParser::new("host"));

    let package = PackageBuilder::content(FOO, "foochan").build();
    let module = MockModule::new(FOO).bundling_template_parser();
    let harness = RegistryHarness::with_host_catalog(host)
        .trusting(&package)
        .with_package(package, Some(&module))
        .start()
        .await;

    assert!(!harness.registry().get("foochan").is_fallback());
    assert_eq!(module.resolved_parser().as_deref(), Some("host"));
}

#[tokio::test]
async fn test_constructors_fall_back_to_bundled_template_parser() {
    let package = PackageBuilder::content(FOO, "foochan").build();
    let module = MockModule::new(FOO).bundling_template_parser();
    let harness = RegistryHarness::new()
        .trusting(&package)
        .with_package(package, Some(&module))
        .start()
        .await;

    assert!(!harness.registry().get("foochan").is_fallback());
    assert_eq!(module.resolved_parser().as_deref(), Some(FOO));
}

#[tokio::test]
async fn test_ordering_follows_preferences_then_discovery() {
    let names = ["aaaa", "bbbb", "cccc", "dddd"];
    let preferences = MemoryPreferences::new().with_order(["cccc", "gone", "aaaa"]);
    let mut harness = RegistryHarness::new().with_preferences(preferences);
    for name in names {
        let id = format!("pkg.{name}");
        let package = PackageBuilder::content(&id, name).build();
        harness = harness
            .trusting(&package)
            .with_package(package, Some(&MockModule::new(id)));
    }
    let harness = harness.start().await;
    let registry = harness.registry();

    assert_eq!(
        registry.snapshot().names(),
        vec!["cccc", "aaaa", "bbbb", "dddd"]
    );
    let available: Vec<_> = registry
        .available()
        .iter()
        .filter_map(|b| b.name().map(str::to_owned))
        .collect();
    assert_eq!(available, vec!["cccc", "aaaa", "bbbb", "dddd"]);
    assert_eq!(registry.default_name().as_deref(), Some("cccc"));
    assert!(registry.has_multiple_available());

    assert_eq!(registry.compare("cccc", "aaaa"), Ordering::Less);
    assert_eq!(registry.compare("dddd", "bbbb"), Ordering::Greater);
    assert_eq!(registry.compare("bbbb", "bbbb"), Ordering::Equal);
    assert_eq!(registry.compare("gone", "aaaa"), Ordering::Less);
    assert_eq!(registry.compare("gone", "missing"), Ordering::Equal);
}

#[tokio::test]
async fn test_scan_ordering_is_stable() {
    let build = || {
        let mut harness = RegistryHarness::new();
        for name in ["zzzz", "mmmm", "aaaa"] {
            let package = PackageBuilder::content(&format!("pkg.{name}"), name).build();
            harness = harness.with_package(package, None);
        }
        harness
    };

    let first = build().start().await;
    let second = build().start().await;
    let a = first.registry().snapshot();
    let b = second.registry().snapshot();
    assert_eq!(a.names(), b.names());
    assert_eq!(a.names(), vec!["zzzz", "mmmm", "aaaa"]);
}

#[tokio::test]
async fn test_set_order_republishes() {
    let mut harness = RegistryHarness::new();
    for name in ["aaaa", "bbbb", "cccc"] {
        let package = PackageBuilder::content(&format!("pkg.{name}"), name).build();
        harness = harness.with_package(package, None);
    }
    let harness = harness.start().await;
    let registry = harness.registry();
    let before = registry.snapshot().generation();

    registry
        .set_order(vec!["cccc".to_owned(), "bbbb".to_owned()])
        .await
        .unwrap();

    assert_eq!(registry.snapshot().names(), vec!["cccc", "bbbb", "aaaa"]);
    assert!(registry.snapshot().generation() > before);
    assert_eq!(harness.preferences().order(), vec!["cccc", "bbbb"]);
}

#[tokio::test]
async fn test_archive_mapping() {
    let foo = PackageBuilder::content(FOO, "foochan").build();
    let bar = PackageBuilder::content(BAR, "barchan").build();
    let baz = PackageBuilder::content("org.example.bazchan", "bazchan").build();
    let harness = RegistryHarness::new()
        .trusting(&foo)
        .trusting(&bar)
        .trusting(&baz)
        .with_package(foo, Some(&MockModule::new(FOO).serving("foo.example")))
        .with_package(
            bar,
            Some(
                &MockModule::new(BAR)
                    .serving("bar.example")
                    .archiving("foo.example")
                    .archiving("nowhere.example"),
            ),
        )
        .with_package(
            baz,
            Some(
                &MockModule::new("org.example.bazchan")
                    .local_mode()
                    .archiving("foo.example")
                    .archiving("foo.example"),
            ),
        )
        .start()
        .await;
    let registry = harness.registry();

    assert_eq!(registry.archive_names("foochan"), vec!["barchan", "bazchan"]);
    assert!(registry.archive_names("barchan").is_empty());
    assert!(registry.archive_names("unknown").is_empty());
    assert_eq!(
        registry.chan_name_by_host("bar.example").as_deref(),
        Some("barchan")
    );
    assert!(registry.chan_name_by_host("nowhere.example").is_none());

    assert!(registry.can_be_archived("foochan"));
    assert!(registry.can_be_archived("barchan"));
    assert!(!registry.can_be_archived("bazchan"));
}

#[test]
fn test_trust_evaluation_is_deterministic() {
    let discovery = Discovery::new();
    let package = PackageBuilder::content(FOO, "foochan")
        .signed_by_all(&[b"BB", b"AA"])
        .build();
    let descriptor = discovery.describe(&package).unwrap().unwrap();
    let granted = MemoryPreferences::new().with_grant(FOO, descriptor.fingerprint.to_string());
    let empty = MemoryPreferences::new();

    for host in [Fingerprint::empty(), fingerprint_of(TEST_CERTIFICATE)] {
        let evaluator = TrustEvaluator::new(host);
        let first = evaluator.evaluate(&descriptor, &granted);
        for _ in 0..3 {
            assert_eq!(evaluator.evaluate(&descriptor, &granted), first);
        }
        assert_eq!(first, TrustState::Trusted);
        assert_eq!(
            evaluator.evaluate(&descriptor, &empty),
            TrustState::Untrusted
        );
    }
}
