//! `chanhost trust` and `chanhost discard` - answer a pending trust prompt.

use anyhow::{Context, bail};
use chanhost_extensions::{ExtensionRegistry, TrustState};

use crate::theme::Theme;

pub(crate) async fn decide(
    registry: &ExtensionRegistry,
    name: &str,
    trusted: bool,
) -> anyhow::Result<()> {
    let Some(descriptor) = registry.descriptor(name) else {
        bail!("no extension named '{name}' is installed");
    };

    if descriptor.trust != TrustState::Untrusted {
        println!(
            "{}",
            Theme::info(&format!("{name} is already {}", descriptor.trust))
        );
        return Ok(());
    }

    registry
        .set_trust(name, trusted)
        .await
        .with_context(|| format!("failed to record trust decision for {name}"))?;

    if !trusted {
        println!(
            "{}",
            Theme::success(&format!(
                "Discarded {name}; it stays unloaded until reinstalled"
            ))
        );
        return Ok(());
    }

    let snapshot = registry.snapshot();
    match snapshot.entry(name) {
        Some(entry) if entry.is_loaded() => {
            println!(
                "{}",
                Theme::success(&format!(
                    "Trusted {name} signed by {}",
                    descriptor.fingerprint
                ))
            );
        },
        Some(entry) if entry.load_failed => {
            println!(
                "{}",
                Theme::warning(&format!(
                    "Trusted {name}, but its code failed to load; run with --verbose for details"
                ))
            );
        },
        _ => {
            println!("{}", Theme::success(&format!("Trusted {name}")));
        },
    }
    Ok(())
}
