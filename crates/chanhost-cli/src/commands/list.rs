//! `chanhost list` - installed extensions in display order.

use chanhost_extensions::{ExtensionDescriptor, ExtensionEntry, ExtensionRegistry};
use serde::Serialize;

use crate::formatter::OutputFormat;
use crate::theme::Theme;

/// One row of `list --format json`.
#[derive(Serialize)]
struct ListRow<'a> {
    #[serde(flatten)]
    descriptor: &'a ExtensionDescriptor,
    loaded: bool,
    loading: bool,
    load_failed: bool,
}

impl<'a> From<&'a ExtensionEntry> for ListRow<'a> {
    fn from(entry: &'a ExtensionEntry) -> Self {
        Self {
            descriptor: &entry.descriptor,
            loaded: entry.is_loaded(),
            loading: entry.loading,
            load_failed: entry.load_failed,
        }
    }
}

pub(crate) fn list_extensions(
    registry: &ExtensionRegistry,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let snapshot = registry.snapshot();

    if format == OutputFormat::Json {
        let rows: Vec<ListRow<'_>> = snapshot.entries().iter().map(ListRow::from).collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if snapshot.is_empty() {
        println!("{}", Theme::info("No extensions installed"));
        return Ok(());
    }

    println!("{}", Theme::header("Installed Extensions"));
    println!(
        "  {:<16} {:<8} {:<10} {:<12} {:<18} PACKAGE",
        "NAME", "KIND", "TRUST", "STATE", "SIGNER"
    );
    println!("{}", Theme::separator());
    for entry in snapshot.entries() {
        let descriptor = &entry.descriptor;
        println!(
            "  {:<16} {:<8} {:<10} {:<12} {:<18} {}",
            descriptor.name,
            descriptor.kind,
            Theme::trust(descriptor.trust),
            state_label(entry),
            Theme::fingerprint(&descriptor.fingerprint.to_string()),
            Theme::dimmed(&format!(
                "{} {}",
                descriptor.package, descriptor.version.name
            )),
        );
    }
    println!(
        "\n{}",
        Theme::dimmed(&format!("{} extension(s)", snapshot.len()))
    );

    if let Some(pending) = registry.first_untrusted() {
        println!(
            "{}",
            Theme::warning(&format!(
                "{} is waiting for a trust decision: chanhost trust {}",
                pending.name, pending.name
            ))
        );
    }
    if registry.is_restart_required() {
        println!(
            "{}",
            Theme::warning("A loaded library changed; restart the host to pick it up")
        );
    }
    Ok(())
}

fn state_label(entry: &ExtensionEntry) -> String {
    let descriptor = &entry.descriptor;
    if entry.is_loaded() {
        Theme::success("loaded")
    } else if entry.loading {
        Theme::info("loading")
    } else if entry.load_failed {
        Theme::error("failed")
    } else if descriptor.is_content() && !descriptor.is_supported() {
        Theme::warning("unsupported")
    } else {
        Theme::dimmed("idle")
    }
}
