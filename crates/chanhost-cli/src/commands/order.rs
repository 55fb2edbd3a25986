//! `chanhost order` - persist the display order.

use anyhow::Context;
use chanhost_extensions::ExtensionRegistry;

use crate::theme::Theme;

pub(crate) async fn set_order(
    registry: &ExtensionRegistry,
    names: Vec<String>,
) -> anyhow::Result<()> {
    for name in &names {
        if registry.descriptor(name).is_none() {
            println!(
                "{}",
                Theme::dimmed(&format!("{name} is not installed; keeping its position"))
            );
        }
    }

    registry
        .set_order(names)
        .await
        .context("failed to save extension order")?;

    println!("{}", Theme::success("Extension order saved"));
    for (position, name) in registry.snapshot().names().iter().enumerate() {
        println!("  {:>2}. {name}", position.saturating_add(1));
    }
    Ok(())
}
