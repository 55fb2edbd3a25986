//! `chanhost archives` - extensions able to archive threads of a board.

use anyhow::bail;
use chanhost_extensions::ExtensionRegistry;
use serde_json::json;

use crate::formatter::OutputFormat;
use crate::theme::Theme;

pub(crate) fn show_archives(
    registry: &ExtensionRegistry,
    name: &str,
    format: OutputFormat,
) -> anyhow::Result<()> {
    if !registry.is_known(name) {
        bail!("no content extension named '{name}' is installed");
    }

    let archivers = registry.archive_names(name);
    let archivable = registry.can_be_archived(name);

    if format == OutputFormat::Json {
        let doc = json!({
            "name": name,
            "can_be_archived": archivable,
            "archivers": archivers,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("{}", Theme::header(&format!("Archives for {name}")));
    if archivers.is_empty() {
        println!("{}", Theme::info("No archive extension serves this board"));
    } else {
        for archiver in &archivers {
            println!("  {archiver}");
        }
    }
    if !archivable {
        println!(
            "{}",
            Theme::dimmed("Threads of this board cannot be archived")
        );
    }
    Ok(())
}
