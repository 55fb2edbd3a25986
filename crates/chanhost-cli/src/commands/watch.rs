//! `chanhost watch` - run the registry and print what changes.

use anyhow::Context;
use chanhost_config::Config;
use chanhost_events::Event;
use chanhost_extensions::{DirectoryWatcher, ExtensionRegistry, RegistryEvent, WatcherConfig};
use serde_json::json;

use crate::formatter::OutputFormat;
use crate::theme::Theme;

pub(crate) async fn run_watch(
    registry: ExtensionRegistry,
    config: &Config,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let mut events = registry.subscribe();

    let directory_task = if config.discovery.watch {
        let watcher = DirectoryWatcher::new(
            WatcherConfig::from(&config.discovery),
            registry.clone(),
        )
        .context("failed to watch extension directories")?;
        Some(tokio::spawn(watcher.run()))
    } else {
        None
    };

    if format == OutputFormat::Pretty {
        println!(
            "{}",
            Theme::header(&format!(
                "Watching {} extension(s); press Ctrl-C to stop",
                registry.snapshot().len()
            ))
        );
        if let Some(pending) = registry.first_untrusted() {
            println!(
                "{}",
                Theme::warning(&format!("{} is waiting for a trust decision", pending.name))
            );
        }
    }

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for Ctrl-C")?;
                break;
            },
            event = events.recv() => match event {
                Some(event) => print_event(&event, format),
                None => break,
            },
        }
    }

    if let Some(task) = directory_task {
        task.abort();
    }
    Ok(())
}

fn print_event(event: &RegistryEvent, format: OutputFormat) {
    let metadata = event.metadata();

    if format == OutputFormat::Json {
        let line = json!({
            "type": event.event_type(),
            "extension": event.extension_name(),
            "timestamp": metadata.timestamp.to_rfc3339(),
        });
        println!("{line}");
        return;
    }

    let name = event.extension_name().unwrap_or_default();
    let message = match event {
        RegistryEvent::Installed { .. } => Theme::success(&format!("{name} installed")),
        RegistryEvent::Uninstalled { .. } => Theme::info(&format!("{name} uninstalled")),
        RegistryEvent::UntrustedPending { .. } => Theme::warning(&format!(
            "{name} needs a trust decision: chanhost trust {name}"
        )),
        RegistryEvent::RestartRequiredChanged { .. } => {
            Theme::warning("A loaded library changed; restart the host to pick it up")
        },
    };
    println!(
        "{} {message}",
        Theme::dimmed(&metadata.timestamp.format("%H:%M:%S").to_string())
    );
}
