/// Recursively deep-merge `overlay` into `base`.
///
/// - Tables merge recursively per-field.
/// - Scalars and arrays from the overlay **replace** the base value.
pub fn deep_merge(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                if let Some(base_val) = base_table.get_mut(key) {
                    deep_merge(base_val, overlay_val);
                } else {
                    base_table.insert(key.clone(), overlay_val.clone());
                }
            }
        },
        (base, overlay) => {
            *base = overlay.clone();
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_merge_and_arrays_replace() {
        let mut base: toml::Value = toml::from_str(
            r#"
            [registry]
            min_api_version = 1
            reserved_names = ["client", "meta"]
            "#,
        )
        .unwrap();
        let overlay: toml::Value = toml::from_str(
            r#"
            [registry]
            reserved_names = ["client"]
            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        deep_merge(&mut base, &overlay);

        let registry = base.get("registry").unwrap();
        assert_eq!(registry.get("min_api_version").unwrap().as_integer(), Some(1));
        assert_eq!(
            registry.get("reserved_names").unwrap().as_array().unwrap().len(),
            1
        );
        assert_eq!(
            base.get("logging").unwrap().get("level").unwrap().as_str(),
            Some("debug")
        );
    }
}
