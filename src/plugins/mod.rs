//! Built-in plugins, bundled as the default [`ConfigPackage`].
pub mod column_detectors;
pub mod hooks;
pub mod row_detectors;
pub mod transforms;

use crate::registry::ConfigPackage;
use crate::registry::FnPlugin;

pub fn builtin_package() -> ConfigPackage {
    ConfigPackage::new()
        .with_row_detector(FnPlugin::new("header_keywords", row_detectors::register_header_keywords))
        .with_row_detector(FnPlugin::new("text_shape", row_detectors::register_text_shape))
        .with_column_detector(FnPlugin::new("header_names", column_detectors::register_header_names))
        .with_column_detector(FnPlugin::new("value_patterns", column_detectors::register_value_patterns))
        .with_transform(FnPlugin::new("field_transforms", transforms::register_field_transforms))
        .with_transform(FnPlugin::new("field_validators", transforms::register_field_validators))
        .with_hook(FnPlugin::new("table_summary", hooks::register_table_summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::tests::manifest;
    use crate::registry::HookKind;
    use crate::registry::Registry;

    #[test]
    fn builtin_package_registers_every_group() {
        let manifest = manifest();
        let mut registry = Registry::new();
        for field in manifest.fields() {
            registry.register_field(field).unwrap();
        }
        builtin_package().register_all(&mut registry, &manifest).unwrap();
        registry.finalize();

        let rows: Vec<&str> = registry.row_detectors().iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(rows, vec!["header_keywords", "text_shape"]);
        let columns: Vec<&str> = registry.column_detectors().iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(columns, vec!["header_names"]);
        assert_eq!(registry.validators_for("member_id").count(), 1);
        assert!(registry.has_hook(HookKind::TableWritten, "table_summary"));
    }
}
