use crate::error::ConfigError;
use crate::manifest::ManifestContext;
use crate::registry::Registry;
use tracing::debug;

/// A unit of registration: adds its callables to the registry.
pub trait Plugin {
    fn name(&self) -> &str;

    fn register(&self, registry: &mut Registry, manifest: &ManifestContext) -> Result<(), ConfigError>;
}

/// A plugin backed by a plain function.
pub struct FnPlugin<F> {
    name: String,
    register: F,
}

impl<F> FnPlugin<F>
where
    F: Fn(&mut Registry, &ManifestContext) -> Result<(), ConfigError>,
{
    pub fn new(name: &str, register: F) -> Self {
        Self { name: name.to_owned(), register }
    }
}

impl<F> Plugin for FnPlugin<F>
where
    F: Fn(&mut Registry, &ManifestContext) -> Result<(), ConfigError>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn register(&self, registry: &mut Registry, manifest: &ManifestContext) -> Result<(), ConfigError> {
        (self.register)(registry, manifest)
    }
}

/// A bundle of plugins, grouped the way a config package lays them out.
/// Each group is registered in sorted plugin-name order.
#[derive(Default)]
pub struct ConfigPackage {
    pub row_detectors: Vec<Box<dyn Plugin>>,
    pub column_detectors: Vec<Box<dyn Plugin>>,
    /// Transforms and validators
    pub transforms: Vec<Box<dyn Plugin>>,
    pub hooks: Vec<Box<dyn Plugin>>,
}

impl ConfigPackage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_row_detector(mut self, plugin: impl Plugin + 'static) -> Self {
        self.row_detectors.push(Box::new(plugin));
        self
    }

    pub fn with_column_detector(mut self, plugin: impl Plugin + 'static) -> Self {
        self.column_detectors.push(Box::new(plugin));
        self
    }

    pub fn with_transform(mut self, plugin: impl Plugin + 'static) -> Self {
        self.transforms.push(Box::new(plugin));
        self
    }

    pub fn with_hook(mut self, plugin: impl Plugin + 'static) -> Self {
        self.hooks.push(Box::new(plugin));
        self
    }

    /// Appends every group of `other` to this package.
    pub fn merge(mut self, other: ConfigPackage) -> Self {
        self.row_detectors.extend(other.row_detectors);
        self.column_detectors.extend(other.column_detectors);
        self.transforms.extend(other.transforms);
        self.hooks.extend(other.hooks);
        self
    }

    /// Registers every plugin: row detectors, column detectors, transforms,
    /// then hooks, each group in sorted plugin-name order.
    pub fn register_all(&self, registry: &mut Registry, manifest: &ManifestContext) -> Result<(), ConfigError> {
        let groups = [
            ("row_detectors", &self.row_detectors),
            ("column_detectors", &self.column_detectors),
            ("transforms", &self.transforms),
            ("hooks", &self.hooks),
        ];
        for (group, plugins) in groups {
            let mut ordered: Vec<&dyn Plugin> = plugins.iter().map(|plugin| plugin.as_ref()).collect();
            ordered.sort_by(|left, right| left.name().cmp(right.name()));
            for plugin in ordered {
                debug!(group, plugin = plugin.name(), "registering plugin");
                plugin.register(registry, manifest)?;
            }
        }
        Ok(())
    }
}
