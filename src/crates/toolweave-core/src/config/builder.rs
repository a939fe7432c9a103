//! Configuration builder trait
//!
//! A common shape for configuration structures: defaults, validation,
//! environment loading and merging of several sources.

use crate::error::Result;

/// Trait for configuration structures that support validation and merging
///
/// ```rust,ignore
/// let options = Options::from_env("TOOLWEAVE_")?;
/// let mut merged = Options::from_yaml_file("toolweave.yaml")?;
/// merged.merge(options);
/// merged.validate()?;
/// ```
pub trait ConfigBuilder: Default + Clone {
    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Load configuration from `{PREFIX}{FIELD_NAME}` environment variables,
    /// starting from the defaults
    fn from_env(prefix: &str) -> Result<Self>;

    /// Merge another configuration into this one; set values in `other` win
    fn merge(&mut self, other: Self) -> &mut Self;

    /// Default configuration, validated
    fn build() -> Result<Self> {
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }
}
