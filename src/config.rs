use log::debug;

use crate::error::{ModelError, Result};
use crate::layers::{spatial_trace, ArchitectureConfig, LayerConfig, LayerParam};
use crate::latent::LatentLayout;

/// Construction parameters of an [`InfoBiGan`](crate::InfoBiGan).
///
/// Layer parameters follow the convolutional (encoder and discriminator)
/// path; the generator is built from the mirrored path.
#[derive(Debug, Clone, PartialEq)]
pub struct InfoBiGanConfig {
    pub channels: Vec<i64>,
    pub kernel_size: LayerParam<i64>,
    pub stride: LayerParam<i64>,
    pub padding: LayerParam<i64>,
    pub bias: LayerParam<bool>,
    /// Side length of the square manifest-space input.
    pub manifest_dim: i64,
    /// Number of unregularised noise variables.
    pub latent_dim: i64,
    /// Level count of each categorical variable, in order.
    pub reg_categorical: Vec<i64>,
    pub reg_gaussian: i64,
}

impl Default for InfoBiGanConfig {
    fn default() -> Self {
        InfoBiGanConfig {
            channels: vec![1, 128, 256, 512, 1024],
            kernel_size: LayerParam::Uniform(4),
            stride: LayerParam::Uniform(2),
            padding: LayerParam::PerLayer(vec![3, 1, 1, 1]),
            bias: LayerParam::Uniform(false),
            manifest_dim: 28,
            latent_dim: 100,
            reg_categorical: vec![10],
            reg_gaussian: 2,
        }
    }
}

impl InfoBiGanConfig {
    pub fn architecture(&self) -> ArchitectureConfig {
        ArchitectureConfig {
            channels: self.channels.clone(),
            kernel_size: self.kernel_size.clone(),
            stride: self.stride.clone(),
            padding: self.padding.clone(),
            bias: self.bias.clone(),
        }
    }

    pub fn layout(&self) -> LatentLayout {
        LatentLayout::new(self.latent_dim, self.reg_categorical.clone(), self.reg_gaussian)
    }

    /// Validate the configuration and derive every network's shapes.
    ///
    /// Holds no tensors; [`InfoBiGan::new`](crate::InfoBiGan::new) only
    /// allocates parameters from a plan that this returned.
    pub fn plan(&self) -> Result<ModelPlan> {
        let layout = self.layout();
        if layout.noise <= 0 {
            return Err(ModelError::config("latent_dim", "must be positive"));
        }
        if layout.categorical.iter().any(|&levels| levels <= 0) {
            return Err(ModelError::config("reg_categorical", "level counts must be positive"));
        }
        if layout.gaussian < 0 {
            return Err(ModelError::config("reg_gaussian", "must not be negative"));
        }

        let architecture = self.architecture();
        let layers = architecture.layers()?;
        let mirrored = architecture.mirrored()?.layers()?;
        let trace = spatial_trace(&layers, self.manifest_dim)?;
        debug!("manifest path {:?}, latent layout {:?}", trace, layout);

        // Shared by the discriminator's representations and the regulariser.
        let representation_dim = layout.total() * 2;
        Ok(ModelPlan {
            layout,
            layers,
            mirrored,
            manifest_dim: self.manifest_dim,
            representation_dim,
        })
    }
}

/// Validated shapes for all four networks.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPlan {
    pub layout: LatentLayout,
    /// Encoder and discriminator path.
    pub layers: Vec<LayerConfig>,
    /// Generator path, in upsampling order.
    pub mirrored: Vec<LayerConfig>,
    pub manifest_dim: i64,
    pub representation_dim: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_derives_shared_widths() {
        let plan = InfoBiGanConfig::default().plan().unwrap();
        assert_eq!(plan.layout.total(), 112);
        assert_eq!(plan.representation_dim, 224);
        assert_eq!(plan.layers.len(), 4);
        assert_eq!(plan.mirrored[0].in_channels, 1024);
        assert_eq!(plan.mirrored[3].out_channels, 1);
    }

    #[test]
    fn plan_rejects_bad_latent_widths() {
        let config = InfoBiGanConfig { reg_categorical: vec![10, 0], ..InfoBiGanConfig::default() };
        assert!(matches!(
            config.plan().unwrap_err(),
            ModelError::InvalidConfig { field: "reg_categorical", .. }
        ));
        let config = InfoBiGanConfig { latent_dim: 0, ..InfoBiGanConfig::default() };
        assert!(config.plan().is_err());
    }

    #[test]
    fn plan_rejects_a_manifest_too_small_for_the_path() {
        let config = InfoBiGanConfig { manifest_dim: 2, ..InfoBiGanConfig::default() };
        assert!(matches!(
            config.plan().unwrap_err(),
            ModelError::InvalidConfig { field: "architecture", .. }
        ));
    }
}
