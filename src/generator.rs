use tch::{nn, nn::ModuleT, Tensor};

use crate::conv::{TransposeStack, TransposeStackConfig};
use crate::error::Result;
use crate::latent::LatentCode;
use crate::layers::LayerConfig;

/// Transpose-convolutional generator fed by structured or flat latent codes.
#[derive(Debug)]
pub struct RegularisedGenerator {
    net: TransposeStack,
    latent_dim: i64,
}

impl RegularisedGenerator {
    /// `layers` run in upsampling order, from the latent code outwards.
    pub fn new(path: nn::Path, layers: Vec<LayerConfig>, latent_dim: i64,
               target_dim: i64, batch_norm: bool) -> Result<RegularisedGenerator> {
        let config = TransposeStackConfig { latent_dim, layers, target_dim, batch_norm };
        let net = TransposeStack::new(path, &config)?;
        Ok(RegularisedGenerator { net, latent_dim })
    }

    pub fn latent_dim(&self) -> i64 {
        self.latent_dim
    }

    pub fn forward_t(&self, code: &LatentCode, train: bool) -> Tensor {
        let zs = code.flatten();
        let batch = zs.size()[0];
        self.net.forward_t(&zs.reshape([batch, -1, 1, 1]), train)
    }
}

impl nn::ModuleT for RegularisedGenerator {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        RegularisedGenerator::forward_t(self, &LatentCode::Flat(xs.shallow_clone()), train)
    }
}
