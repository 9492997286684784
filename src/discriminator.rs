use tch::{nn, nn::ModuleT, Tensor};

use crate::conv::{ConvStack, ConvStackConfig, FinalActivation};
use crate::error::Result;
use crate::latent::LatentCode;
use crate::layers::LayerConfig;

/// Added to the joint representation so the joint network never sees a
/// block of exact zeros coming out of the leaky representational stacks.
pub const REPRESENTATION_EPS: f64 = 1e-6;

const DROPOUT: f64 = 0.3;

/// Scores (latent, manifest) pairs as encoder-made or generator-made.
#[derive(Debug)]
pub struct DualDiscriminator {
    x_discriminator: ConvStack,
    z_discriminator: ConvStack,
    zx_discriminator: ConvStack,
}

impl DualDiscriminator {
    /// `latent_dim` is the full latent width, regularised variables included.
    /// Both representations are `2 * latent_dim` wide.
    pub fn new(path: nn::Path, layers: Vec<LayerConfig>, manifest_dim: i64,
               latent_dim: i64) -> Result<DualDiscriminator> {
        let repr_dim = latent_dim * 2;
        let x_config = ConvStackConfig::conv(layers, manifest_dim, repr_dim)
            .with_final_act(FinalActivation::Leaky)
            .with_batch_norm(false)
            .with_dropout(DROPOUT);
        let z_config = ConvStackConfig::pointwise(latent_dim, vec![repr_dim, repr_dim], repr_dim)
            .with_final_act(FinalActivation::Leaky)
            .with_batch_norm(false)
            .with_dropout(DROPOUT);
        let zx_config = ConvStackConfig::pointwise(repr_dim * 2, vec![repr_dim * 2, repr_dim * 2], 1)
            .with_batch_norm(false)
            .with_dropout(DROPOUT);

        Ok(DualDiscriminator {
            x_discriminator: ConvStack::new(&path / "x_discriminator", &x_config)?,
            z_discriminator: ConvStack::new(&path / "z_discriminator", &z_config)?,
            zx_discriminator: ConvStack::new(&path / "zx_discriminator", &zx_config)?,
        })
    }

    /// Width of the manifest-space representation.
    pub fn representation_dim(&self) -> i64 {
        self.x_discriminator.out_dim()
    }

    /// Returns the `(N, 1)` decision logit and the `(N, 2 * latent_dim)`
    /// manifest-space representation.
    pub fn forward_t(&self, code: &LatentCode, xs: &Tensor, train: bool) -> (Tensor, Tensor) {
        let zs = code.flatten();
        let batch = zs.size()[0];
        let z_repr = self.z_discriminator.forward_t(&zs.reshape([batch, -1, 1, 1]), train);
        let x_repr = self.x_discriminator.forward_t(xs, train);
        let zx = Tensor::cat(&[&z_repr, &x_repr], 1) + REPRESENTATION_EPS;
        let logit = self.zx_discriminator.forward_t(&zx, train).flatten(1, -1);
        (logit, x_repr.flatten(1, -1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::latent::LatentLayout;
    use crate::layers::ArchitectureConfig;
    use tch::{Device, Kind};

    #[test]
    fn scores_pairs() {
        let vs = nn::VarStore::new(Device::Cpu);
        let layers = ArchitectureConfig {
            channels: vec![1, 8, 16],
            kernel_size: 4.into(),
            stride: 2.into(),
            padding: vec![3, 1].into(),
            bias: false.into(),
        }
        .layers()
        .unwrap();
        let layout = LatentLayout::new(6, vec![4], 2);
        let d = DualDiscriminator::new(vs.root(), layers, 28, layout.total()).unwrap();
        assert_eq!(d.representation_dim(), 24);

        let code = LatentCode::Structured(layout.sample(3, Device::Cpu));
        let xs = Tensor::rand([3, 1, 28, 28], (Kind::Float, Device::Cpu));
        let (logit, repr) = d.forward_t(&code, &xs, false);
        assert_eq!(logit.size(), vec![3, 1]);
        assert_eq!(repr.size(), vec![3, 24]);
    }

    #[test]
    fn no_batch_norm_anywhere() {
        let vs = nn::VarStore::new(Device::Cpu);
        let layers = vec![LayerConfig::pointwise(2, 4)];
        DualDiscriminator::new(vs.root(), layers, 1, 3).unwrap();
        assert!(vs.variables().keys().all(|k| !k.contains("bn")));
    }

    #[test]
    fn evaluation_is_deterministic() {
        let vs = nn::VarStore::new(Device::Cpu);
        let layers = vec![LayerConfig::pointwise(2, 4)];
        let d = DualDiscriminator::new(vs.root(), layers, 1, 3).unwrap();
        let code = LatentCode::Flat(Tensor::randn([2, 3], (Kind::Float, Device::Cpu)));
        let xs = Tensor::randn([2, 2, 1, 1], (Kind::Float, Device::Cpu));
        let (a, _) = d.forward_t(&code, &xs, false);
        let (b, _) = d.forward_t(&code, &xs, false);
        assert!(a.equal(&b));
    }
}
