use tch::{nn, nn::Module, nn::ModuleT, Kind, Tensor};

use crate::conv::{ConvStack, ConvStackConfig, FinalActivation};
use crate::error::Result;
use crate::latent::{LatentLayout, StructuredCode};
use crate::layers::LayerConfig;

pub(crate) fn head(path: nn::Path, in_dim: i64, out_dim: i64) -> nn::Conv2D {
    let config = nn::ConvConfig { stride: 1, padding: 0, bias: true, ..Default::default() };
    nn::conv2d(path, in_dim, out_dim, 1, config)
}

/// Output head for one categorical variable.
#[derive(Debug)]
pub struct CategoricalHead {
    pub levels: i64,
    conv: nn::Conv2D,
}

impl CategoricalHead {
    pub fn new(path: nn::Path, in_dim: i64, levels: i64) -> CategoricalHead {
        CategoricalHead { levels, conv: head(path, in_dim, levels) }
    }

    /// Probabilities over the levels, `(N, levels)`.
    pub fn forward(&self, hidden: &Tensor) -> Tensor {
        self.conv.forward(hidden).softmax(1, Kind::Float).flatten(1, -1)
    }
}

/// Maps manifest-space data to a structured latent code.
#[derive(Debug)]
pub struct RegularisedEncoder {
    conv: ConvStack,
    noise: nn::Conv2D,
    categorical: Vec<CategoricalHead>,
    gaussian: Option<nn::Conv2D>,
}

impl RegularisedEncoder {
    pub fn new(path: nn::Path, layers: Vec<LayerConfig>, manifest_dim: i64,
               hidden_dim: i64, layout: &LatentLayout) -> Result<RegularisedEncoder> {
        let config = ConvStackConfig::conv(layers, manifest_dim, hidden_dim)
            .with_final_act(FinalActivation::Leaky)
            .with_batch_norm(false)
            .with_dropout(0.3);
        let conv = ConvStack::new(&path / "conv", &config)?;
        let noise = head(&path / "noise", hidden_dim, layout.noise);
        let categorical = layout
            .categorical
            .iter()
            .enumerate()
            .map(|(i, &levels)| CategoricalHead::new(&path / "categorical" / i, hidden_dim, levels))
            .collect();
        let gaussian = (layout.gaussian > 0).then(|| head(&path / "gaussian", hidden_dim, layout.gaussian));
        Ok(RegularisedEncoder { conv, noise, categorical, gaussian })
    }

    pub fn forward_t(&self, xs: &Tensor, train: bool) -> StructuredCode {
        let hidden = self.conv.forward_t(xs, train);
        StructuredCode {
            noise: self.noise.forward(&hidden).flatten(1, -1),
            categorical: self.categorical.iter().map(|h| h.forward(&hidden)).collect(),
            gaussian: self.gaussian.as_ref().map(|g| g.forward(&hidden).flatten(1, -1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::ArchitectureConfig;
    use tch::Device;

    #[test]
    fn encodes_into_declared_layout() {
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
        let layout = LatentLayout::new(6, vec![4, 3], 2);
        let encoder = RegularisedEncoder::new(vs.root(), layers, 28, 6, &layout).unwrap();

        let xs = Tensor::randn([5, 1, 28, 28], (Kind::Float, Device::Cpu)) * 10.0;
        let code = encoder.forward_t(&xs, false);
        assert_eq!(code.noise.size(), vec![5, 6]);
        assert_eq!(code.gaussian.as_ref().map(Tensor::size), Some(vec![5, 2]));
        assert_eq!(code.categorical.len(), 2);
        assert_eq!(code.categorical[0].size(), vec![5, 4]);
        assert_eq!(code.categorical[1].size(), vec![5, 3]);
        for probs in &code.categorical {
            let sums = probs.sum_dim_intlist(1, false, Kind::Float);
            let err = (sums - 1.0).abs().max().double_value(&[]);
            assert!(err < 1e-5, "categorical head sums drift by {err}");
        }
    }

    #[test]
    fn no_gaussian_head_without_gaussian_variables() {
        let vs = nn::VarStore::new(Device::Cpu);
        let layers = vec![LayerConfig::pointwise(3, 4)];
        let layout = LatentLayout::new(2, vec![5], 0);
        let encoder = RegularisedEncoder::new(vs.root(), layers, 1, 4, &layout).unwrap();
        let code = encoder.forward_t(&Tensor::rand([2, 3, 1, 1], (Kind::Float, Device::Cpu)), false);
        assert!(code.gaussian.is_none());
        assert!(!vs.variables().keys().any(|k| k.starts_with("gaussian")));
    }
}
