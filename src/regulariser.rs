//! Q network: recovers the regularised latent variables from a hidden
//! representation, for the mutual-information term of the objective.

use tch::{nn, nn::Module, nn::ModuleT, Tensor};

use crate::conv::{ConvStack, ConvStackConfig, FinalActivation};
use crate::encoder::{head, CategoricalHead};
use crate::error::Result;
use crate::latent::LatentLayout;

#[derive(Debug)]
pub struct GaussianHead {
    mean: nn::Conv2D,
    logstd: nn::Conv2D,
}

#[derive(Debug)]
pub struct GaussianParams {
    pub mean: Tensor,
    pub logstd: Tensor,
}

/// Estimated posterior over the regularised variables.
#[derive(Debug)]
pub struct RegularisedParams {
    pub categorical: Vec<Tensor>,
    pub gaussian: Option<GaussianParams>,
}

#[derive(Debug)]
pub struct QStack {
    hidden_dim: i64,
    q_input: ConvStack,
    categorical: Vec<CategoricalHead>,
    gaussian: Option<GaussianHead>,
}

impl QStack {
    pub fn new(path: nn::Path, layout: &LatentLayout, hidden_dim: i64) -> Result<QStack> {
        let config = ConvStackConfig::pointwise(hidden_dim, Vec::new(), hidden_dim)
            .with_leak(0.2)
            .with_final_act(FinalActivation::Leaky)
            .with_batch_norm(false);
        let q_input = ConvStack::new(&path / "q_input", &config)?;
        let categorical = layout
            .categorical
            .iter()
            .enumerate()
            .map(|(i, &levels)| CategoricalHead::new(&path / "categorical" / i, hidden_dim, levels))
            .collect();
        let gaussian = (layout.gaussian > 0).then(|| GaussianHead {
            mean: head(&path / "gaussian" / "mean", hidden_dim, layout.gaussian),
            logstd: head(&path / "gaussian" / "logstd", hidden_dim, layout.gaussian),
        });
        Ok(QStack { hidden_dim, q_input, categorical, gaussian })
    }

    pub fn hidden_dim(&self) -> i64 {
        self.hidden_dim
    }

    /// `hidden` is `(N, hidden_dim)` or `(N, hidden_dim, 1, 1)`.
    pub fn forward_t(&self, hidden: &Tensor, train: bool) -> RegularisedParams {
        let batch = hidden.size()[0];
        let xs = self.q_input.forward_t(&hidden.reshape([batch, -1, 1, 1]), train);
        RegularisedParams {
            categorical: self.categorical.iter().map(|h| h.forward(&xs)).collect(),
            gaussian: self.gaussian.as_ref().map(|g| GaussianParams {
                mean: g.mean.forward(&xs).flatten(1, -1),
                logstd: g.logstd.forward(&xs).flatten(1, -1),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    #[test]
    fn estimates_every_regularised_variable() {
        let vs = nn::VarStore::new(Device::Cpu);
        let layout = LatentLayout::new(10, vec![4, 2], 3);
        let q = QStack::new(vs.root(), &layout, layout.total() * 2).unwrap();
        assert_eq!(q.hidden_dim(), 38);

        let hidden = Tensor::randn([6, 38], (Kind::Float, Device::Cpu));
        let params = q.forward_t(&hidden, false);
        assert_eq!(params.categorical[0].size(), vec![6, 4]);
        assert_eq!(params.categorical[1].size(), vec![6, 2]);
        let gaussian = params.gaussian.unwrap();
        assert_eq!(gaussian.mean.size(), vec![6, 3]);
        assert_eq!(gaussian.logstd.size(), vec![6, 3]);
    }

    #[test]
    fn categorical_estimates_are_distributions() {
        let vs = nn::VarStore::new(Device::Cpu);
        let layout = LatentLayout::new(2, vec![7], 0);
        let q = QStack::new(vs.root(), &layout, 18).unwrap();
        let params = q.forward_t(&Tensor::randn([4, 18, 1, 1], (Kind::Float, Device::Cpu)), false);
        assert!(params.gaussian.is_none());
        let sums = params.categorical[0].sum_dim_intlist(1, false, Kind::Float);
        assert!(sums.allclose(&Tensor::ones([4], (Kind::Float, Device::Cpu)), 1e-5, 1e-5, false));
    }
}
