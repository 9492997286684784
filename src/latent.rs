//! Structured latent codes and the layout that gives their coordinates
//! meaning.
//!
//! A flattened code always lays its components out as
//! `[noise, gaussian, *categorical]`.

use rand::Rng;
use tch::{Device, Kind, Tensor};

/// Widths of every component of the latent space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatentLayout {
    pub noise: i64,
    pub categorical: Vec<i64>,
    pub gaussian: i64,
}

impl LatentLayout {
    pub fn new(noise: i64, categorical: Vec<i64>, gaussian: i64) -> Self {
        LatentLayout { noise, categorical, gaussian }
    }

    pub fn total(&self) -> i64 {
        self.noise + self.categorical.iter().sum::<i64>() + self.gaussian
    }

    /// Split a flat `(N, total)` code back into its components.
    pub fn split(&self, flat: &Tensor) -> StructuredCode {
        let noise = flat.narrow(1, 0, self.noise);
        let mut offset = self.noise;
        let gaussian = (self.gaussian > 0).then(|| flat.narrow(1, offset, self.gaussian));
        offset += self.gaussian;
        let categorical = self
            .categorical
            .iter()
            .map(|&levels| {
                let code = flat.narrow(1, offset, levels);
                offset += levels;
                code
            })
            .collect();
        StructuredCode { noise, categorical, gaussian }
    }

    /// Draw a code from the prior: standard normal noise and Gaussian
    /// variables, and a uniformly chosen level for each categorical variable.
    pub fn sample(&self, batch: i64, device: Device) -> StructuredCode {
        let mut rng = rand::thread_rng();
        let categorical = self
            .categorical
            .iter()
            .map(|&levels| {
                let picks: Vec<i64> = (0..batch).map(|_| rng.gen_range(0..levels)).collect();
                one_hot(&picks, levels, device)
            })
            .collect();
        self.sample_noise(batch, device, categorical)
    }

    /// Draw a code with every categorical variable fixed at `level`
    /// (clamped to the variable's level count).
    pub fn sample_with_level(&self, batch: i64, level: i64, device: Device) -> StructuredCode {
        let categorical = self
            .categorical
            .iter()
            .map(|&levels| one_hot(&vec![level.min(levels - 1); batch as usize], levels, device))
            .collect();
        self.sample_noise(batch, device, categorical)
    }

    fn sample_noise(&self, batch: i64, device: Device, categorical: Vec<Tensor>) -> StructuredCode {
        let noise = Tensor::randn([batch, self.noise], (Kind::Float, device));
        let gaussian = (self.gaussian > 0)
            .then(|| Tensor::randn([batch, self.gaussian], (Kind::Float, device)));
        StructuredCode { noise, categorical, gaussian }
    }
}

fn one_hot(picks: &[i64], levels: i64, device: Device) -> Tensor {
    Tensor::from_slice(picks)
        .one_hot(levels)
        .to_kind(Kind::Float)
        .to_device(device)
}

/// Latent code split into its noise, Gaussian and categorical parts. Every
/// component is a `(N, width)` tensor.
#[derive(Debug)]
pub struct StructuredCode {
    pub noise: Tensor,
    /// One probability vector per categorical variable, in declaration order.
    pub categorical: Vec<Tensor>,
    pub gaussian: Option<Tensor>,
}

impl StructuredCode {
    pub fn flatten(&self) -> Tensor {
        let mut parts: Vec<&Tensor> = Vec::with_capacity(self.categorical.len() + 2);
        parts.push(&self.noise);
        parts.extend(self.gaussian.as_ref());
        parts.extend(self.categorical.iter());
        Tensor::cat(&parts, 1)
    }

    pub fn batch_size(&self) -> i64 {
        self.noise.size()[0]
    }
}

/// A latent code as consumed by the generator and discriminator.
#[derive(Debug)]
pub enum LatentCode {
    Structured(StructuredCode),
    Flat(Tensor),
}

impl LatentCode {
    /// The `(N, total)` form of the code.
    pub fn flatten(&self) -> Tensor {
        match self {
            LatentCode::Structured(code) => code.flatten(),
            LatentCode::Flat(flat) => flat.shallow_clone(),
        }
    }
}

impl From<StructuredCode> for LatentCode {
    fn from(code: StructuredCode) -> Self {
        LatentCode::Structured(code)
    }
}

impl From<Tensor> for LatentCode {
    fn from(flat: Tensor) -> Self {
        LatentCode::Flat(flat)
    }
}
