use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use log::info;
use tch::{nn, Device, Tensor};

use crate::config::{InfoBiGanConfig, ModelPlan};
use crate::discriminator::DualDiscriminator;
use crate::encoder::RegularisedEncoder;
use crate::error::{ModelError, Result};
use crate::generator::RegularisedGenerator;
use crate::latent::{LatentCode, LatentLayout, StructuredCode};
use crate::regulariser::{QStack, RegularisedParams};

/// The four networks owned by an [`InfoBiGan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Network {
    Generator,
    Encoder,
    Discriminator,
    Regulariser,
}

impl Network {
    pub const ALL: [Network; 4] = [
        Network::Generator,
        Network::Encoder,
        Network::Discriminator,
        Network::Regulariser,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Network::Generator => "generator",
            Network::Encoder => "encoder",
            Network::Discriminator => "discriminator",
            Network::Regulariser => "regulariser",
        }
    }

    /// File name used by [`InfoBiGan::save`] and [`InfoBiGan::load`].
    pub fn file_name(self) -> String {
        format!("{}.ot", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// Named tensors for each network, as produced by `Tensor::load_multi`.
#[derive(Debug, Default)]
pub struct ParameterSets {
    pub generator: Vec<(String, Tensor)>,
    pub encoder: Vec<(String, Tensor)>,
    pub discriminator: Vec<(String, Tensor)>,
    pub regulariser: Vec<(String, Tensor)>,
}

impl ParameterSets {
    pub fn get(&self, network: Network) -> &[(String, Tensor)] {
        match network {
            Network::Generator => &self.generator,
            Network::Encoder => &self.encoder,
            Network::Discriminator => &self.discriminator,
            Network::Regulariser => &self.regulariser,
        }
    }
}

/// Information maximising adversarially learned inference network.
///
/// The discriminator sees (latent, manifest) pairs and decides whether each
/// came from the encoder or the generator. The regulariser reads the
/// discriminator's manifest-space representation and estimates the
/// regularised latent variables.
#[derive(Debug)]
pub struct InfoBiGan {
    layout: LatentLayout,
    manifest_dim: i64,
    mode: Mode,
    g_vs: nn::VarStore,
    e_vs: nn::VarStore,
    d_vs: nn::VarStore,
    q_vs: nn::VarStore,
    generator: RegularisedGenerator,
    encoder: RegularisedEncoder,
    discriminator: DualDiscriminator,
    regulariser: QStack,
}

impl InfoBiGan {
    pub fn new(config: &InfoBiGanConfig, device: Device) -> Result<InfoBiGan> {
        let plan = config.plan()?;
        InfoBiGan::from_plan(plan, device)
    }

    /// Allocate the four networks from validated shapes.
    pub fn from_plan(plan: ModelPlan, device: Device) -> Result<InfoBiGan> {
        let ModelPlan { layout, layers, mirrored, manifest_dim, representation_dim } = plan;
        let latent_dim = layout.total();

        let g_vs = nn::VarStore::new(device);
        let e_vs = nn::VarStore::new(device);
        let d_vs = nn::VarStore::new(device);
        let q_vs = nn::VarStore::new(device);

        let generator = RegularisedGenerator::new(g_vs.root(), mirrored, latent_dim,
                                                  manifest_dim, false)?;
        let encoder = RegularisedEncoder::new(e_vs.root(), layers.clone(), manifest_dim,
                                              layout.noise, &layout)?;
        let discriminator = DualDiscriminator::new(d_vs.root(), layers, manifest_dim, latent_dim)?;
        let regulariser = QStack::new(q_vs.root(), &layout, representation_dim)?;
        debug_assert_eq!(discriminator.representation_dim(), regulariser.hidden_dim());

        let model = InfoBiGan {
            layout,
            manifest_dim,
            mode: Mode::Train,
            g_vs,
            e_vs,
            d_vs,
            q_vs,
            generator,
            encoder,
            discriminator,
            regulariser,
        };
        info!(
            "built InfoBiGAN: latent {} ({} noise, categorical {:?}, {} gaussian), {} parameters",
            latent_dim,
            model.layout.noise,
            model.layout.categorical,
            model.layout.gaussian,
            model.parameter_count()
        );
        Ok(model)
    }

    pub fn layout(&self) -> &LatentLayout {
        &self.layout
    }

    /// Noise plus every regularised variable.
    pub fn total_latent_dim(&self) -> i64 {
        self.layout.total()
    }

    pub fn manifest_dim(&self) -> i64 {
        self.manifest_dim
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn device(&self) -> Device {
        self.g_vs.device()
    }

    pub fn generator(&self) -> &RegularisedGenerator {
        &self.generator
    }

    pub fn encoder(&self) -> &RegularisedEncoder {
        &self.encoder
    }

    pub fn discriminator(&self) -> &DualDiscriminator {
        &self.discriminator
    }

    pub fn regulariser(&self) -> &QStack {
        &self.regulariser
    }

    pub fn var_store(&self, network: Network) -> &nn::VarStore {
        match network {
            Network::Generator => &self.g_vs,
            Network::Encoder => &self.e_vs,
            Network::Discriminator => &self.d_vs,
            Network::Regulariser => &self.q_vs,
        }
    }

    fn var_store_mut(&mut self, network: Network) -> &mut nn::VarStore {
        match network {
            Network::Generator => &mut self.g_vs,
            Network::Encoder => &mut self.e_vs,
            Network::Discriminator => &mut self.d_vs,
            Network::Regulariser => &mut self.q_vs,
        }
    }

    pub fn train(&mut self) {
        self.mode = Mode::Train;
    }

    pub fn eval(&mut self) {
        self.mode = Mode::Eval;
    }

    fn is_training(&self) -> bool {
        self.mode == Mode::Train
    }

    /// Move every network's parameters to `device`.
    pub fn to_device(&mut self, device: Device) {
        for network in Network::ALL {
            self.var_store_mut(network).set_device(device);
        }
        info!("moved InfoBiGAN to {device:?}");
    }

    /// Move to the first CUDA device, or stay on the CPU if there is none.
    pub fn cuda(&mut self) {
        self.to_device(Device::cuda_if_available());
    }

    pub fn zero_grad(&mut self) {
        for network in Network::ALL {
            for mut var in self.var_store(network).trainable_variables() {
                var.zero_grad();
            }
        }
    }

    pub fn parameter_count(&self) -> usize {
        Network::ALL.iter().map(|&n| self.network_parameter_count(n)).sum()
    }

    pub fn network_parameter_count(&self, network: Network) -> usize {
        self.var_store(network).variables().values().map(Tensor::numel).sum()
    }

    pub fn encode(&self, xs: &Tensor) -> StructuredCode {
        self.encoder.forward_t(xs, self.is_training())
    }

    pub fn generate(&self, code: &LatentCode) -> Tensor {
        self.generator.forward_t(code, self.is_training())
    }

    /// Decision logit and manifest-space representation for a pair.
    pub fn discriminate(&self, code: &LatentCode, xs: &Tensor) -> (Tensor, Tensor) {
        self.discriminator.forward_t(code, xs, self.is_training())
    }

    /// Estimate the regularised variables from a discriminator representation.
    pub fn regularise(&self, representation: &Tensor) -> RegularisedParams {
        self.regulariser.forward_t(representation, self.is_training())
    }

    /// Draw a prior sample on the model's device.
    pub fn sample(&self, batch: i64) -> StructuredCode {
        self.layout.sample(batch, self.device())
    }

    /// Replace every network's parameters.
    ///
    /// All four sets are checked against the declared parameters before any
    /// value is copied, so a rejected load leaves the model unchanged.
    pub fn load_parameters(&mut self, sets: &ParameterSets) -> Result<()> {
        for network in Network::ALL {
            check_parameters(network, self.var_store(network), sets.get(network))?;
        }
        tch::no_grad(|| -> Result<()> {
            for network in Network::ALL {
                let supplied: HashMap<&str, &Tensor> =
                    sets.get(network).iter().map(|(name, t)| (name.as_str(), t)).collect();
                for (name, mut var) in self.var_store(network).variables() {
                    if let Some(src) = supplied.get(name.as_str()) {
                        var.f_copy_(src)?;
                    }
                }
            }
            Ok(())
        })?;
        info!("loaded parameters for all networks");
        Ok(())
    }

    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        for network in Network::ALL {
            let path = dir.join(network.file_name());
            self.var_store(network).save(&path)?;
            info!("saved {} to {}", network.name(), path.display());
        }
        Ok(())
    }

    pub fn load(&mut self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        let read = |network: Network| Tensor::load_multi(dir.join(network.file_name()));
        let sets = ParameterSets {
            generator: read(Network::Generator)?,
            encoder: read(Network::Encoder)?,
            discriminator: read(Network::Discriminator)?,
            regulariser: read(Network::Regulariser)?,
        };
        self.load_parameters(&sets)
    }
}

fn check_parameters(network: Network, vs: &nn::VarStore, supplied: &[(String, Tensor)]) -> Result<()> {
    let declared: BTreeMap<String, Tensor> = vs.variables().into_iter().collect();
    let supplied: BTreeMap<&str, &Tensor> =
        supplied.iter().map(|(name, t)| (name.as_str(), t)).collect();

    for (name, var) in &declared {
        match supplied.get(name.as_str()) {
            None => {
                return Err(ModelError::MissingParameter {
                    network: network.name(),
                    name: name.clone(),
                })
            }
            Some(src) if src.size() != var.size() => {
                return Err(ModelError::ParameterMismatch {
                    network: network.name(),
                    name: name.clone(),
                    expected: var.size(),
                    found: src.size(),
                })
            }
            Some(_) => {}
        }
    }
    if let Some(name) = supplied.keys().find(|name| !declared.contains_key(**name)) {
        return Err(ModelError::UnexpectedParameter {
            network: network.name(),
            name: name.to_string(),
        });
    }
    Ok(())
}
