//! Building-block stacks shared by the four InfoBiGAN networks.
//!
//! [`ConvStack`] maps `(N, C_in, H, H)` to `(N, C_out, 1, 1)`. With no strided
//! layers and `H == 1` it is a plain multilayer perceptron made of 1x1
//! convolutions. [`TransposeStack`] maps `(N, C_in, 1, 1)` back up to
//! `(N, C_out, M, M)`.

use log::debug;
use tch::{nn, Tensor};

use crate::error::{ModelError, Result};
use crate::layers::{spatial_trace, LayerConfig};

const DEFAULT_LEAK: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalActivation {
    Linear,
    Leaky,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvStackConfig {
    pub in_channels: i64,
    pub in_dim: i64,
    pub layers: Vec<LayerConfig>,
    pub fc: Vec<i64>,
    pub out_dim: i64,
    pub final_act: FinalActivation,
    pub batch_norm: bool,
    pub dropout: f64,
    pub leak: f64,
}

impl ConvStackConfig {
    /// Strided feature network over an `in_dim x in_dim` input.
    pub fn conv(layers: Vec<LayerConfig>, in_dim: i64, out_dim: i64) -> Self {
        let in_channels = layers.first().map_or(0, |l| l.in_channels);
        ConvStackConfig {
            in_channels,
            in_dim,
            layers,
            fc: Vec::new(),
            out_dim,
            final_act: FinalActivation::Linear,
            batch_norm: true,
            dropout: 0.0,
            leak: DEFAULT_LEAK,
        }
    }

    /// Stack of 1x1 convolutions over a `(N, in_channels, 1, 1)` input.
    pub fn pointwise(in_channels: i64, fc: Vec<i64>, out_dim: i64) -> Self {
        ConvStackConfig {
            in_channels,
            in_dim: 1,
            layers: Vec::new(),
            fc,
            out_dim,
            final_act: FinalActivation::Linear,
            batch_norm: true,
            dropout: 0.0,
            leak: DEFAULT_LEAK,
        }
    }

    pub fn with_final_act(mut self, final_act: FinalActivation) -> Self {
        self.final_act = final_act;
        self
    }

    pub fn with_batch_norm(mut self, batch_norm: bool) -> Self {
        self.batch_norm = batch_norm;
        self
    }

    pub fn with_dropout(mut self, dropout: f64) -> Self {
        self.dropout = dropout;
        self
    }

    pub fn with_leak(mut self, leak: f64) -> Self {
        self.leak = leak;
        self
    }
}

fn leaky_relu(leak: f64) -> impl Fn(&Tensor) -> Tensor + Send + 'static {
    move |x| x.maximum(&(x * leak))
}

fn activate(net: nn::SequentialT, leak: f64, dropout: f64) -> nn::SequentialT {
    let net = net.add_fn(leaky_relu(leak));
    if dropout > 0.0 {
        net.add_fn_t(move |x, train| x.dropout(dropout, train))
    } else {
        net
    }
}

#[derive(Debug)]
pub struct ConvStack {
    net: nn::SequentialT,
    out_dim: i64,
}

impl ConvStack {
    pub fn new(path: nn::Path, config: &ConvStackConfig) -> Result<ConvStack> {
        if config.in_channels <= 0 || config.out_dim <= 0 {
            return Err(ModelError::config(
                "channels",
                "feature network widths must be positive",
            ));
        }
        let trace = spatial_trace(&config.layers, config.in_dim)?;
        debug!("conv stack {} -> {}: spatial trace {:?}", config.in_channels, config.out_dim, trace);

        let mut net = nn::seq_t();
        let mut channels = config.in_channels;
        for (i, layer) in config.layers.iter().enumerate() {
            let conv_config = nn::ConvConfig {
                stride: layer.stride,
                padding: layer.padding,
                bias: layer.bias,
                ..Default::default()
            };
            net = net.add(nn::conv2d(&path / format!("conv{}", i + 1), channels,
                                     layer.out_channels, layer.kernel_size, conv_config));
            if config.batch_norm {
                net = net.add(nn::batch_norm2d(&path / format!("bn{}", i + 1),
                                               layer.out_channels, Default::default()));
            }
            net = activate(net, config.leak, config.dropout);
            channels = layer.out_channels;
        }

        // The first readout layer spans whatever spatial extent is left.
        let mut kernel = trace[trace.len() - 1];
        let readout: Vec<i64> = config.fc.iter().copied().chain([config.out_dim]).collect();
        for (j, &width) in readout.iter().enumerate() {
            let conv_config = nn::ConvConfig { stride: 1, padding: 0, bias: true, ..Default::default() };
            net = net.add(nn::conv2d(&path / format!("fc{}", j + 1), channels, width, kernel, conv_config));
            kernel = 1;
            channels = width;
            if j + 1 < readout.len() {
                if config.batch_norm {
                    net = net.add(nn::batch_norm2d(&path / format!("fc_bn{}", j + 1), width, Default::default()));
                }
                net = activate(net, config.leak, config.dropout);
            } else if config.final_act == FinalActivation::Leaky {
                net = activate(net, config.leak, config.dropout);
            }
        }

        Ok(ConvStack { net, out_dim: config.out_dim })
    }

    pub fn out_dim(&self) -> i64 {
        self.out_dim
    }
}

impl nn::ModuleT for ConvStack {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        self.net.forward_t(xs, train)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransposeStackConfig {
    pub latent_dim: i64,
    /// Layers in upsampling order, typically an [`ArchitectureConfig::mirrored`]
    /// encoder path.
    ///
    /// [`ArchitectureConfig::mirrored`]: crate::layers::ArchitectureConfig::mirrored
    pub layers: Vec<LayerConfig>,
    pub target_dim: i64,
    pub batch_norm: bool,
}

#[derive(Debug)]
pub struct TransposeStack {
    net: nn::SequentialT,
    innermost_dim: i64,
}

impl TransposeStack {
    pub fn new(path: nn::Path, config: &TransposeStackConfig) -> Result<TransposeStack> {
        let first = config.layers.first().ok_or_else(|| {
            ModelError::config("channels", "generator needs at least one layer")
        })?;
        if config.latent_dim <= 0 {
            return Err(ModelError::config("latent_dim", "must be positive"));
        }

        // Sizes the matching downsampling path would see, from target inwards.
        let downsampling: Vec<LayerConfig> =
            config.layers.iter().rev().map(LayerConfig::inverse).collect();
        let trace = spatial_trace(&downsampling, config.target_dim)?;
        let n = config.layers.len();
        let innermost_dim = trace[n];
        debug!("transpose stack: innermost {innermost_dim}, trace {:?}", trace);

        let project = nn::ConvTransposeConfig { stride: 1, padding: 0, bias: first.bias, ..Default::default() };
        let mut net = nn::seq_t()
            .add(nn::conv_transpose2d(&path / "project", config.latent_dim, first.in_channels,
                                      innermost_dim, project));
        if config.batch_norm {
            net = net.add(nn::batch_norm2d(&path / "project_bn", first.in_channels, Default::default()));
        }
        net = net.add_fn(|x| x.relu());

        for (j, layer) in config.layers.iter().enumerate() {
            let input = trace[n - j];
            let output = trace[n - j - 1];
            let output_padding = output - layer.transpose_output(input, 0);
            let tconv = nn::ConvTransposeConfig {
                stride: layer.stride,
                padding: layer.padding,
                output_padding,
                bias: layer.bias,
                ..Default::default()
            };
            net = net.add(nn::conv_transpose2d(&path / format!("tconv{}", j + 1), layer.in_channels,
                                               layer.out_channels, layer.kernel_size, tconv));
            if j + 1 < n {
                if config.batch_norm {
                    net = net.add(nn::batch_norm2d(&path / format!("bn{}", j + 1),
                                                   layer.out_channels, Default::default()));
                }
                net = net.add_fn(|x| x.relu());
            } else {
                net = net.add_fn(|x| x.sigmoid());
            }
        }

        Ok(TransposeStack { net, innermost_dim })
    }

    /// Side length of the map produced by the projection layer.
    pub fn innermost_dim(&self) -> i64 {
        self.innermost_dim
    }
}

impl nn::ModuleT for TransposeStack {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        self.net.forward_t(xs, train)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::ArchitectureConfig;
    use tch::{nn::ModuleT, Device, Kind};

    fn arch() -> ArchitectureConfig {
        ArchitectureConfig {
            channels: vec![1, 8, 16],
            kernel_size: 4.into(),
            stride: 2.into(),
            padding: vec![3, 1].into(),
            bias: false.into(),
        }
    }

    #[test]
    fn conv_stack_collapses_to_a_point() {
        let vs = nn::VarStore::new(Device::Cpu);
        let config = ConvStackConfig::conv(arch().layers().unwrap(), 28, 12)
            .with_batch_norm(false)
            .with_dropout(0.3)
            .with_final_act(FinalActivation::Leaky);
        let stack = ConvStack::new(vs.root(), &config).unwrap();
        let xs = Tensor::rand([3, 1, 28, 28], (Kind::Float, Device::Cpu));
        assert_eq!(stack.forward_t(&xs, false).size(), vec![3, 12, 1, 1]);
    }

    #[test]
    fn batch_norm_follows_hidden_layers_only() {
        let vs = nn::VarStore::new(Device::Cpu);
        let config = ConvStackConfig::conv(arch().layers().unwrap(), 28, 12);
        let config = ConvStackConfig { fc: vec![10], ..config }.with_batch_norm(true);
        let stack = ConvStack::new(vs.root(), &config).unwrap();
        let names = vs.variables();
        assert!(names.contains_key("bn1.weight") && names.contains_key("bn2.running_mean"));
        assert!(names.contains_key("fc_bn1.weight"));
        assert!(!names.contains_key("fc_bn2.weight"));

        let xs = Tensor::rand([4, 1, 28, 28], (Kind::Float, Device::Cpu));
        assert_eq!(stack.forward_t(&xs, true).size(), vec![4, 12, 1, 1]);
        assert_eq!(stack.forward_t(&xs, false).size(), vec![4, 12, 1, 1]);
    }

    #[test]
    fn pointwise_stack_is_an_mlp() {
        let vs = nn::VarStore::new(Device::Cpu);
        let config = ConvStackConfig::pointwise(6, vec![10, 10], 4).with_batch_norm(false);
        let stack = ConvStack::new(vs.root(), &config).unwrap();
        let xs = Tensor::rand([2, 6, 1, 1], (Kind::Float, Device::Cpu));
        assert_eq!(stack.forward_t(&xs, false).size(), vec![2, 4, 1, 1]);
        // three 1x1 layers, each with weight and bias
        assert_eq!(vs.variables().len(), 6);
    }

    #[test]
    fn transpose_stack_restores_target() {
        let vs = nn::VarStore::new(Device::Cpu);
        let config = TransposeStackConfig {
            latent_dim: 5,
            layers: arch().mirrored().unwrap().layers().unwrap(),
            target_dim: 28,
            batch_norm: false,
        };
        let stack = TransposeStack::new(vs.root(), &config).unwrap();
        assert_eq!(stack.innermost_dim(), 8);
        let zs = Tensor::rand([2, 5, 1, 1], (Kind::Float, Device::Cpu));
        assert_eq!(stack.forward_t(&zs, false).size(), vec![2, 1, 28, 28]);
    }

    #[test]
    fn transpose_stack_handles_odd_sizes() {
        let vs = nn::VarStore::new(Device::Cpu);
        let arch = ArchitectureConfig {
            channels: vec![3, 8, 16],
            kernel_size: 3.into(),
            stride: 2.into(),
            padding: 1.into(),
            bias: true.into(),
        };
        let config = TransposeStackConfig {
            latent_dim: 4,
            layers: arch.mirrored().unwrap().layers().unwrap(),
            target_dim: 15,
            batch_norm: true,
        };
        let stack = TransposeStack::new(vs.root(), &config).unwrap();
        let zs = Tensor::rand([2, 4, 1, 1], (Kind::Float, Device::Cpu));
        assert_eq!(stack.forward_t(&zs, false).size(), vec![2, 3, 15, 15]);
    }
}
