//! Per-layer hyperparameters and the spatial arithmetic that ties the
//! convolutional and transpose-convolutional paths together.

use crate::error::{ModelError, Result};

/// A hyperparameter given either once for every layer or once per layer.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerParam<T> {
    Uniform(T),
    PerLayer(Vec<T>),
}

impl<T: Clone> LayerParam<T> {
    /// Expand into exactly `n` per-layer values.
    ///
    /// A uniform value is broadcast; a per-layer sequence must already hold
    /// `n` values and is returned unchanged.
    pub fn expand(&self, field: &'static str, n: usize) -> Result<Vec<T>> {
        match self {
            LayerParam::Uniform(value) => Ok(vec![value.clone(); n]),
            LayerParam::PerLayer(values) if values.len() == n => Ok(values.clone()),
            LayerParam::PerLayer(values) => Err(ModelError::config(
                field,
                format!("expected {n} per-layer values, got {}", values.len()),
            )),
        }
    }
}

impl<T> From<T> for LayerParam<T> {
    fn from(value: T) -> Self {
        LayerParam::Uniform(value)
    }
}

impl<T> From<Vec<T>> for LayerParam<T> {
    fn from(values: Vec<T>) -> Self {
        LayerParam::PerLayer(values)
    }
}

/// Hyperparameters of one convolutional (or transpose-convolutional) layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerConfig {
    pub in_channels: i64,
    pub out_channels: i64,
    pub kernel_size: i64,
    pub stride: i64,
    pub padding: i64,
    pub bias: bool,
}

impl LayerConfig {
    /// A 1x1 convolution with bias, as used by every head and fully
    /// connected readout.
    pub fn pointwise(in_channels: i64, out_channels: i64) -> Self {
        LayerConfig {
            in_channels,
            out_channels,
            kernel_size: 1,
            stride: 1,
            padding: 0,
            bias: true,
        }
    }

    /// The same layer with its channel direction reversed.
    pub fn inverse(&self) -> Self {
        LayerConfig {
            in_channels: self.out_channels,
            out_channels: self.in_channels,
            ..*self
        }
    }

    /// Side length produced by this layer as a convolution, if positive.
    pub fn conv_output(&self, input: i64) -> Option<i64> {
        let span = input + 2 * self.padding - self.kernel_size;
        (span >= 0).then(|| span / self.stride + 1)
    }

    /// Side length produced by this layer as a transpose convolution.
    pub fn transpose_output(&self, input: i64, output_padding: i64) -> i64 {
        (input - 1) * self.stride - 2 * self.padding + self.kernel_size + output_padding
    }
}

/// Compact description of a convolutional stack.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchitectureConfig {
    pub channels: Vec<i64>,
    pub kernel_size: LayerParam<i64>,
    pub stride: LayerParam<i64>,
    pub padding: LayerParam<i64>,
    pub bias: LayerParam<bool>,
}

impl ArchitectureConfig {
    pub fn n_layers(&self) -> usize {
        self.channels.len().saturating_sub(1)
    }

    /// Normalise every hyperparameter and build the per-layer configs.
    pub fn layers(&self) -> Result<Vec<LayerConfig>> {
        if self.channels.len() < 2 {
            return Err(ModelError::config(
                "channels",
                format!("need at least 2 entries, got {}", self.channels.len()),
            ));
        }
        if let Some(c) = self.channels.iter().find(|&&c| c <= 0) {
            return Err(ModelError::config(
                "channels",
                format!("channel counts must be positive, got {c}"),
            ));
        }
        let n = self.n_layers();
        let kernel_size = self.kernel_size.expand("kernel_size", n)?;
        let stride = self.stride.expand("stride", n)?;
        let padding = self.padding.expand("padding", n)?;
        let bias = self.bias.expand("bias", n)?;

        if kernel_size.iter().any(|&k| k <= 0) {
            return Err(ModelError::config("kernel_size", "must be positive"));
        }
        if stride.iter().any(|&s| s <= 0) {
            return Err(ModelError::config("stride", "must be positive"));
        }
        if padding.iter().any(|&p| p < 0) {
            return Err(ModelError::config("padding", "must not be negative"));
        }

        Ok((0..n)
            .map(|i| LayerConfig {
                in_channels: self.channels[i],
                out_channels: self.channels[i + 1],
                kernel_size: kernel_size[i],
                stride: stride[i],
                padding: padding[i],
                bias: bias[i],
            })
            .collect())
    }

    /// The inverse architecture: every sequence reversed, so that layer `i`
    /// of the mirror undoes layer `n - 1 - i` of the original.
    pub fn mirrored(&self) -> Result<ArchitectureConfig> {
        let n = self.n_layers();
        fn reversed<T>(mut v: Vec<T>) -> Vec<T> {
            v.reverse();
            v
        }
        Ok(ArchitectureConfig {
            channels: reversed(self.channels.clone()),
            kernel_size: reversed(self.kernel_size.expand("kernel_size", n)?).into(),
            stride: reversed(self.stride.expand("stride", n)?).into(),
            padding: reversed(self.padding.expand("padding", n)?).into(),
            bias: reversed(self.bias.expand("bias", n)?).into(),
        })
    }
}

/// Side lengths seen by a convolutional stack, starting with `input`.
///
/// The returned vector holds `layers.len() + 1` entries.
pub fn spatial_trace(layers: &[LayerConfig], input: i64) -> Result<Vec<i64>> {
    if input <= 0 {
        return Err(ModelError::config("manifest_dim", "must be positive"));
    }
    let mut sizes = Vec::with_capacity(layers.len() + 1);
    sizes.push(input);
    for (i, layer) in layers.iter().enumerate() {
        let prev = sizes[sizes.len() - 1];
        match layer.conv_output(prev) {
            Some(size) if size > 0 => sizes.push(size),
            _ => {
                return Err(ModelError::config(
                    "architecture",
                    format!("layer {i} reduces a {prev}x{prev} map to nothing"),
                ))
            }
        }
    }
    Ok(sizes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn default_arch() -> ArchitectureConfig {
        ArchitectureConfig {
            channels: vec![1, 128, 256, 512, 1024],
            kernel_size: 4.into(),
            stride: 2.into(),
            padding: vec![3, 1, 1, 1].into(),
            bias: false.into(),
        }
    }

    #[test]
    fn uniform_broadcasts() {
        assert_eq!(LayerParam::Uniform(4).expand("k", 3).unwrap(), vec![4, 4, 4]);
    }

    #[test]
    fn per_layer_length_must_match() {
        let err = LayerParam::PerLayer(vec![4, 4]).expand("kernel_size", 3).unwrap_err();
        assert!(matches!(
            err,
            ModelError::InvalidConfig { field: "kernel_size", .. }
        ));
    }

    #[test]
    fn layers_follow_channels() {
        let layers = default_arch().layers().unwrap();
        assert_eq!(layers.len(), 4);
        assert_eq!(layers[0].in_channels, 1);
        assert_eq!(layers[0].padding, 3);
        assert_eq!(layers[3].out_channels, 1024);
        assert!(layers.iter().all(|l| !l.bias && l.kernel_size == 4));
    }

    #[test]
    fn single_channel_is_rejected() {
        let arch = ArchitectureConfig {
            channels: vec![1],
            ..default_arch()
        };
        assert!(arch.layers().is_err());
    }

    #[test]
    fn mnist_trace() {
        let layers = default_arch().layers().unwrap();
        assert_eq!(spatial_trace(&layers, 28).unwrap(), vec![28, 16, 8, 4, 2]);
    }

    #[test]
    fn trace_rejects_vanishing_map() {
        let layers = default_arch().layers().unwrap();
        match spatial_trace(&layers, 2).unwrap_err() {
            ModelError::InvalidConfig { field, reason } => {
                assert_eq!(field, "architecture");
                assert!(reason.contains("layer 2"), "{reason}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn mirror_reverses_and_swaps() {
        let arch = default_arch();
        let layers = arch.layers().unwrap();
        let mirrored = arch.mirrored().unwrap().layers().unwrap();
        assert_eq!(mirrored.len(), layers.len());
        for (m, l) in mirrored.iter().zip(layers.iter().rev()) {
            assert_eq!(m.in_channels, l.out_channels);
            assert_eq!(m.out_channels, l.in_channels);
            assert_eq!((m.kernel_size, m.stride, m.padding), (l.kernel_size, l.stride, l.padding));
        }
        assert_eq!(mirrored[3].padding, 3);
    }

    #[test]
    fn transpose_undoes_conv() {
        let layer = LayerConfig {
            in_channels: 1,
            out_channels: 8,
            kernel_size: 4,
            stride: 2,
            padding: 3,
            bias: false,
        };
        assert_eq!(layer.conv_output(28), Some(16));
        assert_eq!(layer.transpose_output(16, 0), 28);
    }

    proptest! {
        #[test]
        fn expand_is_idempotent(value in 0i64..16, n in 1usize..8) {
            let once = LayerParam::Uniform(value).expand("k", n).unwrap();
            let twice = LayerParam::PerLayer(once.clone()).expand("k", n).unwrap();
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn per_layer_is_returned_unchanged(values in proptest::collection::vec(1i64..9, 1..8)) {
            let n = values.len();
            prop_assert_eq!(LayerParam::PerLayer(values.clone()).expand("k", n).unwrap(), values);
        }
    }
}
