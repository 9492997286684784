//! InfoBiGAN: an information maximising adversarially learned inference
//! network on top of `tch`.
//!
//! Four networks share one latent layout. The encoder maps images to
//! structured codes, the generator maps codes to images, the dual
//! discriminator scores (code, image) pairs, and the Q network recovers the
//! regularised part of the code from the discriminator's image
//! representation.

pub mod config;
pub mod conv;
pub mod discriminator;
pub mod encoder;
pub mod error;
pub mod generator;
pub mod latent;
pub mod layers;
pub mod model;
pub mod regulariser;

pub use config::{InfoBiGanConfig, ModelPlan};
pub use discriminator::{DualDiscriminator, REPRESENTATION_EPS};
pub use encoder::RegularisedEncoder;
pub use error::{ModelError, Result};
pub use generator::RegularisedGenerator;
pub use latent::{LatentCode, LatentLayout, StructuredCode};
pub use layers::{ArchitectureConfig, LayerConfig, LayerParam};
pub use model::{InfoBiGan, Mode, Network, ParameterSets};
pub use regulariser::{GaussianParams, QStack, RegularisedParams};
