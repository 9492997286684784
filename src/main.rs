use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::Parser;
use gif::{Encoder, Frame, Repeat};
use log::info;
use tch::{Device, Kind, Tensor};
use tqdm::tqdm;

use infobigan::{InfoBiGan, InfoBiGanConfig, LatentCode, LayerParam, Network, StructuredCode};

const MORPHING_FRAMES: i64 = 100;
const MORPHING_RANGE: f64 = 2.0;

#[derive(Parser, Debug)]
#[command(version, about = "InfoBiGAN via Rust.", long_about = None)]
struct Args {
    #[arg(long, value_delimiter = ',', default_values_t = [1, 128, 256, 512, 1024])]
    channels: Vec<i64>,
    /// One value for every layer, or one per layer.
    #[arg(long, value_delimiter = ',', default_values_t = [4])]
    kernel_size: Vec<i64>,
    #[arg(long, value_delimiter = ',', default_values_t = [2])]
    stride: Vec<i64>,
    #[arg(long, value_delimiter = ',', default_values_t = [3, 1, 1, 1])]
    padding: Vec<i64>,
    #[arg(long, value_delimiter = ',', default_values_t = [false])]
    bias: Vec<bool>,
    #[arg(long, default_value_t = 28)]
    manifest_dim: i64,
    #[arg(long, default_value_t = 100)]
    latent_dim: i64,
    #[arg(long, value_delimiter = ',', default_values_t = [10])]
    reg_categorical: Vec<i64>,
    #[arg(long, default_value_t = 2)]
    reg_gaussian: i64,
    #[arg(short, long, default_value = ".")]
    weights_dir: PathBuf,
    /// Save freshly initialised weights into the weights directory.
    #[arg(long, default_value_t = false)]
    init_weights: bool,
    /// Number of samples to generate for each categorical level.
    #[arg(short, long, default_value_t = 0)]
    generate: usize,
    #[arg(short, long, default_value_t = false)]
    morphing: bool,
}

fn layer_param<T>(mut values: Vec<T>) -> LayerParam<T> {
    if values.len() == 1 {
        LayerParam::Uniform(values.remove(0))
    } else {
        LayerParam::PerLayer(values)
    }
}

impl Args {
    fn config(&self) -> InfoBiGanConfig {
        InfoBiGanConfig {
            channels: self.channels.clone(),
            kernel_size: layer_param(self.kernel_size.clone()),
            stride: layer_param(self.stride.clone()),
            padding: layer_param(self.padding.clone()),
            bias: layer_param(self.bias.clone()),
            manifest_dim: self.manifest_dim,
            latent_dim: self.latent_dim,
            reg_categorical: self.reg_categorical.clone(),
            reg_gaussian: self.reg_gaussian,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let device = Device::cuda_if_available();
    info!("Use Device: {device:?}");

    let mut model = InfoBiGan::new(&args.config(), device)?;
    model.eval();

    // Load network's weights
    let complete = Network::ALL.iter().all(|n| args.weights_dir.join(n.file_name()).is_file());
    if args.init_weights {
        fs::create_dir_all(&args.weights_dir)?;
        model.save(&args.weights_dir)?;
    } else if complete {
        model.load(&args.weights_dir)?;
    } else {
        info!("No complete weight set in {}, using fresh weights", args.weights_dir.display());
    }

    if args.generate != 0 {
        tch::no_grad(|| generate(&model, args.generate))?;
        println!("Generated!");
        return Ok(());
    }

    if args.morphing {
        tch::no_grad(|| morphing(&model))?;
        println!("Generated morphing.gif");
        return Ok(());
    }

    tch::no_grad(|| summary(&model));
    Ok(())
}

fn results_dir() -> Result<PathBuf> {
    let path = Path::new("results");
    if !path.is_dir() {
        fs::create_dir(path)?;
    }
    Ok(path.to_path_buf())
}

fn generate(model: &InfoBiGan, num: usize) -> Result<()> {
    let results = results_dir()?;
    let levels = model.layout().categorical.first().copied().unwrap_or(1);
    for level in 0..levels {
        for i in tqdm(0..num) {
            let code = model.layout().sample_with_level(1, level, model.device());
            let image = model.generate(&LatentCode::Structured(code)).squeeze_dim(0) * 255.0;
            let path = results.join(format!("generate-{}-{}.png", level, i + 1));
            tch::vision::image::save(&image, &path)?;
        }
    }
    Ok(())
}

fn morphing(model: &InfoBiGan) -> Result<()> {
    if model.layout().gaussian == 0 {
        bail!("Morphing traverses a Gaussian variable; set --reg-gaussian above 0.")
    }
    let size = model.manifest_dim() as u16;
    let base = model.layout().sample_with_level(1, 0, model.device());

    let mut image = File::create(results_dir()?.join("morphing.gif"))?;
    let mut encoder = Encoder::new(&mut image, size, size, &[])?;
    encoder.set_repeat(Repeat::Infinite)?;

    for i in tqdm(0..MORPHING_FRAMES) {
        let l = i as f64 / (MORPHING_FRAMES - 1) as f64;
        let value = (2.0 * l - 1.0) * MORPHING_RANGE;
        let code = with_first_gaussian(&base, value);
        let frame = model.generate(&LatentCode::Structured(code)).squeeze_dim(0);
        let frame = match frame.size()[0] {
            1 => frame.repeat([3, 1, 1]),
            3 => frame,
            c => bail!("Cannot render {c}-channel images as GIF frames."),
        };
        let frame = (frame.permute_copy([1, 2, 0]).flatten(0, -1) * 255.0).to_kind(Kind::Uint8);
        let data = Vec::<u8>::try_from(&frame.to_device(Device::Cpu))?;
        encoder.write_frame(&Frame::from_rgb(size, size, &data))?;
    }
    Ok(())
}

fn with_first_gaussian(base: &StructuredCode, value: f64) -> StructuredCode {
    let gaussian = base.gaussian.as_ref().map(|g| {
        let g = g.copy();
        let _ = g.narrow(1, 0, 1).fill_(value);
        g
    });
    StructuredCode {
        noise: base.noise.shallow_clone(),
        categorical: base.categorical.iter().map(Tensor::shallow_clone).collect(),
        gaussian,
    }
}

fn summary(model: &InfoBiGan) {
    let layout = model.layout();
    println!("Latent: {} noise + categorical {:?} + {} gaussian = {}",
             layout.noise, layout.categorical, layout.gaussian, model.total_latent_dim());
    for network in Network::ALL {
        println!("{:>13}: {} parameters", network.name(), model.network_parameter_count(network));
    }
    println!("--------");

    let batch = 2;
    let images = model.generate(&LatentCode::Structured(model.sample(batch)));
    println!("generate(code[{batch}, {}]) -> {:?}", model.total_latent_dim(), images.size());

    let code = model.encode(&images);
    println!("encode -> noise {:?}, gaussian {:?}, categorical {:?}",
             code.noise.size(),
             code.gaussian.as_ref().map(Tensor::size),
             code.categorical.iter().map(Tensor::size).collect::<Vec<_>>());

    let (logit, representation) = model.discriminate(&LatentCode::Structured(code), &images);
    println!("discriminate -> logit {:?}, representation {:?}", logit.size(), representation.size());

    let q = model.regularise(&representation);
    println!("regularise -> categorical {:?}, gaussian {:?}",
             q.categorical.iter().map(Tensor::size).collect::<Vec<_>>(),
             q.gaussian.as_ref().map(|g| (g.mean.size(), g.logstd.size())));
}
