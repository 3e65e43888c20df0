//! Aligned Xception CLI
//!
//! Inspect how a block list is planned for a given output stride, and build
//! the network to check parameter counts and tensor shapes.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use burn::module::Module;
use burn::tensor::Tensor;

use xception_aligned::backend::{backend_name, default_device, DefaultBackend};
use xception_aligned::model::{ShortcutKind, XceptionAlignedConfig};
use xception_aligned::utils::format_param_count;
use xception_aligned::utils::logging::{init_logging, LogConfig};

/// Aligned Xception network builder
#[derive(Parser, Debug)]
#[command(name = "xception_aligned")]
#[command(version)]
#[command(about = "Plan and build Aligned Xception backbones with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the per-block stride/dilation plan and the feature-info table
    Plan {
        /// Path to the network configuration (JSON)
        #[arg(short, long, default_value = "configs/xception41.json")]
        config: PathBuf,

        /// Override the configured output stride (8, 16 or 32)
        #[arg(short, long)]
        output_stride: Option<usize>,

        /// Print the plan as JSON instead of a table
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Build the network and run a forward pass on zeros
    Summary {
        /// Path to the network configuration (JSON)
        #[arg(short, long, default_value = "configs/xception41.json")]
        config: PathBuf,

        /// Override the configured output stride (8, 16 or 32)
        #[arg(short, long)]
        output_stride: Option<usize>,

        /// Input image size (square)
        #[arg(long, default_value = "299")]
        image_size: usize,

        /// Batch size of the dummy input
        #[arg(short, long, default_value = "1")]
        batch_size: usize,
    },
}

fn load_config(path: &Path, output_stride: Option<usize>) -> Result<XceptionAlignedConfig> {
    let config = XceptionAlignedConfig::from_json_file(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    Ok(match output_stride {
        Some(os) => config.with_output_stride(os),
        None => config,
    })
}

fn run_plan(config: &XceptionAlignedConfig, json: bool) -> Result<()> {
    let plan = config.plan()?;

    if json {
        let out = serde_json::json!({
            "plan": plan,
            "feature_info": plan.feature_info(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!(
        "{}",
        format!("Block plan (output stride {})", plan.output_stride).bold()
    );
    println!(
        "{:>8}  {:>6} -> {:<18} {:>8} {:>6} {:>9} {:>6}",
        "block", "in", "out", "stride", "dil", "reduction", "skip"
    );
    for (i, b) in plan.blocks.iter().enumerate() {
        let stride = if b.is_absorbed() {
            format!("{}->1", b.declared_stride).yellow().to_string()
        } else {
            b.stride.to_string()
        };
        let skip = match b.shortcut_kind() {
            ShortcutKind::Identity => "id",
            ShortcutKind::Projection => "proj",
            ShortcutKind::None => "none",
        };
        println!(
            "{:>8}  {:>6} -> {:<18} {:>8} {:>6} {:>9} {:>6}",
            format!("blocks.{}", i),
            b.in_chs,
            format!("{:?}", b.out_chs),
            stride,
            b.dilation,
            b.reduction,
            skip
        );
    }

    println!();
    println!("{}", "Feature info".bold());
    for (i, f) in plan.feature_info().iter().enumerate() {
        println!(
            "  [{}] {:<10} channels {:>5}  reduction {:>2}",
            i, f.module, f.num_chs, f.reduction
        );
    }
    println!(
        "Final stride {}, dilation {}",
        plan.final_state.stride, plan.final_state.dilation
    );

    Ok(())
}

fn run_summary(
    config: &XceptionAlignedConfig,
    image_size: usize,
    batch_size: usize,
) -> Result<()> {
    let device = default_device();
    info!("Backend: {}", backend_name());

    let model = config.init::<DefaultBackend>(&device)?;
    println!(
        "{} {} parameters",
        "Aligned Xception:".bold(),
        format_param_count(model.num_params())
    );

    let input = Tensor::<DefaultBackend, 4>::zeros(
        [batch_size, config.in_chans, image_size, image_size],
        &device,
    );
    let maps = model.forward_feature_maps(input.clone());
    for (info, map) in model.feature_info().iter().zip(&maps) {
        println!("  {:<10} {:?}", info.module, map.dims());
    }

    let logits = model.forward(input);
    println!("  {:<10} {:?}", "head", logits.dims());

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    init_logging(&log_config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Plan {
            config,
            output_stride,
            json,
        } => {
            let config = load_config(&config, output_stride)?;
            run_plan(&config, json)
        }
        Commands::Summary {
            config,
            output_stride,
            image_size,
            batch_size,
        } => {
            let config = load_config(&config, output_stride)?;
            run_summary(&config, image_size, batch_size)
        }
    }
}
