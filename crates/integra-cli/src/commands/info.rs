use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use integra_core::fileset::estimates::{ChannelStatistics, StatisticsRequest};
use integra_core::io::image_io::{load_planes, read_geometry};

#[derive(Args)]
pub struct InfoArgs {
    /// Input image file
    pub file: PathBuf,

    /// Also compute IKSS and MRS noise estimates (slow on large images)
    #[arg(long)]
    pub full: bool,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    let geometry = read_geometry(&args.file)?;

    println!("File:        {}", args.file.display());
    println!("Dimensions:  {}x{}", geometry.width, geometry.height);
    println!("Channels:    {}", geometry.channels);

    let request = StatisticsRequest {
        ikss: args.full,
        noise: args.full.then_some(0.01),
    };
    for (c, plane) in load_planes(&args.file)?.iter().enumerate() {
        let stats = ChannelStatistics::compute(plane, request);
        println!();
        println!("Channel {c}");
        println!("  Samples:   {}", stats.count);
        println!("  Mean:      {:.6}", stats.mean);
        println!("  Median:    {:.6}", stats.median);
        println!("  AvgDev:    {:.6} / {:.6}", stats.avg_dev.low, stats.avg_dev.high);
        println!("  MAD:       {:.6} / {:.6}", stats.mad.low, stats.mad.high);
        println!("  BWMV:      {:.6} / {:.6}", stats.bwmv.low, stats.bwmv.high);
        if let (Some(location), Some(scale)) = (stats.ikss_location, stats.ikss_scale) {
            println!("  IKSS:      {:.6} / {:.6}", location, scale);
        }
        if let Some(noise) = stats.noise {
            println!("  Noise:     {:.4e}", noise);
        }
    }

    Ok(())
}
