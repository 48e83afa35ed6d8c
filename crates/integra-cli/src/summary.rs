use std::path::Path;

use console::Style;
use integra_core::pipeline::config::{IntegrationConfig, Rejection};
use integra_core::pipeline::IntegrationReport;

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    path: Style,
    warning: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            path: Style::new().underlined(),
            warning: Style::new().yellow(),
        }
    }
}

fn rule(s: &Styles, width: usize) {
    println!("  {}", s.title.apply_to("\u{2550}".repeat(width)));
}

pub fn print_integration_summary(config: &IntegrationConfig, files: usize, output: &Path) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("Image Integration"));
    rule(&s, 17);
    println!();

    println!("  {:<16}{}", s.label.apply_to("Files"), s.value.apply_to(files));
    println!("  {:<16}{}", s.label.apply_to("Output"), s.path.apply_to(output.display()));
    if let Some(roi) = config.roi {
        println!(
            "  {:<16}{}",
            s.label.apply_to("ROI"),
            s.value.apply_to(format!("({}, {}) - ({}, {})", roi.x0, roi.y0, roi.x1, roi.y1))
        );
    }
    println!();

    println!("  {}", s.header.apply_to("Combination"));
    println!("    {:<14}{}", s.label.apply_to("Operation"), s.method.apply_to(config.combination));
    println!(
        "    {:<14}{}",
        s.label.apply_to("Normalization"),
        s.method.apply_to(config.normalization.mode)
    );
    println!("    {:<14}{}", s.label.apply_to("Weights"), s.method.apply_to(config.weights.mode));
    println!(
        "    {:<14}{}",
        s.label.apply_to("Scale"),
        s.method.apply_to(config.weights.scale_estimator)
    );
    println!();

    if config.rejection.algorithm.is_enabled() {
        println!("  {}", s.header.apply_to("Rejection"));
        println!(
            "    {:<14}{}",
            s.label.apply_to("Algorithm"),
            s.method.apply_to(&config.rejection.algorithm)
        );
        print_rejection_params(&s, &config.rejection.algorithm);
        println!(
            "    {:<14}{}",
            s.label.apply_to("Normalization"),
            s.method.apply_to(config.rejection.normalization)
        );
        let sides = match (config.rejection.clip_low, config.rejection.clip_high) {
            (true, true) => "low + high",
            (true, false) => "low",
            (false, true) => "high",
            (false, false) => "none",
        };
        println!("    {:<14}{}", s.label.apply_to("Clip"), s.value.apply_to(sides));
        if config.large_scale_low() || config.large_scale_high() {
            println!(
                "    {:<14}{}",
                s.label.apply_to("Large-scale"),
                s.value.apply_to(format!(
                    "low {} / high {}",
                    config.large_scale_low(),
                    config.large_scale_high()
                ))
            );
        }
    } else {
        println!(
            "  {:<16}{}",
            s.header.apply_to("Rejection"),
            s.disabled.apply_to("disabled")
        );
    }
    if config.range.is_enabled() {
        println!(
            "    {:<14}{}",
            s.label.apply_to("Range"),
            s.value.apply_to(format!("{} .. {}", config.range.low, config.range.high))
        );
    }
    println!();
}

fn print_rejection_params(s: &Styles, rejection: &Rejection) {
    let line = |label: &str, value: String| {
        println!("    {:<14}{}", s.label.apply_to(label), s.value.apply_to(value));
    };
    match rejection {
        Rejection::None => {}
        Rejection::MinMax(p) => line("Count", format!("{} low / {} high", p.low, p.high)),
        Rejection::Percentile(p) => line("Percentile", format!("{} / {}", p.low, p.high)),
        Rejection::Sigma(p) | Rejection::AveragedSigma(p) => {
            line("Sigma", format!("{} / {}", p.low, p.high));
        }
        Rejection::WinsorizedSigma(p) => {
            line("Sigma", format!("{} / {}", p.low, p.high));
            line("Cutoff", format!("{}", p.cutoff));
        }
        Rejection::LinearFit(p) => line("Tolerance", format!("{} / {}", p.low, p.high)),
        Rejection::Esd(p) => {
            line("Outliers", format!("{:.0}%", p.outliers_fraction * 100.0));
            line("Significance", format!("{}", p.alpha));
            line("Relaxation", format!("{}", p.low_relaxation));
        }
        Rejection::Rcr(p) => line("Limit", format!("{}", p.limit)),
        Rejection::CcdClip(p) => {
            line("Sigma", format!("{} / {}", p.low, p.high));
            line("Gain", format!("{} e-/DN", p.gain));
            line("Read noise", format!("{} e-", p.read_noise));
            line("Scale noise", format!("{}", p.scale_noise));
        }
    }
}

pub fn print_report(report: &IntegrationReport, details: bool) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("Integration Report"));
    rule(&s, 18);
    println!();
    println!(
        "  {:<16}{}",
        s.label.apply_to("Geometry"),
        s.value
            .apply_to(format!("{}x{}x{}", report.width, report.height, report.channels))
    );
    println!(
        "  {:<16}{}",
        s.label.apply_to("Output range"),
        s.value
            .apply_to(format!("{:.6} .. {:.6}", report.output_range.0, report.output_range.1))
    );
    println!(
        "  {:<16}{}",
        s.label.apply_to("Elapsed"),
        s.value.apply_to(format!("{:.2}s", report.elapsed.as_secs_f64()))
    );
    println!();

    for c in 0..report.channels {
        let total = report.total_rejected(c);
        println!("  {}", s.header.apply_to(format!("Channel {c}")));
        println!(
            "    {:<14}{}",
            s.label.apply_to("Rejected"),
            s.value.apply_to(format!(
                "{} low, {} high ({:.3}%)",
                total.low + total.range_low,
                total.high + total.range_high,
                report.rejected_fraction(c) * 100.0
            ))
        );
        if let Some(e) = report.evaluation.get(c) {
            println!(
                "    {:<14}{}",
                s.label.apply_to("Noise"),
                s.value
                    .apply_to(format!("{:.4e} ({})", e.noise.sigma, e.noise.algorithm))
            );
            println!("    {:<14}{}", s.label.apply_to("SNR"), s.value.apply_to(format!("{:.4e}", e.snr)));
            if let Some(r) = e.noise_reduction {
                println!(
                    "    {:<14}{}",
                    s.label.apply_to("Noise red."),
                    s.value
                        .apply_to(format!("{:.4} reference, {:.4} median", r.reference, r.median))
                );
            }
            if let Some(ref psf) = e.psf {
                println!(
                    "    {:<14}{}",
                    s.label.apply_to("PSF signal"),
                    s.value
                        .apply_to(format!("{} stars, flux {:.4e}", psf.stars, psf.total_flux))
                );
            }
        }
        println!();
    }

    if details {
        println!("  {}", s.header.apply_to("Files"));
        for file in &report.files {
            println!("    {}", s.path.apply_to(file.path.display()));
            for (c, ch) in file.channels.iter().enumerate() {
                println!(
                    "      {} weight {:.4}  location {:.6}  rejected {}/{}",
                    s.label.apply_to(format!("ch {c}")),
                    ch.weight,
                    ch.location,
                    ch.rejected.low + ch.rejected.range_low,
                    ch.rejected.high + ch.rejected.range_high
                );
            }
        }
        println!();
    }

    if report.drizzle_failures > 0 {
        println!(
            "  {}",
            s.warning
                .apply_to(format!("{} drizzle data file(s) not written", report.drizzle_failures))
        );
    }
    for w in &report.warnings {
        println!("  {} {}", s.warning.apply_to("warning:"), w);
    }
}
