use ca_images::attributes::{ATTR_RETINA, ATTR_STANDARD, Multiplier, SourceSet};
use ca_images::density::DensityState;
use ca_images::headless::{PageSpec, simulate};
use ca_images::placeholder::{PlaceholderMarkup, collect_variants, render_placeholder};
use ca_images::selector::{resolve_multipliers, select};
use ca_images::types::{ImageId, LoadTrigger};
use ca_images::{config, output};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

fn parse_standard(raw: &str) -> Result<Multiplier, String> {
    Multiplier::parse(ATTR_STANDARD, Some(raw)).map_err(|e| e.to_string())
}

fn parse_retina(raw: &str) -> Result<Multiplier, String> {
    Multiplier::parse(ATTR_RETINA, Some(raw)).map_err(|e| e.to_string())
}

fn parse_trigger(raw: &str) -> Result<LoadTrigger, String> {
    LoadTrigger::from_attribute(raw)
        .ok_or_else(|| format!("expected lazy_load, document_ready or external_trigger, got '{raw}'"))
}

#[derive(Parser)]
#[command(name = "ca-images")]
#[command(about = "Contextually aware responsive images")]
#[command(long_about = "\
Contextually aware responsive images

Placeholders declare their image variants in data attributes:

  <noscript class=\"ca-images-noscript\"
            data-srcs='{\"320\":\"a-320.jpg\",\"640\":\"a-640.jpg\"}'
            data-load-trigger=\"lazy_load\">
    <img src=\"a-320.jpg\" alt=\"\">
  </noscript>

The engine picks the smallest variant at least as wide as the container
(times the display multiplier), loads lazy images as they approach the
viewport, and swaps live images up to wider variants when containers grow.
It never swaps a displayed image down.

Run 'ca-images gen-config' to print a documented ca-images.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Settings file (missing file means stock defaults)
    #[arg(long, default_value = "ca-images.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pick a source for a container width
    Select {
        /// Source set as JSON: {"320": "a.jpg", ...}
        #[arg(long)]
        sources: String,
        /// Container width in CSS pixels
        #[arg(long)]
        width: f64,
        /// Device pixel ratio (omit for a standard display)
        #[arg(long)]
        dpr: Option<f64>,
        /// Standard-display multiplier or "auto"
        #[arg(long, default_value = "auto", value_parser = parse_standard)]
        standard: Multiplier,
        /// High-density multiplier or "auto"
        #[arg(long, default_value = "auto", value_parser = parse_retina)]
        retina: Multiplier,
    },
    /// Run a headless page script and report what loaded
    Simulate {
        /// Page description (TOML)
        page: PathBuf,
    },
    /// Print placeholder markup for a directory of image variants
    Placeholder {
        /// Directory holding the size variants
        dir: PathBuf,
        /// URL prefix the variants are served under
        #[arg(long)]
        base_url: String,
        #[arg(long)]
        id: Option<u32>,
        #[arg(long, value_parser = parse_trigger)]
        trigger: Option<LoadTrigger>,
        /// Fade-in duration in milliseconds
        #[arg(long)]
        fade_ms: Option<u64>,
        #[arg(long, default_value = "")]
        alt: String,
        /// Extra class for the image (repeatable)
        #[arg(long = "class")]
        classes: Vec<String>,
        #[arg(long, default_value = "auto", value_parser = parse_standard)]
        standard: Multiplier,
        #[arg(long, default_value = "auto", value_parser = parse_retina)]
        retina: Multiplier,
    },
    /// Print a stock ca-images.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Select {
            sources,
            width,
            dpr,
            standard,
            retina,
        } => {
            let settings = config::load_settings(&cli.config)?;
            let sources = SourceSet::from_json(&sources)?;
            let density = DensityState::fixed(dpr.is_some_and(|r| r > 1.0), dpr);
            let multiplier = resolve_multipliers(
                standard,
                retina,
                density.device_ratio(),
                settings.density.fallback_ratio,
            )
            .for_display(&density);
            let selected = select(&sources, width, multiplier);
            output::print_selection(&sources, width, multiplier, &selected);
        }
        Command::Simulate { page } => {
            let settings = config::load_settings(&cli.config)?;
            let spec = PageSpec::load(&page)?;
            let report = simulate(&spec, &settings)?;
            output::print_simulation(&report);
        }
        Command::Placeholder {
            dir,
            base_url,
            id,
            trigger,
            fade_ms,
            alt,
            classes,
            standard,
            retina,
        } => {
            let settings = config::load_settings(&cli.config)?;
            let sources = collect_variants(&dir, &base_url)?;
            let mut markup = PlaceholderMarkup::new(settings.markup.placeholder_class, sources);
            markup.id = id.map(ImageId);
            markup.trigger = trigger;
            markup.fade = fade_ms.map(Duration::from_millis);
            markup.alt = alt;
            markup.classes = classes;
            markup.standard = standard;
            markup.retina = retina;
            println!("{}", render_placeholder(&markup).into_string());
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}
