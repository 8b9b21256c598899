use anyhow::{Context, Result, anyhow, bail};
use clap::{ArgAction, Parser};
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

#[cfg(feature = "server")]
use areamap::serve::{ServeArgs, run_serve};
use areamap::{Highlight, StudyDocument, render_svg};

#[derive(Debug, Clone, PartialEq, Eq)]
enum InputSource {
    Stdin,
    File(PathBuf),
}

#[derive(Debug, Clone)]
enum OutputDestination {
    Stdout,
    File(PathBuf),
}

#[derive(Debug, Parser)]
#[command(
    name = "areamap",
    about = "Render study area maps to SVG, one layer at a time."
)]
pub struct RenderArgs {
    /// Path to a study document. Use '-' to read from stdin.
    #[arg(short = 'i', long = "input", conflicts_with = "study")]
    input: Option<String>,

    /// Render a study fetched from the study service instead of a file.
    #[arg(short = 's', long = "study")]
    study: Option<String>,

    /// Base URL of the study service (defaults to AREAMAP_API_URL).
    #[arg(long = "api-url", requires = "study")]
    api_url: Option<String>,

    /// Layer to project, by id or name. Defaults to the "All" layer.
    #[arg(short = 'l', long = "layer")]
    layer: Option<String>,

    /// Path to the output file. Use '-' to write to stdout.
    #[arg(short = 'o', long = "output")]
    output: Option<String>,

    /// Background color of the rendered canvas.
    #[arg(short = 'b', long = "background-color", default_value = "white")]
    background_color: String,

    /// Only log warnings and errors.
    #[arg(short = 'q', long = "quiet", action = ArgAction::SetTrue)]
    quiet: bool,
}

fn init_logging(quiet: bool) {
    let default_filter = if quiet { "warn" } else { "info" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .try_init();
}

#[cfg(feature = "server")]
pub async fn dispatch() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(|s| s.as_str()) {
        Some("serve") => {
            let serve_args = ServeArgs::parse_from(
                std::iter::once(args[0].clone()).chain(args.iter().skip(2).cloned()),
            );
            init_logging(false);
            run_serve(serve_args).await
        }
        Some("render") => {
            let render_args = RenderArgs::parse_from(
                std::iter::once(args[0].clone()).chain(args.iter().skip(2).cloned()),
            );
            run_render(render_args).await
        }
        _ => {
            let render_args = RenderArgs::parse_from(args);
            run_render(render_args).await
        }
    }
}

#[cfg(not(feature = "server"))]
pub fn dispatch_sync() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(|s| s.as_str()) {
        Some("serve") => Err(anyhow!(
            "'serve' command requires the 'server' feature to be enabled"
        )),
        Some("render") => {
            let render_args = RenderArgs::parse_from(
                std::iter::once(args[0].clone()).chain(args.iter().skip(2).cloned()),
            );
            run_render_sync(render_args)
        }
        _ => {
            let render_args = RenderArgs::parse_from(args);
            run_render_sync(render_args)
        }
    }
}

#[cfg(feature = "server")]
async fn run_render(cli: RenderArgs) -> Result<()> {
    init_logging(cli.quiet);
    let svg = match &cli.study {
        Some(study) => render_remote(&cli, study).await?,
        None => render_local(&cli)?,
    };
    write_output(parse_output(cli.output.as_deref()), svg.as_bytes(), cli.quiet)
}

#[cfg(not(feature = "server"))]
fn run_render_sync(cli: RenderArgs) -> Result<()> {
    init_logging(cli.quiet);
    if cli.study.is_some() {
        bail!("rendering from the study service requires the 'server' feature to be enabled");
    }
    let svg = render_local(&cli)?;
    write_output(parse_output(cli.output.as_deref()), svg.as_bytes(), cli.quiet)
}

fn render_local(cli: &RenderArgs) -> Result<String> {
    let document = match parse_input(cli.input.as_deref())? {
        InputSource::File(path) => StudyDocument::load(&path)?,
        InputSource::Stdin => {
            let mut contents = String::new();
            io::stdin()
                .read_to_string(&mut contents)
                .context("failed to read study from stdin")?;
            StudyDocument::from_json(&contents)?
        }
    };

    let model = document.render_model(cli.layer.as_deref())?;
    log::info!(
        "rendering study '{}' on layer '{}' ({} nodes)",
        document.id,
        model.layer_id,
        model.nodes.len()
    );
    render_svg(&model, &Highlight::None, &cli.background_color)
}

#[cfg(feature = "server")]
async fn render_remote(cli: &RenderArgs, study: &str) -> Result<String> {
    use areamap::{ApiConfig, DiagramController, HttpStudyApi, SvgSurface};

    let mut config = ApiConfig::default();
    if let Some(url) = &cli.api_url {
        config = config.with_base_url(url.clone());
    }
    let api = HttpStudyApi::new(&config)?;
    let controller = DiagramController::new(api, SvgSurface::new(cli.background_color.clone()));
    controller
        .load_study(study)
        .await
        .with_context(|| format!("failed to load study '{study}' from {}", config.base_url))?;

    if let Some(wanted) = &cli.layer {
        let layer_id = controller
            .layers()
            .into_iter()
            .find(|layer| layer.id == *wanted)
            .or_else(|| {
                controller
                    .layers()
                    .into_iter()
                    .find(|layer| layer.name == *wanted)
            })
            .map(|layer| layer.id)
            .ok_or_else(|| anyhow!("study '{study}' has no layer '{wanted}'"))?;
        controller.set_active_layer(&layer_id)?;
    }

    let surface = controller.surface();
    surface
        .svg()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("study '{study}' produced no drawing"))
}

fn parse_input(input: Option<&str>) -> Result<InputSource> {
    match input {
        Some("-") | None => Ok(InputSource::Stdin),
        Some(path_str) => {
            let path = PathBuf::from(path_str);
            if !path.exists() {
                bail!("input file '{path_str}' does not exist");
            }
            Ok(InputSource::File(path))
        }
    }
}

fn parse_output(output: Option<&str>) -> OutputDestination {
    match output {
        Some("-") | None => OutputDestination::Stdout,
        Some(path) => OutputDestination::File(PathBuf::from(path)),
    }
}

fn write_output(dest: OutputDestination, bytes: &[u8], quiet: bool) -> Result<()> {
    match dest {
        OutputDestination::Stdout => {
            let mut stdout = io::stdout();
            stdout.write_all(bytes)?;
            stdout.flush()?;
        }
        OutputDestination::File(path) => {
            fs::write(&path, bytes)
                .with_context(|| format!("failed to write '{}'", path.display()))?;
            if !quiet {
                println!("Rendered map -> {}", path.display());
            }
        }
    }
    Ok(())
}
