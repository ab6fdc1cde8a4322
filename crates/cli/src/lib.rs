use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use doc_model::{
    Color, InteractionMode, OverlayOutcome, PercentPoint, PercentSize, PointerEvent, PointerTarget,
};
use editor_core::{Editor, EditorError};
use pdf_engine::{default_engine, LopdfEngine, OpenSource, PdfEngine};
use pdf_export::ExportFont;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use storage::{EditorPreferences, Storage};

#[derive(Debug, Parser)]
#[command(name = "pdf-overlay")]
#[command(about = "Place text and cover-up rectangles on PDF pages")]
pub struct Cli {
    /// Directory holding preferences.json instead of the platform data directory.
    #[arg(long, global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print machine-readable PDF metadata.
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Render a page surface to PNG.
    Render {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, default_value_t = 1)]
        page: u32,
        /// Zoom factor; defaults to the configured initial scale.
        #[arg(long)]
        scale: Option<f32>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// List the positioned text runs of a page as JSON.
    TextItems {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Apply a JSON list of placements and write the edited PDF.
    Apply {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, value_name = "JSON")]
        annotations: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
        /// TrueType font to embed instead of the configured export font.
        #[arg(long, value_name = "TTF")]
        font_file: Option<PathBuf>,
    },
    /// Inspect stored preferences.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Print the preferences file location.
    Path,
    /// Print the effective preferences as JSON.
    Show,
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    page_count: u32,
    pages: Vec<PageOutput>,
}

#[derive(Debug, Serialize)]
struct PageOutput {
    page: u32,
    width: f32,
    height: f32,
}

/// One entry of the `apply` input file. Positions and sizes are percentages
/// of the page, measured from the top-left corner.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Placement {
    Text {
        page: u32,
        x: f32,
        y: f32,
        text: String,
        #[serde(default)]
        font_size: Option<f32>,
        #[serde(default)]
        color: Option<Color>,
        #[serde(default)]
        background_patch: bool,
    },
    Rectangle {
        page: u32,
        x: f32,
        y: f32,
        #[serde(default)]
        width: Option<f32>,
        #[serde(default)]
        height: Option<f32>,
    },
    /// Replace the page text found at the point.
    Rewrite { page: u32, x: f32, y: f32, text: String },
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    let config_dir = cli.config_dir;

    match cli.command {
        Commands::Info { file } => run_info(&file),
        Commands::Render { file, page, scale, output } => {
            run_render(&file, page, scale, output.as_deref(), config_dir)
        }
        Commands::TextItems { file, page } => run_text_items(&file, page),
        Commands::Apply { file, annotations, output, font_file } => {
            run_apply(&file, &annotations, output.as_deref(), font_file.as_deref(), config_dir)
        }
        Commands::Config { action } => run_config(action, config_dir),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn storage(config_dir: Option<PathBuf>) -> Result<Storage> {
    match config_dir {
        Some(dir) => Ok(Storage::with_root(dir)),
        None => Storage::from_default_project().context("failed to locate preferences"),
    }
}

fn load_preferences(config_dir: Option<PathBuf>) -> Result<EditorPreferences> {
    let store = storage(config_dir)?;
    store
        .load_preferences()
        .with_context(|| format!("failed to load {}", store.preferences_path().display()))
}

fn run_info(file: &Path) -> Result<()> {
    ensure_pdf_exists(file)?;

    let mut engine = default_engine();
    let handle = engine.open(OpenSource::from(file)).context("failed to open PDF")?;

    let page_count = engine.page_count(handle)?;
    let mut pages = Vec::with_capacity(page_count as usize);
    for index in 0..page_count {
        let size = engine.page_size(handle, index)?;
        pages.push(PageOutput { page: index + 1, width: size.width_pt, height: size.height_pt });
    }

    let payload = InfoOutput { path: file.display().to_string(), page_count, pages };

    let json = serde_json::to_string_pretty(&payload)?;
    println!("{json}");

    engine.close(handle)?;

    Ok(())
}

fn page_index(engine: &LopdfEngine, handle: pdf_engine::DocumentHandle, page: u32) -> Result<u32> {
    let page_count = engine.page_count(handle)?;
    if page == 0 || page > page_count {
        anyhow::bail!("--page must be between 1 and {page_count}");
    }
    Ok(page - 1)
}

fn run_render(
    file: &Path,
    page: u32,
    scale: Option<f32>,
    output: Option<&Path>,
    config_dir: Option<PathBuf>,
) -> Result<()> {
    ensure_pdf_exists(file)?;

    let preferences = load_preferences(config_dir)?;
    let scale = match scale {
        Some(scale) if scale.is_finite() => {
            scale.clamp(preferences.min_scale, preferences.max_scale)
        }
        Some(scale) => anyhow::bail!("--scale must be a finite number, got {scale}"),
        None => preferences.initial_scale,
    };

    let mut engine = default_engine();
    let handle = engine.open(OpenSource::from(file)).context("failed to open PDF")?;
    let index = page_index(&engine, handle, page)?;

    let surface = engine.render_surface(handle, index, scale).context("failed to render page")?;

    let output = output.map(ToOwned::to_owned).unwrap_or_else(|| default_render_output(file, page));

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }

    surface
        .image
        .save(&output)
        .with_context(|| format!("failed to write image to {}", output.display()))?;

    println!("{}", output.display());

    engine.close(handle)?;

    Ok(())
}

fn run_text_items(file: &Path, page: u32) -> Result<()> {
    ensure_pdf_exists(file)?;

    let mut engine = default_engine();
    let handle = engine.open(OpenSource::from(file)).context("failed to open PDF")?;
    let index = page_index(&engine, handle, page)?;

    let items = engine.text_items(handle, index).context("failed to read text layer")?;
    println!("{}", serde_json::to_string_pretty(&items)?);

    engine.close(handle)?;

    Ok(())
}

fn editor_error(error: EditorError) -> anyhow::Error {
    let message = error.user_message();
    anyhow::Error::new(error).context(message)
}

fn apply_placement(editor: &mut Editor<LopdfEngine>, placement: Placement) -> Result<()> {
    let page = match &placement {
        Placement::Text { page, .. }
        | Placement::Rectangle { page, .. }
        | Placement::Rewrite { page, .. } => *page,
    };
    if page == 0 || page > editor.page_count() {
        anyhow::bail!("placement page {page} is outside 1..={}", editor.page_count());
    }
    editor.go_to_page(page).map_err(editor_error)?;

    match placement {
        Placement::Text { x, y, text, font_size, color, background_patch, .. } => {
            let overlay = editor.overlay_mut();
            let id = overlay.place_text(page, PercentPoint::new(x, y), text);
            if let Some(size) = font_size {
                overlay.set_font_size(id, size)?;
            }
            if let Some(color) = color {
                overlay.set_color(id, color)?;
            }
            overlay.set_background_patch(id, background_patch)?;
        }
        Placement::Rectangle { x, y, width, height, .. } => {
            let defaults = editor.overlay().defaults().rectangle_size;
            let size = PercentSize::new(
                width.unwrap_or(defaults.width),
                height.unwrap_or(defaults.height),
            );
            editor.overlay_mut().place_rectangle(page, PercentPoint::new(x, y), size);
        }
        Placement::Rewrite { x, y, text, .. } => {
            let point = PercentPoint::new(x, y);
            let target = editor.hit_test(point);
            if !matches!(target, PointerTarget::TextItem(_)) {
                anyhow::bail!("no page text at ({x}, {y}) on page {page}");
            }

            let view = editor.view().context("page is not rendered")?;
            let container = view.container();
            let pointer = doc_model::percent_to_pixel(point, container);

            editor.set_mode(InteractionMode::RewriteText);
            let outcome = editor.pointer(PointerEvent::Down { target, pointer }, container);
            editor.set_mode(InteractionMode::View);

            match outcome.map_err(editor_error)? {
                OverlayOutcome::Created(id) => editor.overlay_mut().set_text(id, text)?,
                other => anyhow::bail!("rewrite at ({x}, {y}) was not applied: {other:?}"),
            }
        }
    }

    Ok(())
}

fn run_apply(
    file: &Path,
    annotations: &Path,
    output: Option<&Path>,
    font_file: Option<&Path>,
    config_dir: Option<PathBuf>,
) -> Result<()> {
    ensure_pdf_exists(file)?;

    let raw = fs::read(annotations)
        .with_context(|| format!("failed to read {}", annotations.display()))?;
    let placements: Vec<Placement> = serde_json::from_slice(&raw)
        .with_context(|| format!("invalid annotations file {}", annotations.display()))?;

    let preferences = load_preferences(config_dir)?;
    let bytes = fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let name = file.file_name().and_then(|name| name.to_str()).unwrap_or_default().to_owned();

    let mut editor = Editor::new(default_engine(), preferences);
    editor.open(name, bytes).map_err(editor_error).context("failed to open PDF")?;

    for (index, placement) in placements.into_iter().enumerate() {
        apply_placement(&mut editor, placement)
            .with_context(|| format!("placement #{} could not be applied", index + 1))?;
    }

    let exported = match font_file {
        Some(path) => {
            let font = fs::read(path)
                .with_context(|| format!("failed to read font {}", path.display()))?;
            editor.export_with_font(ExportFont::TrueType(font))
        }
        None => editor.export(),
    }
    .map_err(editor_error)
    .context("failed to export PDF")?;

    let output = output
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| file.with_file_name(&exported.file_name));
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&output, &exported.bytes)
        .with_context(|| format!("failed to write {}", output.display()))?;

    tracing::info!(annotations = editor.overlay().len(), output = %output.display(), "applied");
    println!("{}", output.display());

    Ok(())
}

fn run_config(action: ConfigAction, config_dir: Option<PathBuf>) -> Result<()> {
    let store = storage(config_dir)?;

    match action {
        ConfigAction::Path => println!("{}", store.preferences_path().display()),
        ConfigAction::Show => {
            let preferences = store.load_preferences().context("failed to load preferences")?;
            println!("{}", serde_json::to_string_pretty(&preferences)?);
        }
    }

    Ok(())
}

fn ensure_pdf_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("path is not a file: {}", path.display());
    }

    Ok(())
}

fn default_render_output(file: &Path, page: u32) -> PathBuf {
    let stem = file.file_stem().and_then(|name| name.to_str()).unwrap_or("page");

    file.with_file_name(format!("{stem}-page-{page}.png"))
}
