//! Command-line driver for the Vellum editor core.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use semver::Version;
use serde_json::{json, Value};
use vellum_core::prelude::*;
use vellum_core::MemoryRenderer;

/// Vellum - headless driver for the diagram editor core.
#[derive(Parser, Debug)]
#[command(name = "vellum")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Print the resolved editor options as JSON.
    Config {
        /// TOML file with editor options.
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Run a scripted editing session and print every event.
    Demo {
        /// TOML file with editor options.
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Undo history bound (overrides VELLUM_MAX_HISTORY).
        #[arg(long)]
        history: Option<usize>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    match args.command {
        Command::Config { file } => run_config(file.as_deref()),
        Command::Demo { file, history } => run_demo(file.as_deref(), history).await,
    }
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "vellum=debug" } else { "vellum=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    if env_vars::log_json() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }
}

/// Options from the file (or defaults), then environment overrides.
fn load_options(file: Option<&Path>) -> Result<EditorOptions> {
    let mut options = match file {
        Some(path) => EditorOptions::from_file(path)
            .with_context(|| format!("Failed to load options from {}", path.display()))?,
        None => EditorOptions::default(),
    };
    options.apply_env();
    options.validate()?;
    Ok(options)
}

fn run_config(file: Option<&Path>) -> Result<()> {
    let options = load_options(file)?;
    println!("{}", serde_json::to_string_pretty(&options)?);
    Ok(())
}

/// Adds one pen to the document; undo removes it again.
struct AddPen;

#[async_trait]
impl vellum_core::Command for AddPen {
    fn id(&self) -> &str {
        "add-pen"
    }

    fn label(&self) -> &str {
        "Add pen"
    }

    fn undoable(&self) -> bool {
        true
    }

    fn has_undo(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &CommandContext) -> anyhow::Result<()> {
        let renderer = ctx.renderer().context("add-pen needs a renderer")?;
        let pen = ctx.arg("pen").cloned().context("missing 'pen' argument")?;
        renderer.add_pens(vec![pen])?;
        renderer.render();
        Ok(())
    }

    async fn undo(&self, ctx: &CommandContext) -> anyhow::Result<()> {
        let renderer = ctx.renderer().context("add-pen needs a renderer")?;
        let pen = ctx.arg("pen").cloned().context("missing 'pen' argument")?;
        renderer.delete_pens(&[pen]);
        renderer.render();
        Ok(())
    }
}

/// Counts executed commands through the plugin context.
struct Statistics {
    metadata: PluginMetadata,
    executed: Arc<Mutex<u64>>,
    subscription: Mutex<Option<Subscription>>,
}

impl Statistics {
    fn new() -> Self {
        Self {
            metadata: PluginMetadata::new("statistics", "Statistics", Version::new(0, 1, 0))
                .with_description("Counts executed commands"),
            executed: Arc::new(Mutex::new(0)),
            subscription: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Plugin for Statistics {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn activate(&self, ctx: &PluginContext) -> anyhow::Result<()> {
        let executed = self.executed.clone();
        let subscription = ctx.event_bus().on(
            events::COMMAND_EXECUTED,
            move |_| {
                let executed = executed.clone();
                async move {
                    *executed.lock() += 1;
                    Ok(())
                }
            },
            ListenerOptions::new().with_priority(-10),
        );
        *self.subscription.lock() = Some(subscription);
        Ok(())
    }

    async fn deactivate(&self, _ctx: &PluginContext) -> anyhow::Result<()> {
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.unsubscribe();
        }
        tracing::info!("Statistics: {} commands executed", *self.executed.lock());
        Ok(())
    }
}

/// Print every core event to stdout.
fn trace_events(bus: &EventBus) {
    for event in events::ALL {
        let name = event.to_string();
        bus.on(
            *event,
            move |data: Value| {
                let name = name.clone();
                async move {
                    println!("{:<26} {}", name, data);
                    Ok(())
                }
            },
            ListenerOptions::new().with_priority(100),
        );
    }
}

async fn run_demo(file: Option<&Path>, history: Option<usize>) -> Result<()> {
    let options = load_options(file)?;
    let editor = Editor::new()?;
    trace_events(editor.event_bus());

    if let Some(size) = history {
        editor.command_manager().set_max_history_size(size);
    }
    editor.register_command(Arc::new(AddPen));
    editor.register_plugin(Arc::new(Statistics::new()))?;

    let renderer = Arc::new(MemoryRenderer::new());
    editor
        .init(EditorOptionsPatch::from(&options), renderer.clone())
        .await?;

    editor.transition_to(modes::DRAWING).await?;
    for (i, x) in [10.0, 60.0, 110.0].into_iter().enumerate() {
        let pen = json!({ "id": format!("rect-{}", i), "name": "rectangle", "x": x, "y": 20.0 });
        editor
            .execute_command("add-pen", CommandContext::new().with_arg("pen", pen))
            .await?;
    }
    editor.transition_to(modes::IDLE).await?;

    editor.undo().await?;
    editor.redo().await?;
    editor.undo().await?;
    editor.zoom_to(8.0, None).await?;

    println!(
        "pens: {}, undo: {}, redo: {}, scale: {}",
        renderer.pen_count(),
        editor.command_manager().get_undo_stack_size(),
        editor.command_manager().get_redo_stack_size(),
        editor.get_scale()?
    );

    editor.destroy().await;
    Ok(())
}
