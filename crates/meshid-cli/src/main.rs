use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use meshid_client::HttpBackend;
use meshid_core::{
    Backend, BackendHealth, CaptureController, CaptureSession, ComparisonEngine, IdentityId,
    IdentityRegistry, ImageBlob, InferenceClient, InferenceOutcome, MatchCandidate, Mode,
};
use meshid_hw::{Camera, V4l2Camera};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "meshid", about = "3D face mesh registration and verification CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Where the probe image comes from.
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct ImageSource {
    /// Image file to reconstruct (JPEG, PNG, ...)
    #[arg(long, value_name = "FILE")]
    image: Option<PathBuf>,
    /// Capture a still from the configured camera instead
    #[arg(long)]
    camera: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconstruct a face and register it under a name
    Register {
        /// Display name for the new identity
        #[arg(short, long)]
        name: String,
        #[command(flatten)]
        source: ImageSource,
    },
    /// Compare a face against one registered identity
    Verify {
        /// Identity ID to compare against
        #[arg(long)]
        id: IdentityId,
        #[command(flatten)]
        source: ImageSource,
    },
    /// Rank all registered identities against a face
    Identify {
        /// Keep at most this many candidates (overrides MESHID_IDENTIFY_LIMIT; 0 keeps all)
        #[arg(long)]
        top: Option<usize>,
        #[command(flatten)]
        source: ImageSource,
    },
    /// List registered identities
    List,
    /// Rename a registered identity
    Rename {
        /// Identity ID
        id: IdentityId,
        /// New display name
        name: String,
    },
    /// Remove a registered identity
    Remove {
        /// Identity ID to remove
        id: IdentityId,
    },
    /// Show backend status
    Status,
    /// Reconstruct a face and write the mesh as OBJ text
    Export {
        /// Output path for the mesh
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
        #[command(flatten)]
        source: ImageSource,
    },
    /// Download the stored mesh of a registered identity
    Download {
        /// Identity ID
        #[arg(long)]
        id: IdentityId,
        /// Output path for the mesh
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
    },
    /// Run camera diagnostics
    Test {
        /// Save the captured still to this path
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Test { out } => camera_test(&config, out.as_deref()),
        command => run(command, &config).await,
    }
}

async fn run(command: Commands, config: &Config) -> Result<()> {
    let backend: Arc<dyn Backend> =
        Arc::new(HttpBackend::new(&config.backend_url, config.request_timeout())?);

    match command {
        Commands::Register { name, source } => {
            let mut session = reconstruct(config, &backend, &source).await?;
            let registry = IdentityRegistry::new(backend.clone());
            let identity = session.register(&registry, &name).await?;
            println!("Registered {} with ID {}", identity.name, identity.id);
        }
        Commands::Verify { id, source } => {
            let mut session = reconstruct(config, &backend, &source).await?;
            let engine = ComparisonEngine::new(backend.clone(), config.thresholds);
            let verdict = session.verify(&engine, id).await?;
            println!("{verdict}");
        }
        Commands::Identify { top, source } => {
            let mut session = reconstruct(config, &backend, &source).await?;
            let mut engine = ComparisonEngine::new(backend.clone(), config.thresholds);
            let limit = top.unwrap_or(config.identify_limit);
            if limit > 0 {
                engine = engine.with_limit(limit);
            }
            let candidates = session.identify(&engine).await?;
            print_candidates(&candidates);
        }
        Commands::List => {
            let mut registry = IdentityRegistry::new(backend.clone());
            let identities = registry.list().await;
            if let Some(error) = registry.last_error() {
                bail!("could not list identities: {error}");
            }
            if identities.is_empty() {
                println!("No identities registered");
            }
            for identity in identities {
                println!("{:>6}  {}", identity.id, identity.name);
            }
        }
        Commands::Rename { id, name } => {
            let registry = IdentityRegistry::new(backend.clone());
            let identity = registry.rename(id, &name).await?;
            println!("Renamed identity {} to {}", identity.id, identity.name);
        }
        Commands::Remove { id } => {
            let mut registry = IdentityRegistry::new(backend.clone());
            if !registry.remove(id).await {
                match registry.last_error() {
                    Some(error) => bail!("could not remove identity {id}: {error}"),
                    None => bail!("could not remove identity {id}"),
                }
            }
            println!("Removed identity {id}");
        }
        Commands::Status => {
            match backend.health().await {
                BackendHealth::Online => println!("backend: online ({})", config.backend_url),
                BackendHealth::Offline(reason) => {
                    println!("backend: offline ({}): {reason}", config.backend_url);
                    return Ok(());
                }
            }
            let registry = IdentityRegistry::new(backend.clone());
            match registry.try_list().await {
                Ok(identities) => println!("identities: {}", identities.len()),
                Err(error) => println!("identities: unavailable ({error})"),
            }
            println!(
                "thresholds: match > {}, uncertain >= {}",
                config.thresholds.match_threshold, config.thresholds.uncertain_threshold
            );
        }
        Commands::Export { out, source } => {
            let session = reconstruct(config, &backend, &source).await?;
            let text = session
                .mesh_text()
                .context("inference produced no mesh")?;
            std::fs::write(&out, text)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Wrote mesh to {}", out.display());
        }
        Commands::Download { id, out } => {
            let registry = IdentityRegistry::new(backend.clone());
            let identity = registry
                .try_list()
                .await?
                .into_iter()
                .find(|i| i.id == id)
                .with_context(|| format!("identity {id} does not exist"))?;
            let (vertices, faces) = registry.load_mesh(&identity).await?;
            std::fs::write(&out, meshid_core::mesh::encode(&vertices, &faces))
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!(
                "Wrote mesh of {} ({} vertices, {} faces) to {}",
                identity.name,
                vertices.len(),
                faces.len(),
                out.display()
            );
        }
        Commands::Test { out } => camera_test(config, out.as_deref())?,
    }

    Ok(())
}

fn camera(config: &Config) -> V4l2Camera {
    V4l2Camera::new(
        config.camera_device.clone(),
        config.warmup_frames,
        config.jpeg_quality,
    )
}

/// Drive a capture session through one image and its inference.
async fn reconstruct(
    config: &Config,
    backend: &Arc<dyn Backend>,
    source: &ImageSource,
) -> Result<CaptureSession<V4l2Camera>> {
    let mut session = CaptureSession::new(camera(config));

    let ticket = match (&source.image, source.camera) {
        (Some(path), _) => {
            session.select_mode(Mode::Upload);
            session.select_file(read_image(path)?)?
        }
        (None, true) => {
            session.select_mode(Mode::Camera);
            session.start_camera()?;
            session.capture()?
        }
        (None, false) => bail!("either --image or --camera is required"),
    };
    tracing::info!(
        generation = ticket.generation,
        file = %ticket.image.file_name,
        "running inference"
    );

    let client = InferenceClient::new(backend.clone());
    match session.run_inference(&client, ticket).await? {
        InferenceOutcome::Applied => Ok(session),
        InferenceOutcome::Stale => bail!("inference result was superseded"),
    }
}

fn read_image(path: &Path) -> Result<ImageBlob> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    Ok(ImageBlob::from_file_bytes(bytes, file_name))
}

fn print_candidates(candidates: &[MatchCandidate]) {
    if candidates.is_empty() {
        println!("No identities to compare against");
        return;
    }
    println!("{:>4}  {:>6}  {:>7}  NAME", "RANK", "ID", "SCORE");
    for (rank, c) in candidates.iter().enumerate() {
        let score = if c.score.is_nan() {
            "n/a".to_string()
        } else {
            format!("{:.1}%", c.score * 100.0)
        };
        println!("{:>4}  {:>6}  {:>7}  {}", rank + 1, c.identity_id, score, c.identity_name);
    }
}

fn camera_test(config: &Config, out: Option<&Path>) -> Result<()> {
    println!("Running camera diagnostics...");

    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for dev in &devices {
        println!("  {}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
    }

    println!("Capturing from {}", config.camera_device);
    let mut controller = CaptureController::new(camera(config));
    controller.select_mode(Mode::Camera);
    controller
        .start_camera()
        .with_context(|| format!("failed to open {}", config.camera_device))?;
    let still = controller.capture().context("snapshot failed")?;
    println!("Captured {} ({} bytes)", still.file_name, still.bytes.len());

    if let Some(path) = out {
        std::fs::write(path, &still.bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Saved still to {}", path.display());
    }

    controller.stop();
    println!("Camera released");
    Ok(())
}
