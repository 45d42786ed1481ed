use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::adapter::{DetectOptions, DetectionAdapter};
use facegate_core::enhance::{self, EnhanceOptions, EnhancementLevel};
use facegate_core::{DetectorModel, OnnxFaceDetector, SensitivityLevel};
use std::path::{Path, PathBuf};

// `#[zbus::proxy]` generates `FaceGateProxy` for the daemon interface.
#[zbus::proxy(
    interface = "org.facegate.FaceGate1",
    default_service = "org.facegate.FaceGate1",
    default_path = "/org/facegate/FaceGate1"
)]
trait FaceGate {
    async fn start_session(&self) -> zbus::Result<String>;
    async fn stop_session(&self) -> zbus::Result<bool>;
    async fn capture(&self, candidates_json: &str, threshold: f64) -> zbus::Result<String>;
    async fn set_sensitivity_level(&self, level: &str) -> zbus::Result<String>;
    async fn get_current_sensitivity(&self) -> zbus::Result<String>;
    async fn liveness_status(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
    async fn reload_models(&self) -> zbus::Result<bool>;
}

#[derive(Parser)]
#[command(name = "facegate", about = "facegate face capture and liveness CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session_bus: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enhance an image for face detection and write the result
    Enhance {
        input: PathBuf,
        output: PathBuf,
        /// auto, low, medium or high
        #[arg(short, long, default_value = "auto")]
        level: EnhancementLevel,
        /// Use a Gaussian blur instead of the bilateral filter
        #[arg(long)]
        no_bilateral: bool,
        #[arg(long)]
        no_sharpen: bool,
    },
    /// Detect the primary face in an image file (no daemon needed)
    Detect {
        image: PathBuf,
        #[command(flatten)]
        models: ModelArgs,
    },
    /// Compare the faces in two image files (no daemon needed)
    Compare {
        first: PathBuf,
        second: PathBuf,
        #[command(flatten)]
        models: ModelArgs,
        /// Similarity a match must exceed
        #[arg(short, long, default_value_t = 0.4)]
        threshold: f32,
    },
    /// Start a capture session on the daemon
    Start,
    /// Stop the running capture session
    Stop,
    /// Capture a live face and match it against enrolled candidates
    Capture {
        /// JSON file with an array of { "id", "descriptor" } candidates
        #[arg(short, long)]
        candidates: Option<PathBuf>,
        /// Similarity a match must exceed (daemon default when omitted)
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// Show or change the sensitivity preset
    Sensitivity {
        #[command(subcommand)]
        action: SensitivityAction,
    },
    /// Show the current liveness verdict
    Liveness,
    /// Show daemon status
    Status,
    /// Ask the daemon to reload its face models
    ReloadModels,
    /// List V4L2 capture devices
    Devices,
}

#[derive(Subcommand)]
enum SensitivityAction {
    Get,
    Set { level: SensitivityLevel },
}

#[derive(clap::Args)]
struct ModelArgs {
    /// Directory containing the ONNX models
    #[arg(long, default_value_os_t = facegate_core::default_model_dir())]
    model_dir: PathBuf,
    /// accurate or tiny
    #[arg(long, default_value = "accurate")]
    model: DetectorModel,
    /// Sensitivity preset supplying confidence and face size floors
    #[arg(long, default_value = "medium")]
    sensitivity: SensitivityLevel,
}

impl ModelArgs {
    fn adapter(&self) -> Result<DetectionAdapter<OnnxFaceDetector>> {
        let detector = OnnxFaceDetector::load(&self.model_dir)
            .with_context(|| format!("loading models from {}", self.model_dir.display()))?;
        Ok(DetectionAdapter::new(detector))
    }

    fn options(&self) -> DetectOptions {
        let profile = self.sensitivity.profile();
        DetectOptions {
            model: self.model,
            min_confidence: profile.min_confidence,
            min_face_size: profile.min_face_size,
            ..DetectOptions::default()
        }
    }
}

fn load_rgba(path: &Path) -> Result<image::RgbaImage> {
    Ok(image::open(path)
        .with_context(|| format!("reading {}", path.display()))?
        .to_rgba8())
}

/// Daemon replies are compact JSON; reformat for the terminal.
fn print_json(raw: &str) {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(v) => println!("{}", serde_json::to_string_pretty(&v).unwrap_or_else(|_| raw.to_string())),
        Err(_) => println!("{raw}"),
    }
}

async fn connect(session_bus: bool) -> Result<FaceGateProxy<'static>> {
    let conn = if session_bus {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("cannot connect to D-Bus")?;
    FaceGateProxy::new(&conn)
        .await
        .context("cannot reach facegated (is it running?)")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Enhance {
            input,
            output,
            level,
            no_bilateral,
            no_sharpen,
        } => {
            let img = load_rgba(&input)?;
            let (w, h) = img.dimensions();
            let stats = enhance::compute_brightness_contrast(img.as_raw());
            let options = EnhanceOptions {
                level,
                bilateral: !no_bilateral,
                sharpen: !no_sharpen,
                ..EnhanceOptions::default()
            };
            let out = enhance::enhance_for_detection(img.as_raw(), w, h, &options);
            let out = image::RgbaImage::from_raw(w, h, out).context("enhanced buffer has wrong size")?;
            out.save(&output)
                .with_context(|| format!("writing {}", output.display()))?;
            println!(
                "brightness {:.1}, contrast {:.1}, level {:?} -> {}",
                stats.avg_brightness,
                stats.contrast(),
                enhance::select_level(&stats, level),
                output.display()
            );
        }
        Commands::Detect { image, models } => {
            let img = load_rgba(&image)?;
            let mut adapter = models.adapter()?;
            match adapter.detect_face_with_attempt(&img, &models.options()) {
                Some((det, attempt)) => {
                    println!("Face found ({attempt:?} attempt)");
                    println!("{}", serde_json::to_string_pretty(&det)?);
                }
                None => println!("No face detected"),
            }
        }
        Commands::Compare {
            first,
            second,
            models,
            threshold,
        } => {
            let mut adapter = models.adapter()?;
            let options = models.options();
            let mut descriptors = Vec::with_capacity(2);
            for path in [&first, &second] {
                let img = load_rgba(path)?;
                let Some(det) = adapter.detect_face(&img, &options) else {
                    bail!("no face detected in {}", path.display());
                };
                descriptors.push(det.descriptor);
            }
            let similarity = facegate_core::similarity(&descriptors[0], &descriptors[1])?;
            println!("similarity: {similarity:.4}");
            println!("{}", if similarity > threshold { "MATCH" } else { "NO MATCH" });
        }
        Commands::Start => {
            let id = connect(cli.session_bus).await?.start_session().await?;
            println!("session started: {id}");
        }
        Commands::Stop => {
            if connect(cli.session_bus).await?.stop_session().await? {
                println!("session stopped");
            } else {
                println!("no session running");
            }
        }
        Commands::Capture {
            candidates,
            threshold,
        } => {
            let candidates_json = match candidates {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                None => "[]".to_string(),
            };
            let threshold = threshold.map(f64::from).unwrap_or(-1.0);
            let outcome = connect(cli.session_bus)
                .await?
                .capture(&candidates_json, threshold)
                .await?;
            print_json(&outcome);
        }
        Commands::Sensitivity { action } => {
            let proxy = connect(cli.session_bus).await?;
            let profile = match action {
                SensitivityAction::Get => proxy.get_current_sensitivity().await?,
                SensitivityAction::Set { level } => proxy.set_sensitivity_level(level.as_str()).await?,
            };
            print_json(&profile);
        }
        Commands::Liveness => {
            print_json(&connect(cli.session_bus).await?.liveness_status().await?);
        }
        Commands::Status => {
            print_json(&connect(cli.session_bus).await?.status().await?);
        }
        Commands::ReloadModels => {
            connect(cli.session_bus).await?.reload_models().await?;
            println!("models reloaded");
        }
        Commands::Devices => {
            let devices = facegate_hw::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
    }

    Ok(())
}
