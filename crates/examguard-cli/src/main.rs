use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use examguard_core::frame::{self, Frame};
use examguard_core::quality;
use examguard_core::{FaceAnalyzer, OnnxAnalyzer};
use std::path::{Path, PathBuf};

mod client;

use client::{Applicant, DaemonClient};

/// CLAHE grid and clip limit used by `enhance`; the clip is a fraction of
/// each tile's pixel count.
const ENHANCE_TILES: u32 = 8;
const ENHANCE_CLIP: f32 = 2.0 / 256.0;

#[derive(Parser)]
#[command(name = "examguard", about = "Exam applicant face registration and verification")]
struct Cli {
    /// examguardd base URL
    #[arg(long, global = true, default_value = "http://127.0.0.1:8502")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register an applicant's face
    Register {
        /// Face photo (png/jpg/jpeg)
        image: PathBuf,
        #[arg(long)]
        application_id: String,
        #[arg(long)]
        full_name: String,
        #[arg(long)]
        age: Option<u32>,
        #[arg(long, default_value = "")]
        exam_type: String,
        #[arg(long, default_value = "")]
        location: String,
    },
    /// Verify a face against registered applicants
    Verify {
        image: PathBuf,
    },
    /// Show daemon status
    Status,
    /// Registration counts by exam and location
    Analytics,
    /// Run anomaly detection over all registrations
    Anomalies,
    /// Score image quality and pose locally (no daemon)
    Quality {
        image: PathBuf,
        /// Directory containing the ONNX models
        #[arg(long, default_value = "models")]
        models: PathBuf,
    },
    /// Write a contrast-enhanced copy of an image (CLAHE on luma, colour kept)
    Enhance {
        image: PathBuf,
        output: PathBuf,
    },
    /// Write a copy of an image with detected faces outlined
    Annotate {
        image: PathBuf,
        output: PathBuf,
        #[arg(long, default_value = "models")]
        models: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let daemon = DaemonClient::new(&cli.server);

    match cli.command {
        Commands::Register {
            image,
            application_id,
            full_name,
            age,
            exam_type,
            location,
        } => {
            let applicant = Applicant {
                application_id: &application_id,
                full_name: &full_name,
                age,
                exam_type: &exam_type,
                location: &location,
            };
            let reply = daemon.register(&image, &applicant).await?;
            println!("{}", reply["message"].as_str().unwrap_or("registered"));
            if let Some(warnings) = reply["warnings"].as_array() {
                for warning in warnings.iter().filter_map(|w| w.as_str()) {
                    println!("  warning: {warning}");
                }
            }
        }
        Commands::Verify { image } => {
            let reply = daemon.verify(&image).await?;
            println!("{}", reply["message"].as_str().unwrap_or_default());
            for m in reply["matches"].as_array().into_iter().flatten() {
                println!(
                    "  {} {} (confidence {:.2}, distance {:.2})",
                    m["user_data"]["application_id"].as_str().unwrap_or("?"),
                    m["user_data"]["full_name"].as_str().unwrap_or(""),
                    m["confidence"].as_f64().unwrap_or(0.0),
                    m["distance"].as_f64().unwrap_or(0.0),
                );
            }
        }
        Commands::Status => print_json(&daemon.get("/system_status").await?)?,
        Commands::Analytics => print_json(&daemon.get("/admin/analytics").await?)?,
        Commands::Anomalies => print_json(&daemon.get("/admin/anomalies").await?)?,
        Commands::Quality { image, models } => {
            let mut analyzer = load_analyzer(&models)?;
            let report = quality::assess_quality_file(&mut analyzer, &image);
            println!("Quality score: {:.2} ({})", report.score, report.feedback);
            println!(
                "  brightness {:.2}, contrast {:.2}, sharpness {:.2}",
                report.brightness, report.contrast, report.sharpness
            );
            if let Ok(frame) = Frame::open(&image) {
                println!("  mean brightness {:.1}", frame.avg_brightness());
                let pose = quality::validate_pose(&mut analyzer, &frame);
                println!("Pose: {}", pose.message);
            }
            println!(
                "Admissible for registration: {}",
                if report.is_admissible() { "yes" } else { "no" }
            );
        }
        Commands::Enhance { image, output } => {
            let mut rgb = image::open(&image)
                .with_context(|| format!("reading {}", image.display()))?
                .to_rgb8();
            frame::clahe_enhance_rgb(&mut rgb, ENHANCE_TILES, ENHANCE_CLIP);
            rgb.save(&output)
                .with_context(|| format!("writing {}", output.display()))?;
            println!("Enhanced image written to {}", output.display());
        }
        Commands::Annotate { image, output, models } => {
            let mut analyzer = load_analyzer(&models)?;
            let mut frame = open(&image)?;
            let faces = analyzer.detect(&frame)?;
            for face in &faces {
                frame.annotate(face);
            }
            frame
                .save(&output)
                .with_context(|| format!("writing {}", output.display()))?;
            println!("{} face(s) outlined in {}", faces.len(), output.display());
        }
    }

    Ok(())
}

fn load_analyzer(models: &Path) -> Result<OnnxAnalyzer> {
    OnnxAnalyzer::load(models).with_context(|| format!("loading models from {}", models.display()))
}

fn open(image: &Path) -> Result<Frame> {
    Frame::open(image).with_context(|| format!("reading {}", image.display()))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
