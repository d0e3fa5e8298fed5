use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgGroup, Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use helmetcheck::core::db::{ViolationDb, ViolationRepository};
use helmetcheck::debug::DebugConfig;
use helmetcheck::detection::{InterpreterConfig, YoloParams};
use helmetcheck::detection::ocr::default_model_dir;
use helmetcheck::models::LabelVocabulary;
use helmetcheck::{HttpFetcher, ModelContext, PipelineConfig, ViolationPipeline, ViolationRequest, ViolationResponse};

#[derive(Parser)]
#[command(name = "helmetcheck")]
#[command(about = "Detect helmet violations in roadway images and record offending plates")]
struct Cli {
    /// SQLite database for violation records
    #[arg(long, env = "HELMETCHECK_DB", default_value = "violations.db", global = true)]
    db: PathBuf,

    /// Directory for stored uploads
    #[arg(long, env = "HELMETCHECK_IMAGE_DIR", default_value = "images", global = true)]
    image_dir: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check one image for a violation and print the JSON response
    Check(CheckArgs),
    /// Print stored violations as JSON lines
    List,
}

#[derive(Args)]
#[command(group(ArgGroup::new("source").required(true).args(["image", "url"])))]
struct CheckArgs {
    /// Path to a local image to upload
    #[arg(long, value_name = "IMAGE")]
    image: Option<PathBuf>,

    /// Content type of the uploaded image (guessed from the bytes if omitted)
    #[arg(long, requires = "image")]
    content_type: Option<String>,

    /// Remote image URL
    #[arg(long, value_name = "URL")]
    url: Option<String>,

    /// Caller identity recorded with the violation
    #[arg(long, env = "HELMETCHECK_USER")]
    user: Option<String>,

    /// Detector model (.rten)
    #[arg(long, env = "HELMETCHECK_DETECTOR_MODEL", value_name = "FILE")]
    detector_model: PathBuf,

    /// Directory with text-detection.rten and text-recognition.rten [default: ~/.cache/ocrs]
    #[arg(long, env = "HELMETCHECK_OCR_MODEL_DIR", value_name = "DIR")]
    ocr_model_dir: Option<PathBuf>,

    /// Detector class names in model output order
    #[arg(long, value_delimiter = ',', default_value = "with-helmet,without-helmet,rider,number-plate")]
    labels: Vec<String>,

    /// Minimum plate confidence (exclusive)
    #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
    plate_threshold: f32,

    /// Detector score threshold
    #[arg(long, default_value = "0.25", value_name = "THRESHOLD")]
    detector_confidence: f32,

    /// NMS IoU threshold
    #[arg(long, default_value = "0.45", value_name = "THRESHOLD")]
    nms_threshold: f32,

    /// Square detector input size
    #[arg(long, default_value = "640", value_name = "PIXELS")]
    detector_input_size: u32,

    /// Remote fetch timeout in seconds
    #[arg(long, default_value = "30", value_name = "SECONDS")]
    fetch_timeout: u64,

    /// Save debug outputs to directory (must be empty)
    #[arg(long, value_name = "DIR")]
    debug_out: Option<PathBuf>,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "helmetcheck=debug" } else { "helmetcheck=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let store = ViolationDb::new(&cli.db, &cli.image_dir).await?;

    match cli.command {
        Command::List => {
            for violation in store.list_violations().await? {
                println!("{}", serde_json::to_string(&violation)?);
            }
        }
        Command::Check(args) => {
            let response = check(args, store.clone()).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            if response.is_error() {
                store.close().await;
                std::process::exit(1);
            }
        }
    }

    store.close().await;
    Ok(())
}

async fn check(args: CheckArgs, store: ViolationDb) -> anyhow::Result<ViolationResponse> {
    let labels = args.labels.iter().map(|l| l.trim().to_string()).collect();
    let ocr_model_dir = match args.ocr_model_dir {
        Some(dir) => dir,
        None => default_model_dir()?,
    };
    let models = ModelContext::load(
        &args.detector_model,
        YoloParams {
            input_size: args.detector_input_size,
            confidence_threshold: args.detector_confidence,
            nms_threshold: args.nms_threshold,
            labels,
        },
        &ocr_model_dir,
    )?;

    let config = PipelineConfig {
        interpreter: InterpreterConfig {
            plate_acceptance_threshold: args.plate_threshold,
            vocabulary: LabelVocabulary::default(),
        },
        fetch_timeout: Duration::from_secs(args.fetch_timeout),
        debug: args.debug_out.map(DebugConfig::new).transpose()?,
    };

    let inline = match &args.image {
        Some(path) => Some((tokio::fs::read(path).await?, args.content_type.clone())),
        None => None,
    };
    let mut request = ViolationRequest::from_parts(args.url, inline, args.user)?;
    if let (helmetcheck::ImageInput::Inline { file_name, .. }, Some(path)) = (&mut request.image, &args.image) {
        *file_name = path.file_name().and_then(|n| n.to_str()).map(str::to_string);
    }

    let pipeline = ViolationPipeline::new(&models, HttpFetcher::new()?, store, config);
    Ok(pipeline.handle(request).await)
}
