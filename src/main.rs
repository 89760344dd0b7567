use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

#[allow(unused_imports)]
use log::{debug, info, warn, error};

use labelskater::build_info::BuildInfo;
use labelskater::config::{Config, CONFIG, DEFAULT_MOCK_INPUT_SIZE};
use labelskater::logging;
use labelskater::{
    export_session, scan_directory, AnnotationSession, ClassStore, CocoResultsModel, Controller,
    DetectionModel, Error, ExportOptions, MockModel, Outcome, UserSettings,
};

const APP_NAME: &str = "LabelSkater";

/// Annotate a directory of images with bounding boxes and export a YOLO dataset.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory containing the images to annotate
    image_dir: PathBuf,

    /// Output directory for the YOLO dataset
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Comma-separated class names; the first one is the default class
    #[arg(short = 'c', long = "classes", value_delimiter = ',')]
    classes: Vec<String>,

    /// COCO JSON file with detections to use as suggestions
    #[arg(long = "detections", conflicts_with = "mock")]
    detections: Option<PathBuf>,

    /// Use a fixed mock detector for suggestions
    #[arg(long = "mock")]
    mock: bool,

    /// Hide suggestions scoring below this value
    #[arg(long = "min-score", value_parser = validate_fraction)]
    min_score: Option<f32>,

    /// Fraction of images placed in the test split
    #[arg(long = "test-split", value_parser = validate_fraction)]
    test_split: Option<f32>,

    /// Seed for the train/test shuffle
    #[arg(long = "seed")]
    seed: Option<u64>,

    /// Resize exported images to square JPEGs of this size
    #[arg(long = "image-size", value_parser = validate_size)]
    image_size: Option<u32>,

    /// Export only images marked ready
    #[arg(long = "only-ready")]
    only_ready: bool,

    /// Accept every suggestion and export without prompting
    #[arg(long = "auto")]
    auto: bool,

    /// Settings file to use instead of the default one
    #[arg(long = "settings")]
    settings: Option<String>,

    /// Write the options used for this run back to the settings file
    #[arg(long = "save-settings")]
    save_settings: bool,

    /// Print build details and exit
    #[arg(long = "build-info")]
    build_info: bool,
}

// Validate that the value is between 0.0 and 1.0
fn validate_fraction(s: &str) -> Result<f32, String> {
    match s.parse::<f32>() {
        Ok(val) if (0.0..=1.0).contains(&val) => Ok(val),
        _ => Err("value must be between 0.0 and 1.0".to_string()),
    }
}

// Validate that the image size is a positive integer
fn validate_size(s: &str) -> Result<u32, String> {
    match s.parse::<u32>() {
        Ok(val) if val > 0 => Ok(val),
        _ => Err("image size must be a positive integer".to_string()),
    }
}

fn main() -> ExitCode {
    let shared_log_buffer = logging::setup_logger();
    logging::setup_panic_hook(APP_NAME, shared_log_buffer.clone());

    let args = Args::parse();
    if args.build_info {
        println!("{}", BuildInfo::detailed_info());
        return ExitCode::SUCCESS;
    }
    info!("{} {}", APP_NAME, BuildInfo::display_version());

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {}", e);
            match logging::export_debug_logs(APP_NAME, &shared_log_buffer) {
                Ok(path) => eprintln!("Debug log written to {}", path.display()),
                Err(e) => warn!("Failed to export debug logs: {}", e),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> labelskater::Result<()> {
    let custom_config;
    let config: &Config = match &args.settings {
        Some(path) => {
            custom_config = Config::from_settings(&UserSettings::load(Some(path)));
            &custom_config
        }
        None => &*CONFIG,
    };

    let class_names = if args.classes.is_empty() { &config.classes } else { &args.classes };
    let classes = ClassStore::from_names(class_names.as_slice())?;

    let scan = scan_directory(&args.image_dir)?;
    let found = scan.images.len() + scan.skipped.len();
    println!(
        "Loaded {} of {} images from {}",
        scan.images.len(),
        found,
        args.image_dir.display()
    );
    if !scan.skipped.is_empty() {
        eprintln!("Skipped {} unreadable images:", scan.skipped.len());
        for path in &scan.skipped {
            eprintln!("  {}", path.display());
        }
    }
    let images = scan.images;
    if images.is_empty() {
        return Err(Error::OutOfRange(format!(
            "no readable images in {}",
            args.image_dir.display()
        )));
    }

    let model: Option<Box<dyn DetectionModel>> = if let Some(path) = &args.detections {
        let model: Box<dyn DetectionModel> =
            Box::new(CocoResultsModel::from_file(path).map_err(Error::Settings)?);
        Some(model)
    } else if args.mock {
        let size = DEFAULT_MOCK_INPUT_SIZE as f64;
        let model: Box<dyn DetectionModel> = Box::new(MockModel::new(
            vec![[size * 0.25, size * 0.25, size * 0.75, size * 0.75]],
            vec![classes.default_class().name.clone()],
            None,
            (DEFAULT_MOCK_INPUT_SIZE, DEFAULT_MOCK_INPUT_SIZE),
        ));
        Some(model)
    } else {
        None
    };

    let min_score = args.min_score.unwrap_or(config.min_score);
    let session = AnnotationSession::new(images, classes, model)?.with_min_score(min_score);
    let mut controller = Controller::new(session);

    if args.auto {
        controller.run_auto()?;
    } else if !run_interactive(&mut controller)? {
        info!("Quit before all images were processed, nothing exported");
        return Ok(());
    }

    let options = ExportOptions {
        test_split: args.test_split.unwrap_or(config.test_split),
        seed: args.seed.unwrap_or(config.seed),
        only_ready: args.only_ready || config.only_ready,
        image_size: args.image_size.or(config.export_image_size),
        show_progress: config.show_progress,
    };
    let output = args.output.clone().unwrap_or_else(|| config.output_dir.clone());

    let summary = export_session(controller.session(), &output, &options)?;
    println!(
        "Exported {} images ({} train, {} test) with {} boxes to {}",
        summary.images(),
        summary.train_images,
        summary.test_images,
        summary.boxes,
        output.display()
    );

    if args.save_settings {
        let settings = UserSettings {
            classes: controller
                .session()
                .classes()
                .names()
                .iter()
                .map(|name| name.to_string())
                .collect(),
            min_score,
            test_split: options.test_split,
            seed: options.seed,
            export_image_size: options.image_size,
            only_ready: options.only_ready,
            output_dir: output.to_string_lossy().to_string(),
            show_progress: options.show_progress,
        };
        let path = UserSettings::resolve_path(args.settings.as_deref());
        settings.save_to(&path)?;
        println!("Saved settings to {}", path.display());
    }
    Ok(())
}

/// Read commands from stdin until the session completes. Returns false when
/// the user quits or input ends first.
fn run_interactive(controller: &mut Controller) -> labelskater::Result<bool> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    println!("{}", controller.render());
    println!("Type 'help' for commands.");

    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        stdout.flush().map_err(|e| Error::io("<stdout>", e))?;

        let line = match lines.next() {
            Some(line) => line.map_err(|e| Error::io("<stdin>", e))?,
            None => {
                warn!("Input ended before all images were processed");
                return Ok(false);
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match controller.handle_line(&line) {
            Outcome::Continue(text) => println!("{}", text),
            Outcome::Complete => return Ok(true),
            Outcome::Quit => return Ok(false),
        }
    }
}
