extern crate log;
extern crate pretty_env_logger;

use std::collections::HashMap;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::process::exit;

use clap::{arg, command, value_parser, ArgMatches, Command};
use rusttype::Font;
use serde_json::{json, Map, Value};

use form_omr::align::NormalizeOptions;
use form_omr::authoring::{build_template, ConsoleAssigner, MappingAssigner, SpotAssigner};
use form_omr::debug::{debug_image_path, load_font};
use form_omr::fill::FillOverrides;
use form_omr::interpret::{interpret_forms, InterpretOptions};
use form_omr::template::Template;
use form_omr::types::QuestionId;

fn main() {
    pretty_env_logger::init_custom_env("LOG");

    let matches = cli().get_matches();
    match matches.subcommand() {
        Some(("define", matches)) => define(matches),
        Some(("scan", matches)) => scan(matches),
        _ => unreachable!("a subcommand is required"),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str, what: &str) -> T {
    let json = match std::fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) => {
            eprintln!("Error reading {}: {}", what, e);
            exit(1);
        }
    };
    match serde_json::from_str(&json) {
        Ok(value) => value,
        Err(e) => {
            eprintln!("Error parsing {}: {}", what, e);
            exit(1);
        }
    }
}

fn font_arg(matches: &ArgMatches) -> Option<Font<'static>> {
    let path = matches.get_one::<String>("font")?;
    match load_font(Path::new(path)) {
        Ok(Some(font)) => Some(font),
        Ok(None) => {
            eprintln!("Error loading font: {} is not a usable font", path);
            exit(1);
        }
        Err(e) => {
            eprintln!("Error reading font: {}", e);
            exit(1);
        }
    }
}

fn define(matches: &ArgMatches) {
    let image_path = matches
        .get_one::<String>("image")
        .expect("template image path is required");
    let radius = *matches.get_one::<u32>("radius").expect("radius is required");

    let question_config: HashMap<QuestionId, bool> = matches
        .get_one::<String>("config")
        .map(|path| read_json(path, "question config"))
        .unwrap_or_default();

    let raw = match image::open(image_path) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("Error opening template image: {}", e);
            exit(1);
        }
    };

    let mut assigner: Box<dyn SpotAssigner> = match matches.get_one::<String>("assignment") {
        Some(path) => Box::new(MappingAssigner::new(read_json::<HashMap<usize, Vec<usize>>>(
            path,
            "assignment",
        ))),
        None => {
            let preview = debug_image_path(Path::new(image_path), "spots");
            Box::new(
                ConsoleAssigner::new(BufReader::new(io::stdin()), io::stderr())
                    .with_preview_path(preview),
            )
        }
    };

    let template = match build_template(
        &raw,
        radius,
        assigner.as_mut(),
        question_config,
        font_arg(matches),
        &NormalizeOptions::default(),
    ) {
        Ok(template) => template,
        Err(e) => {
            eprintln!("Error defining template: {}", e);
            exit(1);
        }
    };

    let result = match matches.get_one::<String>("output") {
        Some(output) => template.save(Path::new(output)),
        None => template.to_json().map(|json| println!("{}", json)),
    };
    if let Err(e) = result {
        eprintln!("Error writing template: {}", e);
        exit(1);
    }
}

fn scan(matches: &ArgMatches) {
    let template_path = matches
        .get_one::<String>("template")
        .expect("template path is required");
    let template_image_path = matches
        .get_one::<String>("template-image")
        .expect("template image path is required");
    let scan_paths = matches
        .get_many::<String>("scans")
        .expect("at least one scan is required")
        .map(PathBuf::from)
        .collect::<Vec<_>>();

    let options = InterpretOptions {
        debug: matches.get_flag("debug"),
        overrides: FillOverrides {
            filled_threshold: matches.get_one::<f32>("threshold").copied(),
            circle_radius: matches.get_one::<u32>("radius").copied(),
        },
        rotate_portrait: matches.get_flag("rotate"),
        normalize: NormalizeOptions::default(),
    };
    let font = font_arg(matches);

    let template = match Template::load(
        Path::new(template_path),
        Path::new(template_image_path),
        &options.normalize,
    ) {
        Ok(template) => template,
        Err(e) => {
            eprintln!("Error loading template: {}", e);
            exit(1);
        }
    };

    let results = interpret_forms(&scan_paths, &template, &options, font.as_ref());

    let mut failed = 0;
    let mut output = Map::new();
    for (path, result) in results {
        let value = match result {
            Ok(answers) => json!(answers),
            Err(e) => {
                eprintln!("Error: {}", e);
                failed += 1;
                json!({ "error": e.to_string() })
            }
        };
        output.insert(path.display().to_string(), value);
    }

    match serde_json::to_string_pretty(&Value::Object(output)) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error: {}", e);
            exit(1);
        }
    }

    if failed > 0 {
        exit(1);
    }
}

#[allow(clippy::cognitive_complexity)]
fn cli() -> Command {
    command!()
        .subcommand_required(true)
        .subcommand(
            Command::new("define")
                .about("Build a template from a scan with every bubble filled in")
                .arg(arg!(image: <TEMPLATE_IMAGE> "Path to the calibration image").required(true))
                .arg(
                    arg!(-r --radius <PIXELS> "Bubble radius in pixels")
                        .value_parser(value_parser!(u32))
                        .required(true),
                )
                .arg(arg!(-a --assignment <PATH> "JSON of question index to spot indices"))
                .arg(arg!(-c --config <PATH> "JSON of question id to multiple-answer flag"))
                .arg(arg!(-o --output <PATH> "Where to write the template JSON"))
                .arg(arg!(--font <PATH> "TrueType font for spot indices in the preview image")),
        )
        .subcommand(
            Command::new("scan")
                .about("Read filled-in forms against a template")
                .arg(arg!(-t --template <PATH> "Path to template JSON").required(true))
                .arg(
                    arg!(-i --"template-image" <PATH> "Path to the template's reference image")
                        .required(true),
                )
                .arg(arg!(-d --debug "Write debug images beside each scan"))
                .arg(arg!(--rotate "Rotate portrait scans to landscape"))
                .arg(
                    arg!(--threshold <FRACTION> "Override every answer's fill threshold")
                        .value_parser(value_parser!(f32)),
                )
                .arg(
                    arg!(--radius <PIXELS> "Override every answer's circle radius")
                        .value_parser(value_parser!(u32)),
                )
                .arg(arg!(--font <PATH> "TrueType font for labels in debug images"))
                .arg(arg!(scans: <SCAN> ... "Paths to scanned forms").required(true)),
        )
}
