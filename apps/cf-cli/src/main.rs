use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use cf_bus::{AlarmClass, EventSink, MemBus, MemStore, SettingsStore, Value};
use cf_core::{Clock, NullPacer, SystemClock};
use cf_device::DeviceRegistry;
use cf_script::{execute, ScriptContext, ScriptOutcome};

mod plant;

use plant::{PlantError, PlantFile, PlantResult};

#[derive(Parser)]
#[command(name = "cf-cli")]
#[command(about = "CryoFlow CLI - purifier plant control engine tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a plant wiring file
    Validate {
        /// Path to the plant YAML file
        plant_path: PathBuf,
    },
    /// List the scripts the sequencer can run
    Scripts,
    /// Dry-run a script against an in-memory copy of the plant
    Demo {
        /// Path to the plant YAML file
        plant_path: PathBuf,
        /// Script name, e.g. start_cooling
        script: String,
        /// Parameter overrides as key=value, repeatable
        #[arg(short, long)]
        param: Vec<String>,
    },
}

fn main() -> PlantResult<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { plant_path } => cmd_validate(&plant_path),
        Commands::Scripts => cmd_scripts(),
        Commands::Demo {
            plant_path,
            script,
            param,
        } => cmd_demo(&plant_path, &script, &param),
    }
}

fn cmd_validate(plant_path: &Path) -> PlantResult<()> {
    println!("Validating plant file: {}", plant_path.display());
    let plant = PlantFile::load(plant_path)?;
    plant.validate()?;
    println!("✓ Plant file is valid");
    println!("  Routing prefixes: {}", plant.routing.len());
    println!("  Devices: {}", plant.devices.len());
    println!("  Control loops: {}", plant.loops.len());
    for spec in &plant.loops {
        println!("    {} -> {}", spec.name, spec.control_var);
    }
    Ok(())
}

fn cmd_scripts() -> PlantResult<()> {
    println!("Available scripts:");
    for entry in cf_sequencer::purifier_catalog() {
        if entry.param_names.is_empty() {
            println!("  {}", entry.name);
        } else {
            println!("  {} ({})", entry.name, entry.param_names.join(", "));
        }
    }
    Ok(())
}

/// Operator console on stdout, for running outside the host control system.
struct StdoutSink;

impl EventSink for StdoutSink {
    fn message(&self, msg: &str, is_error: bool) {
        if is_error {
            println!("  ERROR {msg}");
        } else {
            println!("  {msg}");
        }
    }

    fn alarm(&self, name: &str, msg: &str, class: AlarmClass) {
        println!("  {class:?} [{name}] {msg}");
    }
}

fn cmd_demo(plant_path: &Path, script_name: &str, params: &[String]) -> PlantResult<()> {
    let plant = PlantFile::load(plant_path)?;
    plant.validate()?;

    let mut script = cf_script::purifier::all_scripts()
        .into_iter()
        .find(|s| s.name() == script_name)
        .ok_or_else(|| PlantError::Invalid(format!("unknown script {script_name:?}")))?;

    let clock = Rc::new(SystemClock::new());
    let bus = Rc::new(MemBus::new(Rc::clone(&clock) as Rc<dyn Clock>));
    let map = plant.plant_map();
    for name in &plant.devices {
        let kind = map.classify(name)?;
        let path = map.route(name)?;
        for var in kind.all_vars() {
            bus.insert(&format!("{path}:{var}"), 0.0);
        }
        if kind.has_switch() {
            bus.force(&format!("{path}:STATINT"), 1.0);
        }
    }

    let mut config = plant.registry_config();
    config.dry_run = true;
    let store = Rc::new(MemStore::new());
    let sink = Rc::new(StdoutSink);
    let registry = Rc::new(DeviceRegistry::new(
        map,
        config,
        Rc::clone(&bus) as _,
        Rc::clone(&sink) as _,
        Rc::clone(&clock) as _,
    ));

    let cx = ScriptContext::new(
        script.name(),
        registry,
        Rc::clone(&store) as Rc<dyn SettingsStore>,
        Rc::clone(&sink) as _,
        Rc::clone(&clock) as Rc<dyn Clock>,
    );
    for pair in params {
        let (key, raw) = pair.split_once('=').ok_or_else(|| {
            PlantError::Invalid(format!("parameter {pair:?} is not key=value"))
        })?;
        let value = parse_param(raw);
        store.set(&format!("{}/{key}", cx.settings_dir()), value);
    }
    cx.set_flag("enabled", true);
    cx.set_flag("dry_run", true);

    println!("Dry-running {script_name}:");
    let outcome = execute(script.as_mut(), &cx, &mut NullPacer);
    match outcome {
        ScriptOutcome::Completed => println!("✓ {script_name} completed"),
        ScriptOutcome::Cancelled => println!("✗ {script_name} was cancelled"),
        ScriptOutcome::Failed => println!("✗ {script_name} failed"),
    }
    Ok(())
}

fn parse_param(raw: &str) -> Value {
    if let Ok(v) = raw.parse::<f64>() {
        Value::Float(v)
    } else if let Ok(v) = raw.parse::<bool>() {
        Value::Bool(v)
    } else {
        Value::Str(raw.to_string())
    }
}
