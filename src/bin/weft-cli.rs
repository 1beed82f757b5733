//! Weft CLI - Run workflow instances concurrently and report their outcomes
//!
//! Runs one of the bundled scenarios or a set of workflow files, prints the
//! emitted lines, a per-instance summary and, for scenarios, a validation
//! report. The exit code is zero only when every instance completed and every
//! trace validated.

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use weft::definition::{
    DefinitionLoader, Parameters, SexprLoader, Value, ValueType, WorkflowDefinition,
};
use weft::runtime::{
    CancellationPolicy, DispatchOrder, ExternalCatalog, InstanceId, NullSink, OutputSink, Scheduler,
    SchedulerConfig, StdoutSink,
};
use weft::scenarios::{ParameterGenerator, Scenario};

#[derive(Parser)]
#[command(name = "weft")]
#[command(about = "Declarative workflow runtime with isolated concurrent instances", long_about = None)]
#[command(version = weft::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a bundled scenario or workflow files
    Run(RunArgs),

    /// Load workflow files and print their shape and fingerprint
    Check {
        /// Workflow source files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// List bundled scenarios
    Scenarios,
}

#[derive(Args)]
struct RunArgs {
    /// Bundled scenario to run (default: counter)
    #[arg(short, long, conflicts_with = "workflow")]
    scenario: Option<String>,

    /// Workflow source file; repeat to round-robin several definitions
    #[arg(short, long)]
    workflow: Vec<PathBuf>,

    /// Parameter for workflow files as NAME=VALUE; InstanceId is supplied automatically
    #[arg(short, long = "param", value_name = "NAME=VALUE")]
    params: Vec<String>,

    /// Number of instances (default: scenario default, or 1 for workflow files)
    #[arg(short = 'n', long)]
    instances: Option<usize>,

    /// Maximum number of instances executing at once
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Number of distinct definition objects the instances are spread across
    #[arg(short, long)]
    definitions: Option<usize>,

    /// JSON scheduler config file; flags override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// Dispatch order
    #[arg(long, value_enum)]
    order: Option<OrderArg>,

    /// Seed for shuffled dispatch and random scenario parameters
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Let cancellation (Ctrl-C) stop running instances between activities
    #[arg(long)]
    cooperative_cancel: bool,

    /// Print the run summary as JSON instead of a table; emitted lines are suppressed
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum OrderArg {
    InOrder,
    Reverse,
    Shuffled,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Logs go to stderr; stdout carries workflow output.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Check { files } => {
            for path in files {
                let def = SexprLoader
                    .load_file(&path)
                    .with_context(|| format!("Failed to load {}", path.display()))?;
                let params: Vec<String> = def
                    .parameters()
                    .iter()
                    .map(|spec| format!("{}: {}", spec.name, spec.ty))
                    .collect();
                println!("{}", path.display());
                println!("  workflow:    {}", def.name());
                println!("  parameters:  {}", params.join(", "));
                println!("  nodes:       {}", def.node_count());
                println!("  fingerprint: {}", def.fingerprint());
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Scenarios => {
            for scenario in Scenario::ALL {
                println!(
                    "{:<14} {} instances by default",
                    scenario.name(),
                    scenario.default_instances()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let mut config = match &args.config {
        Some(path) => SchedulerConfig::load(path)?,
        None => SchedulerConfig::default(),
    };
    if let Some(concurrency) = args.concurrency {
        config.max_concurrency = concurrency;
    }
    if let Some(order) = args.order {
        config.dispatch_order = match order {
            OrderArg::InOrder => DispatchOrder::InOrder,
            OrderArg::Reverse => DispatchOrder::Reverse,
            OrderArg::Shuffled => DispatchOrder::Shuffled { seed: args.seed },
        };
    }
    if args.cooperative_cancel {
        config.cancellation = CancellationPolicy::BetweenActivities;
    }

    let scenario = if args.workflow.is_empty() {
        let name = args.scenario.as_deref().unwrap_or("counter");
        Some(Scenario::from_name(name).ok_or_else(|| anyhow!("unknown scenario `{}`", name))?)
    } else {
        None
    };

    let definitions = match scenario {
        Some(scenario) => {
            let copies = args.definitions.unwrap_or(1).max(1);
            (0..copies)
                .map(|_| scenario.definition().map(Arc::new))
                .collect::<weft::definition::Result<Vec<_>>>()
                .with_context(|| format!("Failed to load scenario {}", scenario))?
        }
        None => load_workflows(&args.workflow, args.definitions)?,
    };

    let count = args
        .instances
        .unwrap_or_else(|| scenario.map(Scenario::default_instances).unwrap_or(1));
    let generator: ParameterGenerator = match scenario {
        Some(scenario) => scenario.parameters(args.seed),
        None => file_parameters(&definitions, &args.params)?,
    };

    let sink: Arc<dyn OutputSink> = if args.json {
        Arc::new(NullSink)
    } else {
        Arc::new(StdoutSink)
    };
    let catalog = ExternalCatalog::new();
    register_builtins(&catalog);

    let scheduler = Arc::new(Scheduler::new(config, catalog.snapshot(), sink)?);
    let ids = scheduler.create_instances(&definitions, count, generator)?;
    info!(
        instances = ids.len(),
        definitions = definitions.len(),
        fingerprint = %definitions[0].fingerprint(),
        "instances created"
    );

    let interrupt = Arc::clone(&scheduler);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling instances");
            interrupt.cancel_all();
        }
    });

    let summary = scheduler.run().await?;

    let report = scenario.map(|scenario| {
        scheduler
            .results()
            .validate_all(scenario.expectations(&ids))
    });

    if args.json {
        let document = serde_json::json!({
            "summary": summary,
            "validation": report,
        });
        println!("{}", serde_json::to_string_pretty(&document)?);
    } else {
        println!();
        println!("{}", summary.render_table());
        if let Some(report) = &report {
            println!("{}", report);
        }
    }

    let validated = report.as_ref().is_none_or(|report| report.all_passed());
    if summary.all_completed() && validated {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Load each file, then spread `copies` distinct definition objects across them.
fn load_workflows(files: &[PathBuf], copies: Option<usize>) -> Result<Vec<Arc<WorkflowDefinition>>> {
    let copies = copies.unwrap_or(files.len()).max(1);
    (0..copies)
        .map(|index| {
            let path = &files[index % files.len()];
            SexprLoader
                .load_file(path)
                .map(Arc::new)
                .with_context(|| format!("Failed to load {}", path.display()))
        })
        .collect()
}

/// Build a generator that gives each instance the `--param` values its
/// definition declares, plus `InstanceId` when declared.
fn file_parameters(
    definitions: &[Arc<WorkflowDefinition>],
    raw: &[String],
) -> Result<ParameterGenerator> {
    let mut supplied = Vec::with_capacity(raw.len());
    for item in raw {
        let (name, value) = item
            .split_once('=')
            .ok_or_else(|| anyhow!("parameter `{}` must look like NAME=VALUE", item))?;
        supplied.push((name.trim().to_string(), value.trim().to_string()));
    }

    let mut per_definition = Vec::with_capacity(definitions.len());
    for def in definitions {
        let mut params = Parameters::new();
        for (name, text) in &supplied {
            if let Some(spec) = def.parameters().iter().find(|spec| &spec.name == name) {
                params.insert(name.clone(), parse_value(text, spec.ty)?);
            }
        }
        let wants_id = def.parameters().iter().any(|spec| spec.name == "InstanceId");
        per_definition.push((params, wants_id));
    }

    Ok(Box::new(move |id: InstanceId| {
        let (params, wants_id) = &per_definition[((id.get() - 1) % per_definition.len() as u64) as usize];
        let mut params = params.clone();
        if *wants_id && params.get("InstanceId").is_none() {
            params.insert("InstanceId", id);
        }
        params
    }))
}

fn parse_value(text: &str, ty: ValueType) -> Result<Value> {
    match ty {
        ValueType::Integer => text
            .parse::<i64>()
            .map(Value::Integer)
            .with_context(|| format!("`{}` is not an integer", text)),
        ValueType::String => Ok(Value::String(text.to_string())),
        ValueType::Duration => {
            let (digits, scale) = if let Some(ms) = text.strip_suffix("ms") {
                (ms, 1)
            } else if let Some(secs) = text.strip_suffix('s') {
                (secs, 1000)
            } else {
                (text, 1)
            };
            let amount: u64 = digits
                .parse()
                .with_context(|| format!("`{}` is not a duration", text))?;
            if amount.checked_mul(scale).is_none() {
                bail!("duration `{}` is too large", text);
            }
            Ok(Value::Duration(Duration::from_millis(amount * scale)))
        }
    }
}

/// Methods every CLI run can invoke.
fn register_builtins(catalog: &ExternalCatalog) {
    catalog.register_fn("now_ms", |_, _| {
        Value::Integer(chrono::Utc::now().timestamp_millis())
    });
    catalog.register("log", |instance, args| {
        let parts: Vec<String> = args.iter().map(Value::to_string).collect();
        info!(instance_id = %instance, "{}", parts.join(" "));
        Ok(None)
    });
}
