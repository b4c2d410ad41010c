use std::sync::Arc;

use clap::error::ErrorKind;
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use ra_dispatch::config::{AdmissionScope, DispatchConfig, JobTemplate, ServiceConfig};
use ra_dispatch::error::{DispatchError, FailureKind};
use ra_dispatch::scheduler::{
    DateRange, DispatchReport, Dispatcher, JobOutcome, LifecycleState, OutcomeStatus,
};
use ra_dispatch::service::GcloudBatchClient;
use ra_dispatch::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "ra-dispatch")]
#[command(version)]
#[command(about = "Submit one rolling-average batch job per date, within a capacity limit")]
struct Args {
    /// First date to submit (YYYYMMDD or YYYY-MM-DD)
    start_date: String,

    /// Last date to submit, inclusive
    end_date: String,

    /// Number of dates handled concurrently
    max_parallel: usize,

    /// Maximum scheduled + running jobs allowed in the region before waiting
    #[arg(long, default_value = "5")]
    max_active_jobs: usize,

    /// Only count jobs with this job type against --max-active-jobs
    #[arg(long)]
    scoped_admission: bool,

    /// Leave dates whose job already succeeded untouched
    #[arg(long)]
    skip_succeeded: bool,

    /// Print the job documents without contacting the batch service
    #[arg(long)]
    dry_run: bool,

    #[arg(long, default_value = "no2-app")]
    project: String,

    #[arg(long, default_value = "us-east1")]
    region: String,

    /// Container image that computes a single day
    #[arg(long)]
    image: Option<String>,

    /// Path to the gcloud CLI
    #[arg(long, default_value = "gcloud")]
    gcloud: String,

    /// Output format for the final summary
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct OutcomeOutput {
    date: String,
    identity: String,
    status: &'static str,
    final_state: LifecycleState,
    error_kind: Option<FailureKind>,
    error: Option<String>,
    needs_rerun: bool,
}

#[derive(Serialize)]
struct RunOutput {
    run_id: String,
    succeeded: usize,
    failed: usize,
    outcomes: Vec<OutcomeOutput>,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn status_label(outcome: &JobOutcome) -> &'static str {
    match outcome.status {
        OutcomeStatus::Done => "done",
        OutcomeStatus::Skipped => "skipped",
        OutcomeStatus::Failed(_) => "failed",
    }
}

/// Progress lines go to stdout for table output and to stderr when stdout
/// carries the JSON document.
fn say(format: &OutputFormat, line: &str) {
    match format {
        OutputFormat::Table => println!("{}", line),
        OutputFormat::Json => eprintln!("{}", line),
    }
}

fn outcome_lines(outcome: &JobOutcome) -> Vec<String> {
    match &outcome.status {
        OutcomeStatus::Done => vec![format!(
            "[ok]   {} {} submitted",
            outcome.unit, outcome.identity
        )],
        OutcomeStatus::Skipped => vec![format!(
            "[skip] {} {} already succeeded",
            outcome.unit, outcome.identity
        )],
        OutcomeStatus::Failed(e) => {
            let mut lines = vec![format!(
                "[fail] {} {} {}: {}",
                outcome.unit,
                outcome.identity,
                e.kind(),
                e
            )];
            if let DispatchError::SubmissionFailure { stdout, stderr, .. } = e {
                lines.push("  STDOUT:".to_string());
                lines.extend(stdout.lines().map(|l| format!("    {}", l)));
                lines.push("  STDERR:".to_string());
                lines.extend(stderr.lines().map(|l| format!("    {}", l)));
            }
            lines
        }
    }
}

fn print_summary(report: &DispatchReport, format: &OutputFormat) -> Result<(), serde_json::Error> {
    match format {
        OutputFormat::Json => {
            let output = RunOutput {
                run_id: report.run_id.to_string(),
                succeeded: report.succeeded().count(),
                failed: report.failed().count(),
                outcomes: report
                    .outcomes
                    .iter()
                    .map(|o| OutcomeOutput {
                        date: o.unit.to_string(),
                        identity: o.identity.to_string(),
                        status: status_label(o),
                        final_state: o.final_state(),
                        error_kind: o.error().map(DispatchError::kind),
                        error: o.error().map(|e| e.to_string()),
                        needs_rerun: o.error().is_some_and(|e| e.kind().needs_rerun()),
                    })
                    .collect(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!();
            println!("{:<10} {:<32} {:<9} {}", "DATE", "JOB", "STATUS", "REASON");
            println!("{}", "-".repeat(78));
            for o in &report.outcomes {
                let reason = o
                    .error()
                    .map(|e| e.kind().to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<10} {:<32} {:<9} {}",
                    o.unit.to_string(),
                    o.identity.to_string(),
                    status_label(o),
                    reason
                );
            }
            println!();
            println!(
                "{} succeeded, {} failed",
                report.succeeded().count(),
                report.failed().count()
            );
        }
    }
    Ok(())
}

// =============================================================================
// Dispatch
// =============================================================================

async fn run(args: Args) -> Result<bool, Box<dyn std::error::Error>> {
    let range = DateRange::parse(&args.start_date, &args.end_date)?;
    if args.max_parallel == 0 {
        return Err(DispatchError::Config("MAX_PARALLEL must be at least 1".to_string()).into());
    }

    let mut template = JobTemplate::default();
    if let Some(image) = args.image {
        template.image_uri = image;
    }

    let service_config = ServiceConfig {
        program: args.gcloud,
        project: args.project,
        region: args.region,
        admission_scope: if args.scoped_admission {
            AdmissionScope::JobType
        } else {
            AdmissionScope::Region
        },
    };

    let dispatch_config = DispatchConfig::new(args.max_parallel)
        .with_max_active_jobs(args.max_active_jobs)
        .with_skip_succeeded(args.skip_succeeded);

    let units = range.units();
    say(&args.output, "Submitting the following dates:");
    for unit in &units {
        say(&args.output, &unit.to_string());
    }

    let scope = service_config.admission_scope;
    let client = Arc::new(GcloudBatchClient::new(service_config));
    let format = args.output.clone();
    let dispatcher = Dispatcher::new(client, template, dispatch_config)
        .with_admission_scope(scope)
        .with_reporter(Arc::new(move |outcome: &JobOutcome| {
            for line in outcome_lines(outcome) {
                say(&format, &line);
            }
        }));

    if args.dry_run {
        for descriptor in dispatcher.plan(&units)? {
            println!("# {}", descriptor.identity);
            println!("{}", descriptor.config.to_json()?);
        }
        return Ok(true);
    }

    let cancel = install_shutdown_handler()?;
    let report = dispatcher.run(units, cancel).await?;
    print_summary(&report, &args.output)?;

    Ok(report.is_success())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    };

    // Logs go to stderr; stdout is the operator report
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let code = match run(args).await {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    };
    std::process::exit(code);
}
