use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use inat_area_import::app::{App, AppSettings, EnrichResult, ImportOptions, ImportResult};
use inat_area_import::circle::Circle;
use inat_area_import::config::{ConfigLoader, ResolvedConfig};
use inat_area_import::domain::{
    DatasetSource, ObservationFilters, OutputField, PhotoMode, QualityGrade,
};
use inat_area_import::error::InatError;
use inat_area_import::inat::InatHttpClient;
use inat_area_import::output::{JsonOutput, OutputMode};
use inat_area_import::picker::{AreaPicker, Viewport};
use inat_area_import::tui::{JobKind, Tui};
use inat_area_import::workspace::Workspace;

#[derive(Parser)]
#[command(name = "inat-import")]
#[command(about = "Import iNaturalist observations inside a circle, then add their taxonomy")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Pick a circle and download the observations inside it")]
    Import(ImportArgs),
    #[command(about = "Add kingdom..species columns to an observation dataset")]
    Enrich(EnrichArgs),
    #[command(about = "List observer logins and taxon names seen in a circle")]
    Presets(CircleArgs),
    #[command(about = "Show the active dataset")]
    Active,
}

#[derive(Args, Clone, Default)]
struct CircleArgs {
    #[arg(long, allow_hyphen_values = true)]
    lat: Option<f64>,

    #[arg(long, allow_hyphen_values = true)]
    lon: Option<f64>,

    #[arg(long)]
    radius_m: Option<f64>,
}

#[derive(Args)]
struct ImportArgs {
    #[command(flatten)]
    circle: CircleArgs,

    /// Inclusive lower date bound (YYYY-MM-DD).
    #[arg(long)]
    date_from: Option<String>,

    /// Exclusive upper date bound (YYYY-MM-DD).
    #[arg(long)]
    date_to: Option<String>,

    #[arg(long)]
    user_login: Option<String>,

    #[arg(long)]
    taxon_name: Option<String>,

    #[arg(long, value_enum)]
    quality_grade: Option<QualityGrade>,

    /// Comma-separated output fields; inat_id and taxon_id are always written.
    #[arg(long, value_delimiter = ',')]
    fields: Option<Vec<String>>,

    #[arg(long, value_enum)]
    photos: Option<PhotoMode>,
}

#[derive(Args)]
struct EnrichArgs {
    /// `<path>|layername=<name>`; defaults to the active dataset.
    source: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<InatError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &InatError) -> u8 {
    match error {
        InatError::NoActiveDataset
        | InatError::NotObservationDataset(_)
        | InatError::AlreadyProcessed(_)
        | InatError::CorruptedDataset(_)
        | InatError::InvalidSource(_)
        | InatError::DatasetNotFound(_) => 2,
        InatError::Http(_) | InatError::Status { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let workspace = Workspace::new(config.output_dir.clone());
    let client = InatHttpClient::new(&config.api_base_url)?;
    let app = App::new(workspace, client, AppSettings::from(&config));

    match cli.command {
        Commands::Import(args) => run_import(args, app, &config, output_mode),
        Commands::Enrich(args) => run_enrich(args, app, output_mode),
        Commands::Presets(args) => run_presets(args, app, output_mode),
        Commands::Active => {
            let result = app.active()?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_active(&result).into_diagnostic(),
                OutputMode::Interactive => {
                    match result.source {
                        Some(source) => println!("Active dataset: {source}"),
                        None => println!("No active dataset"),
                    }
                    Ok(())
                }
            }
        }
    }
}

fn resolve_circle(args: &CircleArgs, output_mode: OutputMode) -> miette::Result<Option<Circle>> {
    match (args.lat, args.lon, args.radius_m) {
        (Some(lat), Some(lon), Some(radius_m)) => Ok(Some(Circle::new(lat, lon, radius_m)?)),
        (None, None, None) if matches!(output_mode, OutputMode::Interactive) => {
            let viewport = Viewport::new(2.5, 46.5, 12.0);
            AreaPicker::new(viewport).run()
        }
        _ => Err(InatError::InvalidCircle(
            "--lat, --lon and --radius-m must be given together".to_string(),
        )
        .into()),
    }
}

fn run_import(
    args: ImportArgs,
    app: App<InatHttpClient>,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let filters = ObservationFilters {
        date_from: parse_date(args.date_from.as_deref())?,
        date_to: parse_date(args.date_to.as_deref())?,
        user_login: ObservationFilters::non_blank(args.user_login),
        taxon_name: ObservationFilters::non_blank(args.taxon_name),
        quality_grade: args.quality_grade,
    };
    let fields = match args.fields {
        Some(names) => names
            .iter()
            .map(|name| name.parse())
            .collect::<Result<Vec<OutputField>, InatError>>()?,
        None => config.fields.clone(),
    };
    let options = ImportOptions {
        filters,
        fields,
        photo_mode: args.photos.unwrap_or(config.photo_mode),
    };

    let Some(circle) = resolve_circle(&args.circle, output_mode)? else {
        println!("No area selected, nothing imported");
        return Ok(());
    };

    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.import(&circle, options, &JsonOutput)?;
            JsonOutput::print_import(&result).into_diagnostic()
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(JobKind::Import);
            let result = tui.run(move |sink| app.import(&circle, options, sink))?;
            print_import_summary(&result);
            Ok(())
        }
    }
}

fn run_enrich(
    args: EnrichArgs,
    app: App<InatHttpClient>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let source = args
        .source
        .as_deref()
        .map(str::parse::<DatasetSource>)
        .transpose()?;
    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.enrich(source, &JsonOutput)?;
            JsonOutput::print_enrich(&result).into_diagnostic()
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(JobKind::Enrich);
            let result = tui.run(move |sink| app.enrich(source, sink))?;
            print_enrich_summary(&result);
            Ok(())
        }
    }
}

fn run_presets(
    args: CircleArgs,
    app: App<InatHttpClient>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let Some(circle) = resolve_circle(&args, output_mode)? else {
        return Ok(());
    };
    let suggestions = app.presets(&circle, ObservationFilters::default());
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_presets(&suggestions).into_diagnostic(),
        OutputMode::Interactive => {
            println!("Observers ({}):", suggestions.user_logins.len());
            for login in &suggestions.user_logins {
                println!("  {login}");
            }
            println!("Taxa ({}):", suggestions.taxon_names.len());
            for name in &suggestions.taxon_names {
                println!("  {name}");
            }
            Ok(())
        }
    }
}

fn parse_date(value: Option<&str>) -> miette::Result<Option<chrono::NaiveDate>> {
    match value {
        Some(value) => Ok(ObservationFilters::parse_date(value)?),
        None => Ok(None),
    }
}

fn print_import_summary(result: &ImportResult) {
    println!("Imported {} observations ({} fetched)", result.written, result.fetched);
    println!("  circle:  {} ({})", result.circle_name, result.circle_path);
    println!("  dataset: {}", result.source);
    println!("  fields:  {}", result.fields.join(", "));
}

fn print_enrich_summary(result: &EnrichResult) {
    if result.cancelled {
        println!("Enrichment cancelled, partial results were saved");
    }
    println!(
        "Taxonomy added to {} records ({} without taxonomy)",
        result.updated, result.not_found
    );
    println!(
        "  distinct taxa: {}   unresolved: {}",
        result.distinct_taxa, result.taxonomy_errors
    );
    println!("  duration: {:.1}s", result.duration_secs);
    println!("  log: {}", result.run_log);
}
