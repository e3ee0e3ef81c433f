#![deny(unused_variables)]

use adnidx::classify::report::{write_patient_labels, write_summary, write_validation_curve};
use adnidx::classify::{PerformanceSummary, classify};
use adnidx::config::{PipelineConfig, RunConfig};
use adnidx::features::{FeatureSet, Modality, concatenate, generate_mri, generate_pet};
use adnidx::labels::{DxContext, PatientSummary, visit_coverage};
use adnidx::progress::EvaluationProgress;
use adnidx::tables::{StudyTables, load_mri, load_pet};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use itertools::Itertools;
use std::error::Error;
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;

#[derive(Args)]
pub struct ConfigArgs {
    /// Path to the run configuration (.toml); built-in defaults apply when omitted
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory for result tables, overriding [output] directory
    #[arg(long, value_name = "DIR")]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct EvaluateArgs {
    #[command(flatten)]
    pub common: ConfigArgs,

    /// Evaluate PET features (any of --pet/--mri/--concat replaces the [run] toggles)
    #[arg(long)]
    pub pet: bool,

    /// Evaluate MRI features
    #[arg(long)]
    pub mri: bool,

    /// Evaluate concatenated MRI + PET features
    #[arg(long)]
    pub concat: bool,

    /// Base seed for shuffling and fold assignment
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u64>,

    /// Number of cross-validation repetitions
    #[arg(long, value_name = "N")]
    pub repetitions: Option<usize>,

    /// Also compute the validation curve over the C grid
    #[arg(long)]
    pub validation_curve: bool,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ImagingTable {
    Pet,
    Mri,
}

#[derive(Parser)]
#[command(
    name = "adnidx",
    about = "Baseline diagnostic labels and cross-validated PET/MRI classification",
    long_about = "Derives one baseline diagnostic label per study participant from the \
                 longitudinal clinical tables, builds PET and MRI feature matrices and \
                 estimates how well a linear SVM separates two diagnostic classes."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run repeated cross-validation for the selected modalities
    Evaluate(EvaluateArgs),

    /// Write the per-patient baseline class, label and months to conversion
    Labels {
        #[command(flatten)]
        common: ConfigArgs,
    },

    /// Write which visits each patient has in an imaging table
    Visits {
        #[command(flatten)]
        common: ConfigArgs,

        /// Imaging table to inspect
        #[arg(value_enum)]
        table: ImagingTable,
    },

    /// Write a configuration file holding every default
    InitConfig {
        #[arg(value_name = "PATH", default_value = "adnidx.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Evaluate(args)) => run_evaluate(args),
        Some(Commands::Labels { common }) => run_labels(common),
        Some(Commands::Visits { common, table }) => run_visits(common, table),
        Some(Commands::InitConfig { path, force }) => run_init_config(&path, force),
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_config(args: &ConfigArgs) -> Result<PipelineConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => {
            log::info!("Reading configuration from {}", path.display());
            PipelineConfig::load(path)?
        }
        None => PipelineConfig::default(),
    };
    if let Some(output) = &args.output {
        config.output.directory = output.clone();
    }
    Ok(config)
}

fn output_path(config: &PipelineConfig, file_name: &str) -> Result<PathBuf, Box<dyn Error>> {
    fs::create_dir_all(&config.output.directory)?;
    Ok(config.output.directory.join(file_name))
}

fn create_progress_bar(message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(None, draw_target);
    if let Ok(style) = ProgressStyle::with_template(
        "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message(message.to_string());
    pb
}

/// Repetition counter drawn on stderr.
struct RepetitionBar {
    bar: ProgressBar,
}

impl EvaluationProgress for RepetitionBar {
    fn on_start(&self, modality: Modality, repetitions: usize) {
        self.bar.set_length(repetitions as u64);
        self.bar.set_message(format!("{modality} repetitions"));
    }

    fn on_repetition_finished(&self, _modality: Modality, _repetition: usize) {
        self.bar.inc(1);
    }

    fn on_finish(&self, modality: Modality) {
        self.bar.finish_with_message(format!("{modality} done"));
    }
}

fn run_evaluate(args: EvaluateArgs) -> Result<(), Box<dyn Error>> {
    let mut config = load_config(&args.common)?;
    if args.pet || args.mri || args.concat {
        config.run = RunConfig {
            pet: args.pet,
            mri: args.mri,
            concat: args.concat,
        };
    }
    if let Some(seed) = args.seed {
        config.evaluation.seed = Some(seed);
    }
    if let Some(repetitions) = args.repetitions {
        config.evaluation.repetitions = repetitions;
    }
    if args.validation_curve {
        config.evaluation.validation_curve = true;
    }
    if config.run.modalities().is_empty() {
        return Err(
            "No modality selected. Enable pet, mri or concat under [run] or pass --pet, --mri or --concat."
                .into(),
        );
    }

    let tables = StudyTables::load(&config.tables)?;
    let ctx = DxContext::build(&tables)?;
    let phase = config.labels.phase();

    let pet = if config.run.needs_pet() {
        let readings = load_pet(&config.tables.pet)?;
        Some(generate_pet(&ctx, &readings, phase, &config.pet)?)
    } else {
        None
    };
    let mri = if config.run.needs_mri() {
        let table = load_mri(&config.tables.mri)?;
        Some(generate_mri(&ctx, &table, phase, &config.mri)?)
    } else {
        None
    };
    let concat = match (&mri, &pet) {
        (Some(mri), Some(pet)) if config.run.concat => Some(concatenate(mri, pet)?),
        _ => None,
    };

    let selected: Vec<&FeatureSet> = [
        (config.run.pet, pet.as_ref()),
        (config.run.mri, mri.as_ref()),
        (config.run.concat, concat.as_ref()),
    ]
    .into_iter()
    .filter_map(|(enabled, set)| if enabled { set } else { None })
    .collect();

    for features in selected {
        let modality = features.modality;
        let key = modality.key();
        if config.output.manifests {
            features.write_manifest(
                &tables.dictionary,
                &output_path(&config, &format!("{key}_features.tsv"))?,
            )?;
        }

        let progress = RepetitionBar {
            bar: create_progress_bar(&format!("{modality} repetitions")),
        };
        let summary = classify(
            features.x.view(),
            &features.y,
            modality,
            &config.evaluation,
            &config.svm,
            &progress,
        )?;
        print_summary(&summary);

        let summary_path = output_path(&config, &format!("{key}_performance.tsv"))?;
        write_summary(&summary, &summary_path)?;
        println!("Wrote {}", summary_path.display());
        if let Some(curve) = &summary.validation {
            let curve_path = output_path(&config, &format!("{key}_validation_curve.tsv"))?;
            write_validation_curve(curve, &curve_path)?;
            println!("Wrote {}", curve_path.display());
        }
    }
    Ok(())
}

fn print_summary(summary: &PerformanceSummary) {
    let [negative, positive] = summary.classes;
    println!(
        "\n{} ({} {negative} vs {} {positive}), C = {}, base seed {}",
        summary.modality,
        summary.negative_count,
        summary.positive_count,
        summary.c,
        summary.base_seed
    );
    for (name, stats) in [
        ("train accuracy", summary.train_accuracy()),
        ("test accuracy", summary.test_accuracy()),
        ("train AUC", summary.train_auc()),
        ("test AUC", summary.test_auc()),
    ] {
        println!("  {name:<15} {:.3} ± {:.3}", stats.mean, stats.std);
    }
    if let Some(best) = summary.validation.as_ref().and_then(|curve| curve.best_c()) {
        println!("  best C on the validation curve: {best:e}");
    }
}

fn run_labels(common: ConfigArgs) -> Result<(), Box<dyn Error>> {
    let config = load_config(&common)?;
    let tables = StudyTables::load(&config.tables)?;
    let ctx = DxContext::build(&tables)?;

    let patients: Vec<PatientSummary> = ctx.patients().collect();
    println!("{} patients with a baseline class", patients.len());
    for (label, count) in patients
        .iter()
        .map(|patient| patient.label.to_string())
        .counts()
        .into_iter()
        .sorted()
    {
        println!("  {label:<8} {count}");
    }

    let path = output_path(&config, "labels.tsv")?;
    write_patient_labels(&patients, &path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn run_visits(common: ConfigArgs, table: ImagingTable) -> Result<(), Box<dyn Error>> {
    let config = load_config(&common)?;
    let tables = StudyTables::load(&config.tables)?;
    let ctx = DxContext::build(&tables)?;

    let (coverage, file_name) = match table {
        ImagingTable::Pet => {
            let readings = load_pet(&config.tables.pet)?;
            (visit_coverage(&ctx, &readings), "pet_visits.tsv")
        }
        ImagingTable::Mri => {
            let mri = load_mri(&config.tables.mri)?;
            (visit_coverage(&ctx, &mri.scans), "mri_visits.tsv")
        }
    };
    println!(
        "{} patients across {} visit codes",
        coverage.patients.len(),
        coverage.visit_codes.len()
    );

    let path = output_path(&config, file_name)?;
    coverage.write_tsv(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn run_init_config(path: &Path, force: bool) -> Result<(), Box<dyn Error>> {
    if path.exists() && !force {
        return Err(format!(
            "'{}' already exists. Pass --force to overwrite it.",
            path.display()
        )
        .into());
    }
    PipelineConfig::default().save(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
