use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use report_guard_core::{
    register_upload, AnalysisStore, AnalysisWorker, AuditStore, BlobStorage, ConfigResolver,
    ConfigStore, CoreSettings, Evaluation, FileChecklistSource, MemoryBlobStorage, MemoryJobQueue,
    MemoryStore, ProviderConfig, ProviderId, Report, ReportStore, RulesEvaluator, TenantId,
};
use sha2::{Digest, Sha256};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "report-guard",
    author,
    version,
    about = "Asbestos-inventory report compliance analyzer"
)]
struct Cli {
    /// Optional settings file (TOML), layered under REPORT_GUARD_* env vars
    #[arg(long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Directory containing checklist definition files (*.json)
    #[arg(long = "checklists-dir", value_name = "DIR", global = true)]
    checklists_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full analysis pipeline over one report file
    Analyze {
        /// Plain-text report file
        file: PathBuf,
        /// Tenant the report belongs to
        #[arg(long)]
        tenant: String,
        /// Checklist to judge the report against
        #[arg(long, default_value = "asbestos-inventory")]
        checklist: String,
        /// Emit the result as JSON instead of human-readable text
        #[arg(long)]
        json: bool,
        /// Where to write the conclusion document (default: <file>.conclusion.md)
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,
    },
    /// Inspect or test checklist definitions
    #[command(subcommand)]
    Checklist(ChecklistCommands),
}

#[derive(Subcommand, Debug)]
enum ChecklistCommands {
    /// List checklists found in the checklist directory
    List,
    /// Print a checklist's parsed items
    Show { name: String },
    /// Evaluate sample text against a checklist without persisting anything
    Test {
        name: String,
        /// Plain-text sample file
        #[arg(long, value_name = "FILE")]
        sample: PathBuf,
        /// Emit the evaluation as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref())?;
    let checklists_dir = cli
        .checklists_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(&settings.checklists_dir));

    match cli.command {
        Commands::Analyze {
            file,
            tenant,
            checklist,
            json,
            out,
        } => {
            analyze(
                &settings,
                &checklists_dir,
                &file,
                &tenant,
                &checklist,
                json,
                out,
            )
            .await
        }
        Commands::Checklist(command) => match command {
            ChecklistCommands::List => list_checklists(&checklists_dir).await,
            ChecklistCommands::Show { name } => show_checklist(&checklists_dir, &name).await,
            ChecklistCommands::Test { name, sample, json } => {
                test_checklist(&settings, &checklists_dir, &name, &sample, json).await
            }
        },
    }
}

async fn analyze(
    settings: &CoreSettings,
    checklists_dir: &Path,
    file: &Path,
    tenant: &str,
    checklist: &str,
    json: bool,
    out: Option<PathBuf>,
) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read report file {}", file.display()))?;

    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryJobQueue::new());
    let blobs = Arc::new(MemoryBlobStorage::new());

    FileChecklistSource::new(checklists_dir)
        .seed(&*store, Utc::now())
        .await?;
    if let Some(provider) = provider_from_env()? {
        store.insert_provider(provider).await?;
    }

    let key = blobs
        .put(text.as_bytes().to_vec())
        .await
        .context("failed to stage report text")?;
    let report = Report::new(
        TenantId::new(tenant),
        whoami(),
        file.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "report.txt".into()),
        checklist,
        key,
        hex_digest(text.as_bytes()),
        text.len() as u64,
        Utc::now(),
    );
    let report = register_upload(&*store, &*queue, report, Some(whoami())).await?;

    let worker = AnalysisWorker::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        Arc::clone(&blobs) as Arc<dyn BlobStorage>,
        settings,
    );
    worker.run_until_idle().await?;

    let stored = store
        .report(report.id)
        .await?
        .context("report vanished mid-run")?;
    let analysis = store.latest_analysis(report.id).await?;
    let findings = match &analysis {
        Some(analysis) => store.findings_for_analysis(analysis.id).await?,
        None => Vec::new(),
    };
    let trail = store.audit_trail(report.id).await?;

    if let Some(conclusion_key) = &stored.conclusion_key {
        let bytes = blobs.get(conclusion_key).await?;
        let out = out.unwrap_or_else(|| conclusion_path(file));
        std::fs::write(&out, bytes)
            .with_context(|| format!("failed to write conclusion to {}", out.display()))?;
        eprintln!("conclusion written to {}", out.display());
    }

    if json {
        let payload = serde_json::json!({
            "report": stored,
            "analysis": analysis,
            "findings": findings,
            "audit": trail,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    println!("Report {} [{}]", stored.filename, stored.status.label());
    match (&analysis, &stored.error_message) {
        (Some(analysis), _) => {
            println!(
                "Score: {} / 100 ({} engine, {} passed / {} failed)",
                analysis.score, analysis.engine, analysis.rules_passed, analysis.rules_failed
            );
            println!("{}", analysis.summary);
            if findings.is_empty() {
                println!("\nNo findings.");
            } else {
                println!("\nFindings:");
                for finding in &findings {
                    let section = finding
                        .section
                        .as_deref()
                        .map(|section| format!(" §{section}"))
                        .unwrap_or_default();
                    println!(
                        "  - [{severity:>8}] {id}{section} :: {message}",
                        severity = finding.severity,
                        id = finding.rule_id,
                        message = finding.message
                    );
                    if let Some(evidence) = &finding.evidence {
                        println!("      \"{}\"", evidence.replace(['\n', '\r'], " "));
                    }
                }
            }
        }
        (None, Some(error)) => println!("Failed: {error}"),
        (None, None) => println!("No analysis was produced."),
    }
    Ok(())
}

async fn list_checklists(checklists_dir: &Path) -> Result<()> {
    let source = FileChecklistSource::new(checklists_dir);
    let definitions = source.load()?;
    println!(
        "{} checklist(s) in {}",
        definitions.len(),
        checklists_dir.display()
    );
    for (name, content) in definitions {
        let definition = report_guard_core::ChecklistDefinition::parse(content)?;
        println!(
            "- {name:<24} {title} ({items} items)",
            name = name,
            title = definition.title,
            items = definition.items.len()
        );
    }
    Ok(())
}

async fn show_checklist(checklists_dir: &Path, name: &str) -> Result<()> {
    let source = FileChecklistSource::new(checklists_dir);
    let Some((_, content)) = source.load()?.iter().find(|(entry, _)| entry == name) else {
        bail!("checklist `{name}` not found in {}", checklists_dir.display());
    };
    let definition = report_guard_core::ChecklistDefinition::parse(content)?;
    println!("{} — {}", name, definition.title);
    for item in &definition.items {
        let expect = match item.expect {
            report_guard_core::Expectation::Present => "require",
            report_guard_core::Expectation::Absent => "forbid",
        };
        println!(
            "- {id:<24} [{severity:>8}] {expect} {kind:?} `{pattern}`",
            id = item.id,
            severity = item.severity,
            expect = expect,
            kind = item.kind,
            pattern = item.pattern
        );
    }
    Ok(())
}

async fn test_checklist(
    settings: &CoreSettings,
    checklists_dir: &Path,
    name: &str,
    sample: &Path,
    json: bool,
) -> Result<()> {
    let text = std::fs::read_to_string(sample)
        .with_context(|| format!("failed to read sample file {}", sample.display()))?;

    let store = Arc::new(MemoryStore::new());
    FileChecklistSource::new(checklists_dir)
        .seed(&*store, Utc::now())
        .await?;
    let version = store
        .active_version(name)
        .await?
        .with_context(|| format!("checklist `{name}` not found"))?;

    let resolver = ConfigResolver::new(Arc::clone(&store));
    let evaluator = RulesEvaluator::new(settings.severity_weights());
    let evaluation = resolver.test_run(version.id, &text, &evaluator).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&evaluation)?);
        return Ok(());
    }
    print_evaluation(name, &evaluation);
    Ok(())
}

fn print_evaluation(name: &str, evaluation: &Evaluation) {
    println!(
        "Test run of `{name}`: score {} / 100 ({} passed / {} failed)",
        evaluation.scored.score, evaluation.scored.rules_passed, evaluation.scored.rules_failed
    );
    println!("{}", evaluation.summary);
    for finding in &evaluation.findings {
        println!(
            "  - [{severity:>8}] {id} :: {message}",
            severity = finding.severity,
            id = finding.rule_id,
            message = finding.message
        );
    }
}

fn load_settings(config: Option<&Path>) -> Result<CoreSettings> {
    let mut builder = config::Config::builder();
    if let Some(path) = config {
        builder = builder.add_source(config::File::from(path.to_path_buf()));
    }
    let raw = builder
        .add_source(
            config::Environment::with_prefix("REPORT_GUARD")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("failed to load settings")?;
    raw.try_deserialize::<CoreSettings>()
        .context("invalid settings")
}

/// Build an active provider configuration from environment variables, the
/// way deployments without a config database hand credentials to the CLI.
fn provider_from_env() -> Result<Option<ProviderConfig>> {
    let Ok(credential) = std::env::var("REPORT_GUARD_AI_KEY") else {
        return Ok(None);
    };
    if credential.trim().is_empty() {
        return Ok(None);
    }
    let provider = std::env::var("REPORT_GUARD_AI_PROVIDER").unwrap_or_else(|_| "anthropic".into());
    let model = std::env::var("REPORT_GUARD_AI_MODEL")
        .unwrap_or_else(|_| "claude-3-haiku-20240307".into());
    let endpoint = std::env::var("REPORT_GUARD_AI_ENDPOINT")
        .ok()
        .filter(|value| !value.trim().is_empty());
    Ok(Some(ProviderConfig {
        id: ProviderId::new(),
        name: "env".into(),
        provider,
        model,
        credential,
        endpoint,
        is_active: true,
        created_at: Utc::now(),
    }))
}

fn conclusion_path(file: &Path) -> PathBuf {
    let mut path = file.to_path_buf();
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "report".into());
    path.set_file_name(format!("{stem}.conclusion.md"));
    path
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn whoami() -> String {
    std::env::var("USER").unwrap_or_else(|_| "cli".into())
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tokio=warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
