use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use krishimitra_agent::agent_core::{
    AgentRequest, FarmDatabase, FarmRecord, LocationHints, Orchestrator,
};
use krishimitra_agent::inference::{AgentSettings, InferenceClient};
use krishimitra_agent::tools::ToolRegistry;
use krishimitra_agent::AgentService;

#[derive(Debug, Parser)]
#[command(name = "krishimitra", version, about = "KrishiMitra farm advisor agent")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Answer a question with the planning agent
    Ask(QuestionArgs),
    /// Query every data source once and answer in one call
    Gather(QuestionArgs),
    /// Manage farm profiles
    #[command(subcommand)]
    Farm(FarmCommand),
}

#[derive(Debug, Subcommand)]
enum FarmCommand {
    /// Create or replace a farm profile
    Add(FarmArgs),
    /// Print a farm profile
    Show {
        #[arg(long)]
        id: String,
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

#[derive(Debug, Args, Clone)]
struct QuestionArgs {
    #[arg(value_name = "QUESTION", required = true)]
    question: Vec<String>,
    #[arg(long, allow_hyphen_values = true)]
    lat: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    lon: Option<f64>,
    #[arg(long)]
    district: Option<String>,
    #[arg(long)]
    commodity: Option<String>,
    #[arg(long)]
    mandi: Option<String>,
    #[arg(long)]
    farm_id: Option<String>,
    #[arg(long, default_value = "en")]
    lang: String,
    /// Overrides `orchestrator.max_steps`
    #[arg(long)]
    max_steps: Option<u32>,
    /// Config file (default: KRISHIMITRA_CONFIG or upward search for krishimitra.yaml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Farm database (default: <data dir>/farms.db)
    #[arg(long)]
    db: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
struct FarmArgs {
    #[arg(long)]
    id: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long, allow_hyphen_values = true)]
    lat: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    lon: Option<f64>,
    #[arg(long)]
    district: Option<String>,
    #[arg(long)]
    state: Option<String>,
    /// Comma-separated, most preferred first
    #[arg(long, value_delimiter = ',')]
    commodities: Vec<String>,
    #[arg(long)]
    mandi: Option<String>,
    #[arg(long)]
    db: Option<PathBuf>,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let log_path = krishimitra_agent::init_tracing(&krishimitra_agent::data_dir())
            .context("failed to initialise logging")?;
        tracing::debug!(log = %log_path.display(), command = ?self.command, "cli start");

        match self.command {
            Command::Ask(args) => {
                let service = build_service(&args)?;
                let outcome = service.ask(&args.to_request()).await;
                print_json(&outcome)
            }
            Command::Gather(args) => {
                let service = build_service(&args)?;
                let outcome = service.gather(&args.to_request()).await;
                print_json(&outcome)
            }
            Command::Farm(FarmCommand::Add(args)) => {
                let db = open_db(args.db.as_deref())?;
                let record = FarmRecord {
                    id: args.id,
                    name: args.name,
                    latitude: args.lat,
                    longitude: args.lon,
                    district: args.district,
                    state: args.state,
                    preferred_commodities: args.commodities,
                    preferred_mandi: args.mandi,
                };
                db.upsert_farm(&record)?;
                print_json(&record)
            }
            Command::Farm(FarmCommand::Show { id, db }) => {
                let db = open_db(db.as_deref())?;
                match db.get_farm(&id)? {
                    Some(farm) => print_json(&farm),
                    None => anyhow::bail!("no farm with id '{id}'"),
                }
            }
        }
    }
}

impl QuestionArgs {
    fn to_request(&self) -> AgentRequest {
        let mut request = AgentRequest::new(self.question.join(" "));
        request.lang = self.lang.clone();
        request.farm_id = self.farm_id.clone();
        request.max_steps = self.max_steps;
        request.hints = LocationHints {
            lat: self.lat,
            lon: self.lon,
            district: self.district.clone(),
            commodity: self.commodity.clone(),
            mandi: self.mandi.clone(),
        };
        request
    }
}

fn open_db(path: Option<&Path>) -> anyhow::Result<FarmDatabase> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(krishimitra_agent::default_db_path);
    FarmDatabase::open(&path).with_context(|| format!("failed to open {}", path.display()))
}

fn build_service(args: &QuestionArgs) -> anyhow::Result<AgentService> {
    let cwd = std::env::current_dir().context("failed to read working directory")?;
    let settings = AgentSettings::load(args.config.as_deref(), &cwd)?;
    if settings.models.api_key.is_none() {
        tracing::warn!("no model API key configured; model calls will likely be rejected");
    }

    let planner = InferenceClient::planner(settings.models.clone())?;
    let finalizer = InferenceClient::finalizer(settings.models.clone())?;
    let registry = ToolRegistry::from_config(&settings.tools, Vec::new())?;
    let orchestrator = Orchestrator::from_settings(
        &settings,
        Arc::new(planner),
        Arc::new(finalizer),
        Arc::new(registry),
    );
    let db = open_db(args.db.as_deref())?;
    Ok(AgentService::new(Arc::new(db), orchestrator))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
