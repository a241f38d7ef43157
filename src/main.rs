//! Command-line front end for the model management service.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use modeldesk::api::{ApiGateway, DatasetId, HttpGateway, ModelId};
use modeldesk::config::{self, AppConfig};
use modeldesk::jobs::SubmissionOutcome;
use modeldesk::logging::{self, LogTarget};
use modeldesk::app_dirs;
use modeldesk::pipeline::{Dtype, FeatureEncoder, ModelType, RawInputs, TrainingForm};
use modeldesk::workflow::{PollOutcome, WorkflowSession, WorkflowState};

fn main() {
    let config = config::load_or_default().map_err(|err| err.to_string());
    let log_settings = config
        .as_ref()
        .map(|config| config.logging.clone())
        .unwrap_or_default();
    match logging::init(&log_settings) {
        Ok(LogTarget::FileUnavailable(err)) => eprintln!("File logging disabled: {err}"),
        Ok(_) => {}
        Err(err) => eprintln!("Logging disabled: {err}"),
    }
    if let Err(err) = config.and_then(run) {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

enum Command {
    Config(ConfigEdits),
    Server(ServerCommand),
}

/// Settings changed by `modeldesk config`; `None` leaves the stored value.
struct ConfigEdits {
    base_url: Option<String>,
    client_side: Option<bool>,
    page_size: Option<u32>,
    log_level: Option<String>,
}

impl ConfigEdits {
    fn is_empty(&self) -> bool {
        self.base_url.is_none()
            && self.client_side.is_none()
            && self.page_size.is_none()
            && self.log_level.is_none()
    }
}

/// Commands that talk to the backend.
enum ServerCommand {
    Login {
        username: String,
        password: String,
    },
    Register {
        username: String,
        password: String,
        email: Option<String>,
    },
    Datasets,
    UploadDataset {
        file: PathBuf,
        name: String,
        description: Option<String>,
    },
    UpdateDataset {
        id: DatasetId,
        name: Option<String>,
        description: Option<String>,
    },
    DeleteDataset {
        id: DatasetId,
    },
    Models,
    ExportModel {
        id: ModelId,
        out: Option<PathBuf>,
    },
    Schema {
        model: ModelId,
    },
    Predict {
        model: ModelId,
        inputs: RawInputs,
    },
    Train {
        form: TrainingForm,
    },
    History {
        model: ModelId,
        page: u32,
        per_page: Option<u32>,
    },
    Profile,
    DeleteAccount,
}

fn run(mut config: AppConfig) -> Result<(), String> {
    let command = parse_args(std::env::args().skip(1).collect())?;
    match command {
        Command::Config(edits) => configure(config, edits),
        Command::Server(command) => {
            config.apply_env_overrides();
            let gateway = HttpGateway::from_config(&config).map_err(|err| err.to_string())?;
            tracing::debug!(base_url = %gateway.context().base_url(), "Using server");
            run_server_command(&config, gateway, command)
        }
    }
}

fn run_server_command(
    config: &AppConfig,
    gateway: HttpGateway,
    command: ServerCommand,
) -> Result<(), String> {
    match command {
        ServerCommand::Login { username, password } => login(&gateway, &username, &password),
        ServerCommand::Register {
            username,
            password,
            email,
        } => {
            gateway
                .register(&username, &password, email.as_deref())
                .map_err(|err| err.to_string())?;
            println!("Registered {username}. Run `modeldesk login` to get a token.");
            Ok(())
        }
        ServerCommand::Datasets => list_datasets(&gateway),
        ServerCommand::UploadDataset {
            file,
            name,
            description,
        } => {
            let uploaded = gateway
                .upload_dataset(&file, &name, description.as_deref())
                .map_err(|err| err.to_string())?;
            println!("Uploaded dataset {} ({name})", uploaded.dataset_id);
            Ok(())
        }
        ServerCommand::UpdateDataset {
            id,
            name,
            description,
        } => {
            gateway
                .update_dataset(id, name.as_deref(), description.as_deref())
                .map_err(|err| err.to_string())?;
            println!("Updated dataset {id}");
            Ok(())
        }
        ServerCommand::DeleteDataset { id } => {
            gateway.delete_dataset(id).map_err(|err| err.to_string())?;
            println!("Deleted dataset {id}");
            Ok(())
        }
        ServerCommand::Models => list_models(&gateway),
        ServerCommand::ExportModel { id, out } => {
            let out = match out {
                Some(out) => out,
                None => app_dirs::exports_dir()
                    .map_err(|err| err.to_string())?
                    .join(format!("model_{id}.pkl")),
            };
            export_model(&gateway, id, &out)
        }
        ServerCommand::Schema { model } => show_schema(&gateway, model),
        ServerCommand::Predict { model, inputs } => predict(config, gateway, model, &inputs),
        ServerCommand::Train { form } => train(config, gateway, &form),
        ServerCommand::History {
            model,
            page,
            per_page,
        } => show_history(
            &gateway,
            model,
            page,
            per_page.unwrap_or(config.history.page_size),
        ),
        ServerCommand::Profile => {
            let profile = gateway.profile().map_err(|err| err.to_string())?;
            println!("{}", pretty_json(&profile));
            Ok(())
        }
        ServerCommand::DeleteAccount => {
            gateway.delete_account().map_err(|err| err.to_string())?;
            println!("Account deleted");
            Ok(())
        }
    }
}

fn configure(mut config: AppConfig, edits: ConfigEdits) -> Result<(), String> {
    let path = config::config_path().map_err(|err| err.to_string())?;
    let changed = !edits.is_empty();
    if let Some(base_url) = edits.base_url {
        config::parse_base_url(&base_url).map_err(|err| err.to_string())?;
        config.server.base_url = base_url;
    }
    if let Some(client_side) = edits.client_side {
        config.encoding.client_side = client_side;
    }
    if let Some(page_size) = edits.page_size {
        config.history.page_size = page_size.max(1);
    }
    if let Some(level) = edits.log_level {
        config.logging.level = level;
    }
    if changed {
        config::save(&config).map_err(|err| err.to_string())?;
        println!("Saved {}", path.display());
    } else {
        println!("# {}", path.display());
    }
    let rendered = toml::to_string_pretty(&config).map_err(|err| err.to_string())?;
    print!("{rendered}");
    Ok(())
}

fn login(gateway: &HttpGateway, username: &str, password: &str) -> Result<(), String> {
    let token = gateway
        .login(username, password)
        .map_err(|err| err.to_string())?;
    let authed = gateway.with_context(gateway.context().clone().with_token(token.clone()));
    match authed.profile() {
        Ok(_) => tracing::info!("Token verified against /profile"),
        Err(err) => tracing::warn!("Token could not be verified: {err}"),
    }
    println!("Logged in as {username}. Export the token to use it:");
    println!("export {}={token}", modeldesk::api::TOKEN_ENV);
    Ok(())
}

fn list_datasets(gateway: &HttpGateway) -> Result<(), String> {
    let datasets = gateway.list_datasets().map_err(|err| err.to_string())?;
    if datasets.is_empty() {
        println!("No datasets");
    }
    for dataset in datasets {
        println!(
            "- {} | {} | rows={} | columns={} | created_at={}",
            dataset.id,
            dataset.name,
            dataset.row_count,
            dataset.columns.join(","),
            dataset.created_at
        );
    }
    Ok(())
}

fn list_models(gateway: &HttpGateway) -> Result<(), String> {
    let models = gateway.list_models().map_err(|err| err.to_string())?;
    if models.is_empty() {
        println!("No models");
    }
    for model in models {
        let dataset = model
            .dataset_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        let target = model.target_column.as_deref().unwrap_or("-");
        println!(
            "- {} | {} | {} | dataset={dataset} | target={target} | created_at={}",
            model.id, model.name, model.model_type, model.created_at
        );
    }
    Ok(())
}

fn export_model(gateway: &HttpGateway, id: ModelId, out: &Path) -> Result<(), String> {
    let file = fs::File::create(out)
        .map_err(|err| format!("Failed to create {}: {err}", out.display()))?;
    let mut writer = BufWriter::new(file);
    let exported = gateway
        .export_model(id, &mut writer)
        .map_err(|err| err.to_string())
        .and_then(|bytes| writer.flush().map(|()| bytes).map_err(|err| err.to_string()));
    match exported {
        Ok(bytes) => {
            println!("Exported model {id} to {} ({bytes} bytes)", out.display());
            Ok(())
        }
        Err(err) => {
            let _ = fs::remove_file(out);
            Err(err)
        }
    }
}

fn show_schema(gateway: &HttpGateway, model: ModelId) -> Result<(), String> {
    let schema = gateway.fetch_schema(model).map_err(|err| err.to_string())?;
    println!("Model {model} expects {} columns:", schema.len());
    for column in schema.columns() {
        let kind = match column.dtype {
            Dtype::Numeric(_) => "numeric",
            Dtype::Categorical => "categorical",
            Dtype::Text => "text",
        };
        match schema.encoder(&column.name) {
            Some(encoder) => {
                let categories = encoder.keys().cloned().collect::<Vec<_>>().join(", ");
                println!("- {} ({kind}, {}): {categories}", column.name, column.raw_dtype);
            }
            None => println!("- {} ({kind}, {})", column.name, column.raw_dtype),
        }
    }
    Ok(())
}

fn predict(
    config: &AppConfig,
    gateway: HttpGateway,
    model: ModelId,
    inputs: &RawInputs,
) -> Result<(), String> {
    let mut session = new_session(config, gateway);
    let deadline = request_deadline(config);
    session.open(model);
    drive(&mut session, deadline)?;
    if session.state() == WorkflowState::Failed {
        return Err(held_error(&session));
    }
    session.submit(inputs).map_err(|err| err.to_string())?;
    drive(&mut session, request_deadline(config))?;
    match session.result() {
        Some(SubmissionOutcome::Prediction(result)) => {
            let predictions = result
                .predictions
                .iter()
                .map(|value| match value {
                    serde_json::Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", ");
            println!("Prediction: {predictions}");
            if let Some(confidence) = result.confidence_score {
                println!("Confidence: {confidence:.3}");
            }
            Ok(())
        }
        _ => Err(held_error(&session)),
    }
}

fn train(config: &AppConfig, gateway: HttpGateway, form: &TrainingForm) -> Result<(), String> {
    let mut session = new_session(config, gateway);
    session.open_training();
    session.submit_training(form).map_err(|err| err.to_string())?;
    drive(&mut session, request_deadline(config))?;
    match session.result() {
        Some(SubmissionOutcome::Trained(trained)) => {
            let message = trained.message.as_deref().unwrap_or("Model trained");
            println!("{message} (model {})", trained.model_id);
            Ok(())
        }
        _ => Err(held_error(&session)),
    }
}

fn show_history(
    gateway: &HttpGateway,
    model: ModelId,
    page: u32,
    per_page: u32,
) -> Result<(), String> {
    let history = gateway
        .prediction_history(model, page, per_page)
        .map_err(|err| err.to_string())?;
    for record in &history.records {
        let confidence = record
            .confidence_score
            .map(|score| format!("{score:.3}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "- #{} | {} | input={} | prediction={} | confidence={confidence}",
            record.id, record.created_at, record.input_data, record.prediction
        );
    }
    match history.pages {
        Some(pages) => println!("Page {} of {pages}", history.page),
        None => println!("Page {}", history.page),
    }
    if history.has_next() {
        println!("More: modeldesk history --model {model} --page {}", history.page + 1);
    }
    Ok(())
}

fn new_session(config: &AppConfig, gateway: HttpGateway) -> WorkflowSession {
    let gateway: Arc<dyn ApiGateway> = Arc::new(gateway);
    WorkflowSession::new(gateway, FeatureEncoder::new(config.encoding.client_side))
}

fn request_deadline(config: &AppConfig) -> Instant {
    Instant::now()
        + config.http.connect_timeout()
        + config.http.read_timeout()
        + config.http.write_timeout()
}

/// Apply job results until the session stops waiting on the network.
fn drive(session: &mut WorkflowSession, deadline: Instant) -> Result<(), String> {
    const POLL_INTERVAL: Duration = Duration::from_millis(250);
    while matches!(
        session.state(),
        WorkflowState::FetchingSchema | WorkflowState::Submitting
    ) {
        let now = Instant::now();
        if now >= deadline {
            return Err(format!("Timed out while {}", session.state()));
        }
        for outcome in session.wait(POLL_INTERVAL.min(deadline - now)) {
            if let PollOutcome::Dropped { response, .. } = outcome {
                tracing::debug!(?response, "Ignored stale response");
            }
        }
    }
    Ok(())
}

fn held_error(session: &WorkflowSession) -> String {
    session
        .last_error()
        .map(|err| err.to_string())
        .unwrap_or_else(|| format!("Unexpected state: {}", session.state()))
}

fn pretty_json(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

struct Flags {
    values: Vec<(String, String)>,
    switches: Vec<String>,
}

impl Flags {
    fn parse(args: &[String], value_flags: &[&str], switch_flags: &[&str]) -> Result<Self, String> {
        let mut flags = Self {
            values: Vec::new(),
            switches: Vec::new(),
        };
        let mut idx = 0usize;
        while idx < args.len() {
            let arg = args[idx].as_str();
            if value_flags.contains(&arg) {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| format!("{arg} requires a value"))?;
                flags.values.push((arg.to_string(), value.clone()));
            } else if switch_flags.contains(&arg) {
                flags.switches.push(arg.to_string());
            } else {
                return Err(format!("Unknown argument: {arg}\n\n{}", help_text()));
            }
            idx += 1;
        }
        Ok(flags)
    }

    fn value(&self, flag: &str) -> Option<String> {
        self.values
            .iter()
            .rev()
            .find(|(name, _)| name == flag)
            .map(|(_, value)| value.clone())
    }

    fn all(&self, flag: &str) -> Vec<String> {
        self.values
            .iter()
            .filter(|(name, _)| name == flag)
            .map(|(_, value)| value.clone())
            .collect()
    }

    fn required(&self, flag: &str) -> Result<String, String> {
        self.value(flag)
            .ok_or_else(|| format!("{flag} is required\n\n{}", help_text()))
    }

    fn parsed<T: FromStr>(&self, flag: &str) -> Result<Option<T>, String> {
        self.value(flag)
            .map(|value| {
                value
                    .parse::<T>()
                    .map_err(|_| format!("Invalid {flag} value: {value}"))
            })
            .transpose()
    }

    fn required_parsed<T: FromStr>(&self, flag: &str) -> Result<T, String> {
        self.parsed(flag)?
            .ok_or_else(|| format!("{flag} is required\n\n{}", help_text()))
    }

    fn switch(&self, flag: &str) -> bool {
        self.switches.iter().any(|name| name == flag)
    }
}

fn parse_args(args: Vec<String>) -> Result<Command, String> {
    let Some((command, rest)) = args.split_first() else {
        return Err(help_text());
    };
    match command.as_str() {
        "config" => {
            let flags = Flags::parse(
                rest,
                &["--base-url", "--client-side", "--page-size", "--log-level"],
                &[],
            )?;
            Ok(Command::Config(ConfigEdits {
                base_url: flags.value("--base-url"),
                client_side: flags.parsed("--client-side")?,
                page_size: flags.parsed("--page-size")?,
                log_level: flags.value("--log-level"),
            }))
        }
        "help" | "--help" | "-h" => Err(help_text()),
        other => parse_server_command(other, rest).map(Command::Server),
    }
}

fn parse_server_command(command: &str, rest: &[String]) -> Result<ServerCommand, String> {
    match command {
        "login" => {
            let flags = Flags::parse(rest, &["--username", "--password"], &[])?;
            Ok(ServerCommand::Login {
                username: flags.required("--username")?,
                password: flags.required("--password")?,
            })
        }
        "register" => {
            let flags = Flags::parse(rest, &["--username", "--password", "--email"], &[])?;
            Ok(ServerCommand::Register {
                username: flags.required("--username")?,
                password: flags.required("--password")?,
                email: flags.value("--email"),
            })
        }
        "datasets" => {
            Flags::parse(rest, &[], &[])?;
            Ok(ServerCommand::Datasets)
        }
        "upload-dataset" => {
            let flags = Flags::parse(rest, &["--file", "--name", "--description"], &[])?;
            let file = PathBuf::from(flags.required("--file")?);
            let name = match flags.value("--name") {
                Some(name) => name,
                None => file
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .map(str::to_string)
                    .ok_or_else(|| "--name is required".to_string())?,
            };
            Ok(ServerCommand::UploadDataset {
                file,
                name,
                description: flags.value("--description"),
            })
        }
        "update-dataset" => {
            let flags = Flags::parse(rest, &["--id", "--name", "--description"], &[])?;
            let name = flags.value("--name");
            let description = flags.value("--description");
            if name.is_none() && description.is_none() {
                return Err("--name or --description is required".to_string());
            }
            Ok(ServerCommand::UpdateDataset {
                id: flags.required_parsed("--id")?,
                name,
                description,
            })
        }
        "delete-dataset" => {
            let flags = Flags::parse(rest, &["--id"], &[])?;
            Ok(ServerCommand::DeleteDataset {
                id: flags.required_parsed("--id")?,
            })
        }
        "models" => {
            Flags::parse(rest, &[], &[])?;
            Ok(ServerCommand::Models)
        }
        "export-model" => {
            let flags = Flags::parse(rest, &["--model", "--out"], &[])?;
            Ok(ServerCommand::ExportModel {
                id: flags.required_parsed("--model")?,
                out: flags.value("--out").map(PathBuf::from),
            })
        }
        "schema" => {
            let flags = Flags::parse(rest, &["--model"], &[])?;
            Ok(ServerCommand::Schema {
                model: flags.required_parsed("--model")?,
            })
        }
        "predict" => {
            let flags = Flags::parse(rest, &["--model", "--value"], &[])?;
            let mut inputs = RawInputs::new();
            for pair in flags.all("--value") {
                let (column, value) = pair
                    .split_once('=')
                    .ok_or_else(|| format!("Expected column=value, got {pair}"))?;
                inputs.insert(column.trim().to_string(), value.to_string());
            }
            Ok(ServerCommand::Predict {
                model: flags.required_parsed("--model")?,
                inputs,
            })
        }
        "train" => {
            let flags = Flags::parse(
                rest,
                &[
                    "--dataset",
                    "--target",
                    "--type",
                    "--name",
                    "--description",
                    "--drop",
                ],
                &[],
            )?;
            let drop_columns = flags
                .all("--drop")
                .iter()
                .flat_map(|value| value.split(','))
                .map(str::to_string)
                .collect();
            Ok(ServerCommand::Train {
                form: TrainingForm {
                    dataset_id: flags.value("--dataset").unwrap_or_default(),
                    target_column: flags.value("--target").unwrap_or_default(),
                    model_type: flags.value("--type").unwrap_or_default(),
                    name: flags.value("--name").unwrap_or_default(),
                    description: flags.value("--description"),
                    drop_columns,
                },
            })
        }
        "history" => {
            let flags = Flags::parse(rest, &["--model", "--page", "--per-page"], &[])?;
            Ok(ServerCommand::History {
                model: flags.required_parsed("--model")?,
                page: flags.parsed::<u32>("--page")?.unwrap_or(1).max(1),
                per_page: flags.parsed("--per-page")?,
            })
        }
        "profile" => {
            Flags::parse(rest, &[], &[])?;
            Ok(ServerCommand::Profile)
        }
        "delete-account" => {
            let flags = Flags::parse(rest, &[], &["--yes"])?;
            if !flags.switch("--yes") {
                return Err("Refusing to delete the account without --yes".to_string());
            }
            Ok(ServerCommand::DeleteAccount)
        }
        unknown => Err(format!("Unknown command: {unknown}\n\n{}", help_text())),
    }
}

fn help_text() -> String {
    let model_types = ModelType::ALL
        .iter()
        .map(|kind| kind.as_str())
        .collect::<Vec<_>>()
        .join(" | ");
    [
        "modeldesk".to_string(),
        String::new(),
        "Usage:".to_string(),
        "  modeldesk config [--base-url <url>] [--client-side <true|false>] [--page-size <n>]".to_string(),
        "                   [--log-level <filter>]".to_string(),
        "  modeldesk login --username <name> --password <password>".to_string(),
        "  modeldesk register --username <name> --password <password> [--email <email>]".to_string(),
        "  modeldesk datasets".to_string(),
        "  modeldesk upload-dataset --file <data.csv> [--name <name>] [--description <text>]".to_string(),
        "  modeldesk update-dataset --id <id> [--name <name>] [--description <text>]".to_string(),
        "  modeldesk delete-dataset --id <id>".to_string(),
        "  modeldesk models".to_string(),
        "  modeldesk export-model --model <id> [--out <path>] (default: exports dir)".to_string(),
        "  modeldesk schema --model <id>".to_string(),
        "  modeldesk predict --model <id> --value <column>=<value> [--value ...]".to_string(),
        "  modeldesk train --dataset <id> --target <column> --type <model type> --name <name>".to_string(),
        "                  [--description <text>] [--drop <column>[,<column>...]]".to_string(),
        "  modeldesk history --model <id> [--page <n>] [--per-page <n>]".to_string(),
        "  modeldesk profile".to_string(),
        "  modeldesk delete-account --yes".to_string(),
        String::new(),
        format!("Model types: {model_types}"),
        format!(
            "Environment: {} (bearer token), {} (server), {} (log filter)",
            modeldesk::api::TOKEN_ENV,
            config::BASE_URL_ENV,
            logging::LOG_FILTER_ENV
        ),
    ]
    .join("\n")
}
