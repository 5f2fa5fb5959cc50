#[cfg(test)]
#[path = "main_test.rs"]
mod main_test;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use escuela::config::ConfigError;
use escuela::resources::accounting::{self, Period, TransactionKind, TransactionQuery};
use escuela::resources::measurements::{self, MeasurementForm};
use escuela::resources::memberships::{self, MembershipFilter};
use escuela::resources::{ResourceError, ValidationError, clients, videos};
use escuela::{ApiClient, ApiError, ClientConfig, FileStorage, HttpAuthApi, Role, Session, SessionError, SessionPhase};
use serde_json::{Value, json};
use time::OffsetDateTime;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuración inválida: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Session(#[from] SessionError),
    #[error("{0}")]
    Resource(#[from] ResourceError),
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    Server(String),
    #[error("no hay sesión activa; ejecuta `escuela login`")]
    NotAuthenticated,
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl From<ApiError> for CliError {
    fn from(err: ApiError) -> Self {
        if err.is_unauthorized() {
            Self::NotAuthenticated
        } else {
            Self::Server(err.user_message("Error al comunicarse con el servidor."))
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "escuela", about = "Admin-Escuela command-line client")]
struct Cli {
    /// Overrides `ESCUELA_API_URL`.
    #[arg(long)]
    api_url: Option<String>,

    /// Overrides `ESCUELA_STORAGE_PATH`.
    #[arg(long)]
    storage_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "ESCUELA_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Register {
        #[arg(long)]
        nombre: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "ESCUELA_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        rol: Option<String>,
    },
    Logout,
    /// Show the restored session.
    Whoami,
    /// Check whether the current user holds `role`.
    Can {
        role: String,
    },
    Clientes(ClientesCommand),
    Membresias(MembresiasCommand),
    Contabilidad(ContabilidadArgs),
    Mediciones(MedicionesCommand),
    Videos(VideosCommand),
}

#[derive(Args, Debug)]
struct ClientesCommand {
    #[command(subcommand)]
    command: ClientesSubcommand,
}

#[derive(Subcommand, Debug)]
enum ClientesSubcommand {
    List {
        #[arg(long, default_value = "")]
        buscar: String,
    },
    Read {
        id: String,
    },
    Create {
        #[arg(long)]
        data: String,
    },
    Update {
        id: String,
        #[arg(long)]
        data: String,
    },
}

#[derive(Args, Debug)]
struct MembresiasCommand {
    #[command(subcommand)]
    command: MembresiasSubcommand,
}

#[derive(Subcommand, Debug)]
enum MembresiasSubcommand {
    List {
        /// `todas` or `vencidas`.
        #[arg(long, default_value = "todas")]
        filtro: String,
        #[arg(long, default_value = "")]
        buscar: String,
    },
    Delete {
        id: String,
    },
}

#[derive(Args, Debug)]
struct ContabilidadArgs {
    /// `YYYY-MM` or `YYYY-Www`; empty for all dates.
    #[arg(long, default_value = "")]
    periodo: String,
    /// `ingreso` or `egreso`.
    #[arg(long)]
    tipo: Option<String>,
    #[arg(long, default_value = accounting::ALL_METHODS)]
    metodo_pago: String,
    /// Also save the report as `.xlsx`; defaults to
    /// `Reporte_Contabilidad_<fecha>.xlsx` in the current directory.
    #[arg(long)]
    exportar: Option<Option<PathBuf>>,
}

#[derive(Args, Debug)]
struct MedicionesCommand {
    #[command(subcommand)]
    command: MedicionesSubcommand,
}

#[derive(Subcommand, Debug)]
enum MedicionesSubcommand {
    List {
        #[arg(long, default_value = "")]
        buscar: String,
    },
    Create {
        #[arg(long)]
        data: String,
    },
    Update {
        id: String,
        #[arg(long)]
        data: String,
    },
    Categorias,
    Entrenadores,
}

#[derive(Args, Debug)]
struct VideosCommand {
    #[command(subcommand)]
    command: VideosSubcommand,
}

#[derive(Subcommand, Debug)]
enum VideosSubcommand {
    List,
    Url { titulo: Option<String> },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", error_line(&err));
            ExitCode::FAILURE
        }
    }
}

/// What the user sees on stderr when a command fails.
fn error_line(err: &CliError) -> String {
    format!("error: {err}")
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_config(cli.api_url, cli.storage_path)?;

    let storage = Arc::new(FileStorage::new(config.storage_path.clone()));
    let auth = Arc::new(HttpAuthApi::new(&config)?);
    let session = Session::new(storage, auth);
    let api = ApiClient::new(&config, session.clone())?;

    let phase = session.restore().await;
    tracing::debug!(?phase, api_url = config.api_url.as_str(), "session restored");

    match cli.command {
        Command::Login { email, password } => {
            let user = session.login(&email, &password).await?;
            print_json(&json!({ "usuario": user }))
        }
        Command::Register { nombre, email, password, rol } => {
            let rol = rol.as_deref().and_then(Role::parse);
            let user = session.register(&nombre, &email, &password, rol).await?;
            print_json(&json!({ "usuario": user }))
        }
        Command::Logout => {
            session.logout();
            println!("sesión cerrada");
            Ok(())
        }
        Command::Whoami => run_whoami(&session),
        Command::Can { role } => {
            println!("{}", session.has_permission(role.as_str()));
            Ok(())
        }
        Command::Clientes(cmd) => run_clientes(&api, cmd).await,
        Command::Membresias(cmd) => run_membresias(&api, cmd).await,
        Command::Contabilidad(args) => run_contabilidad(&api, args).await,
        Command::Mediciones(cmd) => run_mediciones(&api, cmd).await,
        Command::Videos(cmd) => run_videos(cmd),
    }
}

fn load_config(api_url: Option<String>, storage_path: Option<PathBuf>) -> Result<ClientConfig, CliError> {
    let mut config = ClientConfig::from_env()?;
    if let Some(url) = api_url {
        config = config.with_api_url(&url)?;
    }
    if let Some(path) = storage_path {
        config.storage_path = path;
    }
    Ok(config)
}

fn run_whoami(session: &Session) -> Result<(), CliError> {
    let snapshot = session.snapshot();
    let phase = match snapshot.phase {
        SessionPhase::Unauthenticated => "unauthenticated",
        SessionPhase::Authenticating => "authenticating",
        SessionPhase::Authenticated => "authenticated",
    };
    print_json(&json!({ "estado": phase, "usuario": snapshot.user }))
}

fn require_session(api: &ApiClient) -> Result<(), CliError> {
    if api.session().is_authenticated() { Ok(()) } else { Err(CliError::NotAuthenticated) }
}

async fn run_clientes(api: &ApiClient, cmd: ClientesCommand) -> Result<(), CliError> {
    match cmd.command {
        ClientesSubcommand::List { buscar } => {
            require_session(api)?;
            let all = clients::list_clients(api).await?;
            let found = clients::filter_by_name(&all, &buscar);
            print_json(&serde_json::to_value(found)?)
        }
        ClientesSubcommand::Read { id } => {
            require_session(api)?;
            let client = clients::get_client(api, &id).await?;
            print_json(&serde_json::to_value(client)?)
        }
        ClientesSubcommand::Create { data } => {
            let form = serde_json::from_str::<clients::ClientForm>(&data)?;
            let created = clients::create_client(api, &form).await.map_err(resource_error)?;
            print_json(&created)
        }
        ClientesSubcommand::Update { id, data } => {
            require_session(api)?;
            let form = serde_json::from_str::<clients::ClientForm>(&data)?;
            let updated = clients::update_client(api, &id, &form).await.map_err(resource_error)?;
            print_json(&updated)
        }
    }
}

async fn run_membresias(api: &ApiClient, cmd: MembresiasCommand) -> Result<(), CliError> {
    require_session(api)?;
    match cmd.command {
        MembresiasSubcommand::List { filtro, buscar } => {
            let filter = MembershipFilter::parse(&filtro).ok_or(ValidationError("Filtro inválido. Usa todas o vencidas."))?;
            let all = memberships::list_memberships(api).await?;
            let now = OffsetDateTime::now_utc();
            let rows: Vec<Value> = memberships::filter_memberships(&all, filter, &buscar, now)
                .into_iter()
                .map(|m| {
                    json!({
                        "_id": m.id,
                        "cliente": m.client_name(),
                        "duracion": m.duracion,
                        "sesionesRestantes": m.sesiones_restantes,
                        "precio": m.precio,
                        "restante": m.remaining(now).to_string(),
                    })
                })
                .collect();
            print_json(&Value::Array(rows))
        }
        MembresiasSubcommand::Delete { id } => {
            memberships::delete_membership(api, &id).await?;
            println!("membresía eliminada");
            Ok(())
        }
    }
}

async fn run_contabilidad(api: &ApiClient, args: ContabilidadArgs) -> Result<(), CliError> {
    require_session(api)?;
    let kind = match args.tipo.as_deref().map(str::trim) {
        None | Some("") => None,
        Some("ingreso") => Some(TransactionKind::Ingreso),
        Some("egreso") => Some(TransactionKind::Egreso),
        Some(_) => return Err(ValidationError("Tipo inválido. Usa ingreso o egreso.").into()),
    };
    let query = TransactionQuery {
        period: Some(Period::parse(&args.periodo)?),
        kind,
        payment_method: Some(args.metodo_pago),
    };
    let transactions = accounting::list_transactions(api, &query).await?;
    let mut report = json!({
        "transacciones": accounting::report_rows(&transactions),
        "totales": accounting::totals(&transactions),
    });
    if let Some(target) = args.exportar {
        let path = target.unwrap_or_else(|| {
            PathBuf::from(accounting::export_file_name(OffsetDateTime::now_utc().date()))
        });
        accounting::export_report(&path, &transactions)?;
        report["archivo"] = json!(path.display().to_string());
    }
    print_json(&report)
}

async fn run_mediciones(api: &ApiClient, cmd: MedicionesCommand) -> Result<(), CliError> {
    match cmd.command {
        MedicionesSubcommand::List { buscar } => {
            require_session(api)?;
            let all = measurements::list_measurements(api).await?;
            let rows: Vec<Value> = measurements::filter_by_athlete(&all, &buscar)
                .into_iter()
                .map(|m| {
                    let score = m.weighted_score();
                    json!({
                        "_id": m.id,
                        "porrista": m.athlete_name(),
                        "categoria": m.categoria,
                        "posicion": m.posicion,
                        "ponderacion": format!("{score:.2}"),
                        "pasaNivel": measurements::passes_level(score),
                    })
                })
                .collect();
            print_json(&Value::Array(rows))
        }
        MedicionesSubcommand::Create { data } => {
            require_session(api)?;
            let form = serde_json::from_str::<MeasurementForm>(&data)?;
            let created = measurements::create_measurement(api, &form).await.map_err(measurement_error)?;
            print_json(&created)
        }
        MedicionesSubcommand::Update { id, data } => {
            require_session(api)?;
            let form = serde_json::from_str::<MeasurementForm>(&data)?;
            let updated = measurements::update_measurement(api, &id, &form).await.map_err(measurement_error)?;
            print_json(&updated)
        }
        MedicionesSubcommand::Categorias => print_json(&json!(measurements::categories())),
        MedicionesSubcommand::Entrenadores => {
            require_session(api)?;
            let coaches = measurements::list_coaches(api).await?;
            let rows: Vec<Value> = coaches
                .iter()
                .map(|c| json!({ "_id": c.id, "nombre": c.nombre, "equipos": c.specialties() }))
                .collect();
            print_json(&Value::Array(rows))
        }
    }
}

fn run_videos(cmd: VideosCommand) -> Result<(), CliError> {
    match cmd.command {
        VideosSubcommand::List => print_json(&serde_json::to_value(videos::CATALOGUE)?),
        VideosSubcommand::Url { titulo } => {
            println!("{}", videos::video_url(titulo.as_deref()));
            Ok(())
        }
    }
}

fn resource_error(err: ResourceError) -> CliError {
    match err {
        ResourceError::Api(err) => err.into(),
        other => other.into(),
    }
}

fn measurement_error(err: ResourceError) -> CliError {
    match err {
        ResourceError::Api(err) if !err.is_unauthorized() => {
            CliError::Server(err.user_message(measurements::ERROR_FALLBACK_MESSAGE))
        }
        other => resource_error(other),
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
