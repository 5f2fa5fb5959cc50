use clap::CommandFactory;

use super::*;

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn parses_login() {
    let cli = Cli::try_parse_from(["escuela", "login", "--email", "a@x.com", "--password", "pw"]).unwrap();
    assert!(matches!(cli.command, Command::Login { ref email, .. } if email == "a@x.com"));
}

#[test]
fn parses_global_overrides() {
    let cli = Cli::try_parse_from(["escuela", "--api-url", "http://x.test/api", "whoami"]).unwrap();
    assert_eq!(cli.api_url.as_deref(), Some("http://x.test/api"));
    assert!(matches!(cli.command, Command::Whoami));
}

#[test]
fn contabilidad_defaults_to_all_methods() {
    let cli = Cli::try_parse_from(["escuela", "contabilidad", "--periodo", "2024-03"]).unwrap();
    let Command::Contabilidad(args) = cli.command else {
        panic!("expected contabilidad");
    };
    assert_eq!(args.periodo, "2024-03");
    assert_eq!(args.metodo_pago, accounting::ALL_METHODS);
    assert_eq!(args.tipo, None);
}

#[test]
fn unauthorized_api_error_asks_for_login() {
    let err = CliError::from(ApiError::Status { status: 401, message: Some("Token inválido".into()) });
    assert!(matches!(err, CliError::NotAuthenticated));
}

#[test]
fn api_error_prefers_server_message() {
    let err = CliError::from(ApiError::Status { status: 500, message: Some("Falla interna".into()) });
    assert_eq!(err.to_string(), "Falla interna");
}

#[test]
fn measurement_errors_use_their_fallback() {
    let err = measurement_error(ResourceError::Api(ApiError::Status { status: 400, message: None }));
    assert_eq!(err.to_string(), measurements::ERROR_FALLBACK_MESSAGE);
}

#[test]
fn parses_export_with_and_without_path() {
    let cli = Cli::try_parse_from(["escuela", "contabilidad", "--exportar"]).unwrap();
    let Command::Contabilidad(args) = cli.command else {
        panic!("expected contabilidad");
    };
    assert_eq!(args.exportar, Some(None));

    let cli = Cli::try_parse_from(["escuela", "contabilidad", "--exportar", "marzo.xlsx"]).unwrap();
    let Command::Contabilidad(args) = cli.command else {
        panic!("expected contabilidad");
    };
    assert_eq!(args.exportar, Some(Some(PathBuf::from("marzo.xlsx"))));

    let cli = Cli::try_parse_from(["escuela", "contabilidad"]).unwrap();
    let Command::Contabilidad(args) = cli.command else {
        panic!("expected contabilidad");
    };
    assert_eq!(args.exportar, None);
}

#[test]
fn failed_login_prints_the_server_message() {
    let err = CliError::from(SessionError::Rejected { status: 401, message: "Credenciales inválidas".into() });
    assert_eq!(error_line(&err), "error: Credenciales inválidas");
}

#[test]
fn missing_session_prints_plain_hint() {
    let line = error_line(&CliError::NotAuthenticated);
    assert_eq!(line, "error: no hay sesión activa; ejecuta `escuela login`");
    assert!(!line.contains("NotAuthenticated"));
}
