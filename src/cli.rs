use std::sync::Arc;

use anyhow::{bail, Context, Result};
use command_modules::{
    App, AppBuilder, AppConfig, Command, Module, OptionGroup, OptionSpec, OptionValue, RegistrationError,
    Settings, ValueType,
};
use url::Url;

pub const APP_NAME: &str = "command-modules";

const DEFAULT_SERVER: &str = "https://api.example.com/";

// Endpoint resolved from the server URL
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub api: Url,
}

// Session established by the login module
#[derive(Debug, Clone)]
pub struct Session {
    pub email: String,
    pub tenant: Option<String>,
    pub api: Url,
}

fn server_group() -> Arc<OptionGroup> {
    let default = Url::parse(DEFAULT_SERVER).map(OptionValue::Uri).ok();
    let mut url = OptionSpec::new("url", ValueType::Uri)
        .alias("u")
        .alias("url")
        .describe("Base URL of the platform");
    if let Some(default) = default {
        url = url.default_value(default);
    }
    OptionGroup::new("server").option(url).build()
}

fn endpoint_group() -> Arc<OptionGroup> {
    OptionGroup::new("endpoint")
        .option(OptionSpec::new("api_url", ValueType::Uri).hidden())
        .build()
}

fn credentials_group() -> Arc<OptionGroup> {
    OptionGroup::new("credentials")
        .describe("Account used to log in")
        .option(
            OptionSpec::new("email", ValueType::String)
                .alias("e")
                .alias("email")
                .describe("Account email")
                .required(),
        )
        .option(
            OptionSpec::new("password", ValueType::String)
                .alias("password")
                .describe("Account password (never stored in profiles)")
                .not_persisted(),
        )
        .option(
            OptionSpec::new("tenant", ValueType::String)
                .alias("t")
                .alias("tenant")
                .describe("Tenant to act on"),
        )
        .build()
}

fn target_group() -> Arc<OptionGroup> {
    OptionGroup::new("target")
        .option(
            OptionSpec::new("id", ValueType::Uuid)
                .positional(0)
                .describe("Identifier of the item")
                .required(),
        )
        .option(
            OptionSpec::new("fields", ValueType::StringList)
                .alias("f")
                .alias("fields")
                .describe("Fields to include"),
        )
        .build()
}

fn resolve_url(settings: &mut Settings) -> Result<()> {
    let base = settings.require_uri("url")?.clone();
    if base.cannot_be_a_base() {
        bail!("'{base}' cannot be used as a base URL");
    }
    let api = base
        .join("api/v1/")
        .with_context(|| format!("failed to derive API URL from '{base}'"))?;

    settings.set("api_url", OptionValue::Uri(api.clone()))?;
    settings.attach(Endpoint { api });
    Ok(())
}

fn login(settings: &mut Settings) -> Result<()> {
    let email = settings.require_string("email")?.to_string();
    if !email.contains('@') {
        bail!("'{email}' is not a valid email address");
    }
    let endpoint = settings
        .attachment::<Endpoint>()
        .cloned()
        .context("API endpoint has not been resolved")?;
    let tenant = settings.string("tenant")?.map(str::to_string);

    tracing::info!(email = email.as_str(), api = %endpoint.api, "logged in");
    settings.attach(Session {
        email,
        tenant,
        api: endpoint.api,
    });
    Ok(())
}

fn session(settings: &Settings) -> Result<&Session> {
    settings
        .attachment::<Session>()
        .context("no active session")
}

fn whoami(settings: &mut Settings) -> Result<i32> {
    let session = session(settings)?;
    match &session.tenant {
        Some(tenant) => println!("{} ({tenant}) at {}", session.email, session.api),
        None => println!("{} at {}", session.email, session.api),
    }
    Ok(0)
}

fn get(settings: &mut Settings) -> Result<i32> {
    let id = settings.require_uuid("id")?;
    let fields = settings.list("fields")?.map(|fields| fields.join(","));
    let session = session(settings)?;

    let mut url = session
        .api
        .join(&format!("items/{id}"))
        .context("failed to build item URL")?;
    if let Some(fields) = fields {
        url.query_pairs_mut().append_pair("fields", &fields);
    }
    println!("GET {url}");
    Ok(0)
}

/// Assemble the demonstration application.
///
/// # Errors
///
/// Returns a [`RegistrationError`] if the declarations are inconsistent.
pub fn build_app(config: AppConfig) -> std::result::Result<App, RegistrationError> {
    register(App::builder(config)).build()
}

// Declare the demonstration modules and commands on `builder`
fn register(builder: AppBuilder) -> AppBuilder {
    builder
        .about("Demonstration client built on command modules")
        .module(
            Module::new("resolve-url", resolve_url)
                .describe("Resolve the platform API endpoint")
                .uses(server_group())
                .uses(endpoint_group()),
        )
        .module(
            Module::new("login", login)
                .describe("Open a session for the configured account")
                .depends_on("resolve-url")
                .uses(credentials_group()),
        )
        .command(
            Command::new("whoami", whoami)
                .about("Show the logged in account")
                .requires("login")
                .example(&["whoami", "--email", "me@example.com", "--store-profile-as", "work"])
                .example(&["whoami", "--profile", "work"]),
        )
        .command(
            Command::new("get", get)
                .about("Fetch one item")
                .uses(target_group())
                .requires("login")
                .requires("resolve-url")
                .example(&["get", "6f1c2d1e-8a0b-4c4e-9a53-0d5b0e7e9f10", "--profile", "work"]),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use command_modules::MemoryStore;

    fn demo_app() -> App {
        register(App::builder(AppConfig::new(APP_NAME, "unused")))
            .store(MemoryStore::new())
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_app_registers_commands() {
        let app = demo_app();
        let names: Vec<&str> = app.command_names().collect();
        assert_eq!(names, vec!["whoami", "get"]);
    }

    #[test]
    fn test_get_exposes_module_options() {
        let app = demo_app();
        let shape = app.shape("get").unwrap();
        for option in ["id", "fields", "email", "password", "tenant", "url", "api_url"] {
            assert!(shape.contains(option), "missing {option}");
        }
    }

    #[test]
    fn test_cli_is_consistent() {
        demo_app().cli().debug_assert();
    }

    #[test]
    fn test_stored_profile_feeds_login() {
        let mut app = demo_app();
        let code = app.dispatch([
            APP_NAME,
            "whoami",
            "--email",
            "me@example.com",
            "--tenant",
            "acme",
            "--password",
            "secret",
            "--store-profile-as",
            "work",
        ]);
        assert_eq!(code, 0);

        let profile = app.profiles().load("work").unwrap();
        assert!(profile.data.value("credentials", "email").is_some());
        assert!(profile.data.value("credentials", "password").is_none());

        assert_eq!(app.dispatch([APP_NAME, "whoami", "--profile", "work"]), 0);
    }

    #[test]
    fn test_invalid_email_fails_login() {
        let mut app = demo_app();
        assert_eq!(app.dispatch([APP_NAME, "whoami", "--email", "nobody"]), 1);
    }

    #[test]
    fn test_get_requires_id() {
        let mut app = demo_app();
        assert_eq!(app.dispatch([APP_NAME, "get", "--email", "me@example.com"]), 1);
        assert_eq!(
            app.dispatch([
                APP_NAME,
                "get",
                "6f1c2d1e-8a0b-4c4e-9a53-0d5b0e7e9f10",
                "--email",
                "me@example.com",
                "--fields",
                "name,size",
            ]),
            0
        );
    }
}
