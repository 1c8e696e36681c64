#[cfg(test)]
mod tests {
    use anyhow::{anyhow, Result};
    use command_modules::{
        App, AppBuilder, AppConfig, Cancelled, Command, Error, MemoryStore, Module, OptionGroup,
        OptionSpec, OptionValue, RegistrationError, Settings, ValueType, PROFILES,
    };
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    const APP: &str = "tool";

    fn credentials_group() -> Arc<OptionGroup> {
        OptionGroup::new("credentials")
            .option(OptionSpec::new("email", ValueType::String).alias("e").alias("email"))
            .build()
    }

    fn server_group() -> Arc<OptionGroup> {
        OptionGroup::new("server")
            .option(OptionSpec::new("url", ValueType::Uri).alias("url"))
            .build()
    }

    fn record(log: &Log, entry: &str) {
        log.lock().unwrap().push(entry.to_string());
    }

    fn recording(name: &str, log: &Log) -> Module {
        let log = Arc::clone(log);
        let entry = name.to_string();
        Module::new(name, move |_settings: &mut Settings| {
            record(&log, &entry);
            Ok(())
        })
    }

    // Command `c` requires login and cdn; both depend on resolve-url
    fn builder(log: &Log) -> AppBuilder {
        let body_log = Arc::clone(log);
        App::builder(AppConfig::new(APP, "unused"))
            .store(MemoryStore::new())
            .module(recording("resolve-url", log).uses(server_group()))
            .module(
                recording("login", log)
                    .depends_on("resolve-url")
                    .uses(credentials_group()),
            )
            .module(recording("cdn", log).depends_on("resolve-url"))
            .command(
                Command::new("c", move |settings: &mut Settings| {
                    let email = settings.string("email")?.unwrap_or("-").to_string();
                    record(&body_log, &format!("body:{email}"));
                    Ok(0)
                })
                .requires("login")
                .requires("cdn")
                .example(&["c", "--email", "a@b.com"]),
            )
    }

    fn app(log: &Log) -> App {
        builder(log).build().expect("app should build")
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    // Test the full pipeline ordering
    #[test]
    fn test_modules_run_in_dependency_order_once() {
        let log = Log::default();
        let mut app = app(&log);

        let code = app.dispatch([APP, "c", "--email", "a@b.com"]);

        assert_eq!(code, 0);
        assert_eq!(
            entries(&log),
            vec!["resolve-url", "login", "cdn", "body:a@b.com"]
        );
    }

    #[test]
    fn test_shape_includes_transitive_module_groups() {
        let log = Log::default();
        let app = app(&log);
        let shape = app.shape("c").unwrap();

        let ids: Vec<&str> = shape.groups().iter().map(|g| g.id()).collect();
        assert_eq!(
            ids,
            vec!["server", "credentials", "profile-selection", "profile-storage"]
        );
        let names: Vec<&str> = shape.options().map(OptionSpec::name).collect();
        assert_eq!(
            names,
            vec!["url", "email", PROFILES, "store_profile_as", "add_profile_as"]
        );
    }

    #[test]
    fn test_store_profile_skips_modules_and_body() -> Result<()> {
        let log = Log::default();
        let mut app = app(&log);

        let code = app.dispatch([APP, "c", "--email", "a@b.com", "--store-profile-as", "work"]);

        assert_eq!(code, 0);
        assert!(entries(&log).is_empty());
        let profile = app.profiles().load("work")?;
        assert_eq!(
            profile.data.value("credentials", "email"),
            Some(&serde_json::json!("a@b.com"))
        );
        assert!(profile.data.group("profile-storage").is_none());
        Ok(())
    }

    #[test]
    fn test_store_reports_cancel_to_callers() -> Result<()> {
        let log = Log::default();
        let mut app = app(&log);

        let mut settings = Settings::new(Arc::clone(app.shape("c").unwrap()));
        settings.set("store_profile_as", OptionValue::String("work".to_string()))?;
        let err = app.execute("c", settings).unwrap_err();

        assert!(err.is_cancel());
        assert!(app.profiles().exists("work")?);
        Ok(())
    }

    #[test]
    fn test_add_profile_merges() -> Result<()> {
        let log = Log::default();
        let mut app = app(&log);

        assert_eq!(app.dispatch([APP, "c", "--email", "a@b.com", "--store-profile-as", "p"]), 0);
        assert_eq!(
            app.dispatch([APP, "c", "--url", "https://x.example/", "--add-profile-as", "p"]),
            0
        );

        let profile = app.profiles().load("p")?;
        assert!(profile.data.value("credentials", "email").is_some());
        assert!(profile.data.value("server", "url").is_some());

        assert_eq!(
            app.dispatch([APP, "c", "--url", "https://y.example/", "--store-profile-as", "p"]),
            0
        );
        let profile = app.profiles().load("p")?;
        assert!(profile.data.value("credentials", "email").is_none());
        assert!(entries(&log).is_empty());
        Ok(())
    }

    #[test]
    fn test_missing_profile_runs_nothing() {
        let log = Log::default();
        let mut app = app(&log);

        let code = app.dispatch([APP, "c", "--profile", "work"]);

        assert_eq!(code, 1);
        assert!(entries(&log).is_empty());

        let mut settings = Settings::new(Arc::clone(app.shape("c").unwrap()));
        settings
            .set(PROFILES, OptionValue::StringList(vec!["work".to_string()]))
            .unwrap();
        let err = app.execute("c", settings).unwrap_err();
        assert!(matches!(err, Error::ProfileNotFound(name) if name == "work"));
    }

    #[test]
    fn test_profile_values_fill_command_line_gaps() {
        let log = Log::default();
        let mut app = app(&log);

        app.dispatch([APP, "c", "--email", "stored@b.com", "--store-profile-as", "work"]);
        assert_eq!(app.dispatch([APP, "c", "-p", "work"]), 0);
        assert_eq!(app.dispatch([APP, "c", "-p", "work", "-e", "cli@b.com"]), 0);

        let bodies: Vec<String> = entries(&log)
            .into_iter()
            .filter(|entry| entry.starts_with("body:"))
            .collect();
        assert_eq!(bodies, vec!["body:stored@b.com", "body:cli@b.com"]);
    }

    #[test]
    fn test_default_profile_applies_implicitly() {
        let log = Log::default();
        let mut app = app(&log);

        app.dispatch([APP, "c", "--email", "default@b.com", "--store-profile-as", "home"]);
        assert_eq!(app.dispatch([APP, "profile", "select", "home"]), 0);
        assert_eq!(app.dispatch([APP, "profile", "current"]), 0);
        assert_eq!(app.dispatch([APP, "c"]), 0);

        assert_eq!(app.dispatch([APP, "profile", "unselect"]), 0);
        assert_eq!(app.dispatch([APP, "c"]), 0);

        let bodies: Vec<String> = entries(&log)
            .into_iter()
            .filter(|entry| entry.starts_with("body:"))
            .collect();
        assert_eq!(bodies, vec!["body:default@b.com", "body:-"]);
    }

    #[test]
    fn test_implicit_profile_can_be_disabled() -> Result<()> {
        let log = Log::default();
        let body_log = Arc::clone(&log);
        let mut app = builder(&log)
            .command(
                Command::new("plain", move |settings: &mut Settings| {
                    let email = settings.string("email")?.unwrap_or("-").to_string();
                    record(&body_log, &format!("plain:{email}"));
                    Ok(0)
                })
                .uses(credentials_group())
                .implicit_profile(false),
            )
            .build()?;

        app.dispatch([APP, "c", "--email", "a@b.com", "--store-profile-as", "home"]);
        app.dispatch([APP, "profile", "select", "home"]);
        assert_eq!(app.dispatch([APP, "plain"]), 0);
        assert_eq!(entries(&log), vec!["plain:-"]);
        Ok(())
    }

    #[test]
    fn test_profile_management_commands() -> Result<()> {
        let log = Log::default();
        let mut app = app(&log);

        assert_eq!(app.dispatch([APP, "profile", "list"]), 0);
        assert_eq!(app.dispatch([APP, "profile", "select", "ghost"]), 1);
        assert_eq!(app.dispatch([APP, "profile", "delete", "ghost"]), 1);
        assert_eq!(app.dispatch([APP, "profile", "show", "ghost"]), 1);

        app.dispatch([APP, "c", "--email", "a@b.com", "--store-profile-as", "work"]);
        assert_eq!(app.dispatch([APP, "profile", "show", "work"]), 0);
        assert_eq!(app.dispatch([APP, "profile", "select", "work"]), 0);
        assert_eq!(app.dispatch([APP, "profile", "list"]), 0);
        assert_eq!(app.dispatch([APP, "profile", "delete", "work"]), 0);

        assert!(app.profiles().list()?.is_empty());
        assert_eq!(app.profiles().default_profile()?, None);
        Ok(())
    }

    // Test failure handling
    #[test]
    fn test_module_failure_stops_pipeline() {
        let log = Log::default();
        let body_log = Arc::clone(&log);
        let mut app = App::builder(AppConfig::new(APP, "unused"))
            .store(MemoryStore::new())
            .module(recording("resolve-url", &log))
            .module(
                Module::new("login", |_settings: &mut Settings| Err(anyhow!("bad credentials")))
                    .depends_on("resolve-url"),
            )
            .module(recording("cdn", &log))
            .command(
                Command::new("c", move |_settings: &mut Settings| {
                    record(&body_log, "body");
                    Ok(0)
                })
                .requires("login")
                .requires("cdn"),
            )
            .build()
            .unwrap();

        assert_eq!(app.dispatch([APP, "c"]), 1);
        assert_eq!(entries(&log), vec!["resolve-url"]);

        let settings = Settings::new(Arc::clone(app.shape("c").unwrap()));
        let err = app.execute("c", settings).unwrap_err();
        assert!(matches!(err, Error::ModuleFailed { ref module, .. } if module == "login"));
        assert!(!err.is_cancel());
    }

    #[test]
    fn test_module_cancel_is_silent_success() {
        let log = Log::default();
        let body_log = Arc::clone(&log);
        let mut app = App::builder(AppConfig::new(APP, "unused"))
            .store(MemoryStore::new())
            .module(Module::new("confirm", |_settings: &mut Settings| {
                Err(Cancelled.into())
            }))
            .command(
                Command::new("c", move |_settings: &mut Settings| {
                    record(&body_log, "body");
                    Ok(0)
                })
                .requires("confirm"),
            )
            .build()
            .unwrap();

        assert_eq!(app.dispatch([APP, "c"]), 0);
        assert!(entries(&log).is_empty());
    }

    #[test]
    fn test_body_result_becomes_exit_code() {
        let mut app = App::builder(AppConfig::new(APP, "unused"))
            .store(MemoryStore::new())
            .command(Command::new("three", |_settings: &mut Settings| Ok(3)))
            .command(Command::new("fail", |_settings: &mut Settings| {
                Err(anyhow!("upload failed"))
            }))
            .build()
            .unwrap();

        assert_eq!(app.dispatch([APP, "three"]), 3);
        assert_eq!(app.dispatch([APP, "fail"]), 1);

        let settings = Settings::new(Arc::clone(app.shape("fail").unwrap()));
        let err = app.execute("fail", settings).unwrap_err();
        assert!(matches!(err, Error::CommandFailed(_)));
    }

    #[test]
    fn test_required_options_may_come_from_profiles() {
        let group = OptionGroup::new("account")
            .option(
                OptionSpec::new("email", ValueType::String)
                    .alias("email")
                    .required(),
            )
            .option(
                OptionSpec::new("retries", ValueType::Integer)
                    .default_value(OptionValue::Integer(2)),
            )
            .build();
        let seen = Log::default();
        let body_seen = Arc::clone(&seen);
        let mut app = App::builder(AppConfig::new(APP, "unused"))
            .store(MemoryStore::new())
            .command(
                Command::new("send", move |settings: &mut Settings| {
                    let retries = settings.integer("retries")?.unwrap_or_default();
                    record(&body_seen, &format!("retries:{retries}"));
                    Ok(0)
                })
                .uses(group),
            )
            .build()
            .unwrap();

        assert_eq!(app.dispatch([APP, "send"]), 1);
        assert_eq!(app.dispatch([APP, "send", "--email", "a@b.com", "--store-profile-as", "w"]), 0);
        assert_eq!(app.dispatch([APP, "send", "--profile", "w"]), 0);
        assert_eq!(app.dispatch([APP, "send", "--profile", "w", "--retries", "5"]), 0);

        assert_eq!(entries(&seen), vec!["retries:2", "retries:5"]);
        let profile = app.profiles().load("w").unwrap();
        assert!(profile.data.value("account", "retries").is_none());
    }

    #[test]
    fn test_negative_integers_take_separate_values() {
        let group = OptionGroup::new("retry")
            .option(OptionSpec::new("timeout", ValueType::Integer).alias("n").alias("timeout"))
            .build();
        let seen = Log::default();
        let body_seen = Arc::clone(&seen);
        let mut app = App::builder(AppConfig::new(APP, "unused"))
            .store(MemoryStore::new())
            .command(
                Command::new("wait", move |settings: &mut Settings| {
                    record(&body_seen, &format!("{:?}", settings.integer("timeout")?));
                    Ok(0)
                })
                .uses(group),
            )
            .build()
            .unwrap();

        assert_eq!(app.dispatch([APP, "wait", "--timeout", "-5"]), 0);
        assert_eq!(app.dispatch([APP, "wait", "-n", "-7"]), 0);
        assert_eq!(app.dispatch([APP, "wait", "--timeout=-9"]), 0);
        assert_eq!(entries(&seen), vec!["Some(-5)", "Some(-7)", "Some(-9)"]);
    }

    #[test]
    fn test_usage_errors_and_help() {
        let log = Log::default();
        let mut app = app(&log);

        assert_eq!(app.dispatch([APP, "c", "--help"]), 0);
        assert_eq!(app.dispatch([APP, "c", "--no-such-flag"]), 2);
        assert_eq!(app.dispatch([APP, "c", "--url", "not a url"]), 1);
        assert!(entries(&log).is_empty());
    }

    // Test registration-time validation
    #[test]
    fn test_registration_errors() {
        let log = Log::default();

        let unknown = builder(&log)
            .command(Command::new("d", |_settings: &mut Settings| Ok(0)).requires("upload"))
            .build();
        let unknown = unknown.err().expect("unknown module should be rejected");
        assert_eq!(
            unknown,
            RegistrationError::UnknownModule {
                command: "d".to_string(),
                module: "upload".to_string(),
            }
        );
        assert_eq!(unknown.to_string(), "command 'd' requires unknown module 'upload'");

        let duplicate = builder(&log)
            .command(Command::new("c", |_settings: &mut Settings| Ok(0)))
            .build();
        assert!(matches!(duplicate, Err(RegistrationError::DuplicateCommand(_))));

        let reserved = builder(&log)
            .command(Command::new("profile", |_settings: &mut Settings| Ok(0)))
            .build();
        assert!(matches!(reserved, Err(RegistrationError::ReservedCommand(_))));

        let verbose = OptionGroup::new("noisy")
            .option(OptionSpec::new("verbose", ValueType::Boolean))
            .build();
        let clash = builder(&log)
            .command(Command::new("d", |_settings: &mut Settings| Ok(0)).uses(verbose))
            .build();
        assert!(matches!(clash, Err(RegistrationError::ReservedOption(_))));

        let cyclic = App::builder(AppConfig::new(APP, "unused"))
            .store(MemoryStore::new())
            .module(recording("a", &log).depends_on("b"))
            .module(recording("b", &log).depends_on("a"))
            .build();
        assert!(matches!(cyclic, Err(RegistrationError::CyclicDependency(_))));

        let conflicting = App::builder(AppConfig::new(APP, "unused"))
            .store(MemoryStore::new())
            .module(recording("m", &log).uses(
                OptionGroup::new("credentials")
                    .option(OptionSpec::new("email", ValueType::Uuid))
                    .build(),
            ))
            .command(
                Command::new("d", |_settings: &mut Settings| Ok(0))
                    .uses(
                        OptionGroup::new("mail")
                            .option(OptionSpec::new("email", ValueType::String))
                            .build(),
                    )
                    .requires("m"),
            )
            .build();
        assert!(matches!(
            conflicting,
            Err(RegistrationError::ConflictingOption { .. })
        ));

        assert!(entries(&log).is_empty());
    }

    #[test]
    fn test_cli_is_consistent() {
        let log = Log::default();
        app(&log).cli().debug_assert();
    }
}
