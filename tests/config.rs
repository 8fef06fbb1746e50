use databag::bag_impl::{ConflictPolicy, MergeOptions};
use databag::config::{Settings, init_tracing};
use databag::error::DataBagError;
use databag::persist::PersistenceMode;

#[test]
fn defaults_apply_without_a_file() {
    let settings = Settings::load_from("no_such_databag_settings").expect("settings");
    assert_eq!(settings, Settings::default());
    assert_eq!(settings.log_filter, "info");
    assert_eq!(settings.persistence_mode().expect("mode"), PersistenceMode::InMemory);
    assert_eq!(settings.merge_options(), MergeOptions::default());
}

#[test]
fn a_file_overrides_the_defaults() {
    let path = "test_databag_settings.json";
    std::fs::write(
        path,
        r#"{
            "log_filter": "debug",
            "persistence": { "mode": "file", "path": "snapshots.db" },
            "merge": { "data_conflict": "overwrite" }
        }"#,
    )
    .expect("write settings");
    let settings = Settings::load_from(path);
    let _ = std::fs::remove_file(path);
    let settings = settings.expect("settings");

    assert_eq!(settings.log_filter, "debug");
    assert_eq!(
        settings.persistence_mode().expect("mode"),
        PersistenceMode::File("snapshots.db".to_string())
    );
    let options = settings.merge_options();
    assert_eq!(options.data_conflict_policy, ConflictPolicy::Overwrite);
    assert_eq!(options.schema_conflict_policy, ConflictPolicy::KeepOriginal);
}

#[test]
fn unknown_persistence_modes_are_rejected() {
    let mut settings = Settings::default();
    settings.persistence.mode = "cloud".into();
    match settings.persistence_mode() {
        Err(DataBagError::Config(message)) => assert!(message.contains("unknown persistence mode 'cloud'")),
        other => panic!("expected a config error, got {:?}", other),
    }
}

#[test]
fn conflict_policies_parse_from_text() {
    assert_eq!("raise".parse::<ConflictPolicy>().expect("raise"), ConflictPolicy::RaiseOnConflict);
    assert_eq!("keep_original".parse::<ConflictPolicy>().expect("keep"), ConflictPolicy::KeepOriginal);
    assert_eq!(ConflictPolicy::Overwrite.to_string(), "overwrite");
    assert!("sometimes".parse::<ConflictPolicy>().is_err());
}

#[test]
fn tracing_can_be_initialised_twice() {
    let settings = Settings::default();
    init_tracing(&settings).expect("first");
    init_tracing(&settings).expect("second is a no-op");

    let broken = Settings {
        log_filter: "databag=loud".into(),
        ..Settings::default()
    };
    if std::env::var("RUST_LOG").is_err() {
        assert!(init_tracing(&broken).is_err());
    }
}

#[test]
fn short_policy_names_load_from_a_file() {
    let path = "test_databag_raise.json";
    std::fs::write(path, r#"{ "merge": { "data_conflict": "raise", "schema_conflict": "keep" } }"#)
        .expect("write settings");
    let settings = Settings::load_from(path);
    let _ = std::fs::remove_file(path);
    let options = settings.expect("settings").merge_options();
    assert_eq!(options.data_conflict_policy, ConflictPolicy::RaiseOnConflict);
    assert_eq!(options.schema_conflict_policy, ConflictPolicy::KeepOriginal);

    let path = "test_databag_bad_policy.json";
    std::fs::write(path, r#"{ "merge": { "data_conflict": "sometimes" } }"#).expect("write settings");
    let broken = Settings::load_from(path);
    let _ = std::fs::remove_file(path);
    assert!(matches!(broken, Err(DataBagError::Config(_))), "unexpected {:?}", broken);
}
