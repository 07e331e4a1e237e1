use figment::Jail;

use recall_core::config::Config;
use recall_core::{Chunk, Filter, Query, RetrievalError, Settings, Weights};

#[test]
fn settings_default_when_retrieval_table_absent() {
    Jail::expect_with(|_jail| {
        let config = Config::load().map_err(|e| e.to_string())?;
        let settings = config.settings().map_err(|e| e.to_string())?;
        assert_eq!(settings, Settings::default());
        Ok(())
    });
}

#[test]
fn settings_merge_file_env_file_and_env_vars() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "config.toml",
            r#"
            [retrieval]
            candidate_pool = 64
            rerank_shortlist = 12

            [retrieval.result_cache]
            local_ttl_secs = 5
            shared_path = "~/recall/cache.sqlite"
            "#,
        )?;
        jail.create_file(
            "config.test.toml",
            r#"
            [retrieval]
            rerank_shortlist = 8
            "#,
        )?;
        jail.set_env("RUST_ENV", "test");
        jail.set_env("APP_RETRIEVAL__BACKEND_TIMEOUT_MS", "150");

        let settings = Config::load()
            .and_then(|c| c.settings())
            .map_err(|e| e.to_string())?;
        assert_eq!(settings.candidate_pool, 64);
        assert_eq!(settings.rerank_shortlist, 8, "env-specific file overrides base file");
        assert_eq!(settings.backend_timeout_ms, 150, "env vars override files");
        assert_eq!(settings.result_cache.local_ttl_secs, 5);
        assert_eq!(settings.result_cache.local_capacity, 1_024, "unset fields keep defaults");
        let path = settings.result_cache.shared_path().expect("path");
        assert!(!path.to_string_lossy().starts_with('~'), "tilde expanded: {}", path.display());
        Ok(())
    });
}

#[test]
fn invalid_settings_are_rejected() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "config.toml",
            r#"
            [retrieval]
            candidate_pool = 0
            "#,
        )?;
        assert!(Config::load().and_then(|c| c.settings()).is_err());

        jail.create_file(
            "config.toml",
            r#"
            [retrieval.default_weights]
            lexical = 0.9
            vector = 0.9
            "#,
        )?;
        assert!(Config::load().and_then(|c| c.settings()).is_err());
        Ok(())
    });
}

#[test]
fn query_validation() {
    assert!(Query::new("vacation days", 3).validate().is_ok());
    assert!(matches!(
        Query::new("   ", 3).validate(),
        Err(RetrievalError::InvalidQuery { .. })
    ));
    assert!(Query::new("vacation", 0).validate().is_err());
    assert!(Query::new("vacation", 3).with_weights(0.7, 0.3).validate().is_ok());
    assert!(Query::new("vacation", 3).with_weights(0.7, 0.7).validate().is_err());
    assert!(Query::new("vacation", 3).with_weights(1.2, -0.2).validate().is_err());
    assert!(Query::new("vacation", 3)
        .with_filter(Filter::new().between("year", None, None))
        .validate()
        .is_err());
}

#[test]
fn weights_tolerate_float_rounding() {
    assert!(Weights::new(0.7, 0.3).validate().is_ok());
    assert!(Weights::new(1.0 / 3.0, 2.0 / 3.0).validate().is_ok());
    assert!(Weights::new(f32::NAN, 1.0).validate().is_err());
}

#[test]
fn chunk_validation() {
    assert!(Chunk::new("a", "text").validate().is_ok());
    assert!(Chunk::new("", "text").validate().is_err());
    assert!(Chunk::new("a", "text").with_embedding(vec![]).validate().is_err());
    assert!(Chunk::new("a", "text")
        .with_embedding(vec![0.1, f32::INFINITY])
        .validate()
        .is_err());
    assert!(Chunk::new("a", "text").with_metadata("x", f64::NAN).validate().is_err());
}

#[test]
fn chunk_round_trips_through_json() {
    let chunk = Chunk::new("handbook:3", "Employees receive 15 vacation days.")
        .with_embedding(vec![0.25, -0.5, 1.0])
        .with_metadata("department", "hr")
        .with_metadata("year", 2024i64)
        .with_source("handbook", vec!["Benefits".into(), "Leave".into()])
        .with_version(2);
    let json = serde_json::to_string(&chunk).expect("serialize");
    let back: Chunk = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, chunk);
}
