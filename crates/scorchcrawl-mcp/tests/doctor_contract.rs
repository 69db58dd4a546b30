#[test]
fn scorchcrawl_doctor_contract_is_offline_and_secret_free() {
    let bin = assert_cmd::cargo::cargo_bin!("scorchcrawl");
    let out = std::process::Command::new(bin)
        .args(["doctor"])
        // Ensure we don't inherit keys or modes from the environment.
        .env_remove("SCORCHCRAWL_API_URL")
        .env_remove("SCORCHCRAWL_API_KEY")
        .env_remove("COPILOT_TOKEN")
        .env_remove("SCORCHCRAWL_COPILOT_RUNTIME_URL")
        .env_remove("SCORCHCRAWL_LOCAL_PROXY")
        .env_remove("SCORCHCRAWL_CLOUD_SERVICE")
        .env_remove("SCORCHCRAWL_SAFE_MODE")
        .env("SCORCHCRAWL_API_KEY", "sk-super-secret")
        .output()
        .expect("run scorchcrawl doctor");

    assert!(out.status.success(), "scorchcrawl doctor failed");
    let s = String::from_utf8_lossy(&out.stdout);
    let v: serde_json::Value = serde_json::from_str(&s).expect("parse doctor json");

    assert_eq!(v["schema_version"].as_u64(), Some(1));
    assert_eq!(v["name"].as_str(), Some("scorchcrawl"));
    assert!(!v["version"].as_str().unwrap_or("").is_empty());

    // Secrets appear only as booleans, never as values.
    assert_eq!(v["configured"]["engine_api_key"].as_bool(), Some(true));
    assert!(!s.contains("sk-super-secret"), "doctor leaked a secret");

    // Mode flags and the rate-limit projection are present.
    assert!(v["modes"]["local_proxy"].is_boolean());
    assert!(v["modes"]["safe_mode"].is_boolean());
    assert!(v["rate_limits"]["max_concurrent_jobs"].is_u64());
    assert!(v["rate_limits"]["window_ms"].is_u64());
    assert!(v["agent"]["allowed_models"].is_array());
}

#[test]
fn cloud_service_mode_forces_safe_mode_in_doctor_output() {
    let bin = assert_cmd::cargo::cargo_bin!("scorchcrawl");
    let out = std::process::Command::new(bin)
        .args(["doctor"])
        .env_remove("SCORCHCRAWL_SAFE_MODE")
        .env("SCORCHCRAWL_CLOUD_SERVICE", "true")
        .output()
        .expect("run scorchcrawl doctor");

    let v: serde_json::Value =
        serde_json::from_slice(&out.stdout).expect("parse doctor json");
    assert_eq!(v["modes"]["cloud_service"].as_bool(), Some(true));
    assert_eq!(v["modes"]["safe_mode"].as_bool(), Some(true));
}
