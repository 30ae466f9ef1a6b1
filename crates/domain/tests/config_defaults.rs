use anyhow::Result;

use sov_domain::config::Config;

#[test]
fn default_ollama_url_is_localhost() {
    let config = Config::default();
    assert_eq!(config.llm.ollama_url, "http://localhost:11434");
}

#[test]
fn explicit_llm_section_parses() -> Result<()> {
    let toml_str = r#"
[llm]
model = "qwen2.5-coder:32b"
ollama_url = "http://10.0.0.2:11434"
timeout_secs = 120
"#;
    let config: Config = toml::from_str(toml_str)?;
    assert_eq!(config.llm.model, "qwen2.5-coder:32b");
    assert_eq!(config.llm.ollama_url, "http://10.0.0.2:11434");
    assert_eq!(config.llm.timeout_secs, 120);
    Ok(())
}

#[test]
fn load_missing_file_yields_defaults() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let config = Config::load(&dir.path().join("no-such-config.toml"))?;
    assert_eq!(config.agent.max_iterations, 50);
    Ok(())
}

#[test]
fn load_reads_toml_file() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[agent]\nmax_iterations = 7\n")?;
    let config = Config::load(&path)?;
    assert_eq!(config.agent.max_iterations, 7);
    Ok(())
}

#[test]
fn load_rejects_malformed_toml() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[agent\nmax_iterations = ")?;
    assert!(Config::load(&path).is_err());
    Ok(())
}
