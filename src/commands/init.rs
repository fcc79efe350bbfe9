use url::Url;

use crate::config::{Config, DEFAULT_API_URL, DEFAULT_SOCKET_URL};
use crate::error::{Result, TmsError};

use super::prompt;

fn ask_url(label: &str, default: &str, schemes: &[&str]) -> Result<String> {
    let answer = prompt(&format!("{label} [{default}]: "))?;
    let answer = answer.trim();
    let value = if answer.is_empty() { default } else { answer };

    let url = Url::parse(value).map_err(|_| TmsError::InvalidUrl(value.to_string()))?;
    if !schemes.contains(&url.scheme()) {
        return Err(TmsError::InvalidUrl(value.to_string()));
    }
    Ok(value.trim_end_matches('/').to_string())
}

fn render(api_url: &str, socket_url: &str, default_project: &str) -> String {
    let mut table = toml::Table::new();
    table.insert("api_url".into(), api_url.into());
    table.insert("socket_url".into(), socket_url.into());
    if !default_project.is_empty() {
        table.insert("default_project".into(), default_project.into());
    }
    table.to_string()
}

pub async fn run() -> Result<()> {
    let config_path = Config::config_path()?;

    if config_path.exists() {
        let answer = prompt(&format!(
            "Config file already exists at {}. Overwrite? [y/N] ",
            config_path.display()
        ))?;
        if !answer.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    println!("Ticket Management CLI Configuration");
    println!("===================================\n");

    let api_url = ask_url("API base URL", DEFAULT_API_URL, &["http", "https"])?;
    let socket_url = ask_url(
        "Realtime URL",
        DEFAULT_SOCKET_URL,
        &["ws", "wss", "http", "https"],
    )?;
    let default_project = prompt("Default project ID [optional]: ")?;

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| TmsError::ConfigRead {
            path: config_path.clone(),
            source: e,
        })?;
    }

    std::fs::write(
        &config_path,
        render(&api_url, &socket_url, default_project.trim()),
    )
    .map_err(|e| TmsError::ConfigRead {
        path: config_path.clone(),
        source: e,
    })?;

    println!("\nConfig saved to {}", config_path.display());
    println!("Run 'tms login' to sign in.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rendered_config_parses_back() {
        let text = render("https://tms.example.com/api/v1", "wss://tms.example.com", "p-7");
        let config = Config::parse(&text).unwrap();
        assert_eq!(config.api_url.as_deref(), Some("https://tms.example.com/api/v1"));
        assert_eq!(config.socket_url.as_deref(), Some("wss://tms.example.com"));
        assert_eq!(config.default_project.as_deref(), Some("p-7"));
    }

    #[test]
    fn test_rendered_config_omits_empty_project() {
        let config = Config::parse(&render(DEFAULT_API_URL, DEFAULT_SOCKET_URL, "")).unwrap();
        assert!(config.default_project.is_none());
    }
}
