use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Credentials file structure
///
/// Format:
/// ```toml
/// [telegram.profile_name]
/// bot_token = "123456:ABC..."
///
/// [tiktok.profile_name]
/// sessionid_ss = "your_session_cookie"
/// tt_target_idc = "useast2a"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Credentials {
    #[serde(default)]
    pub telegram: HashMap<String, TelegramProfile>,
    #[serde(default)]
    pub tiktok: HashMap<String, TikTokProfile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramProfile {
    pub bot_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TikTokProfile {
    #[serde(default)]
    pub sessionid_ss: String,
    pub tt_target_idc: Option<String>,
}

/// Data center cookie sent when no TikTok profile is configured
pub const DEFAULT_TARGET_IDC: &str = "useast2a";

/// Get the credentials file path
/// `TIKTOK_REUP_CREDENTIALS` wins over ~/.config/tiktok_reup/credentials.toml
pub fn get_credentials_path() -> PathBuf {
    if let Ok(path) = std::env::var("TIKTOK_REUP_CREDENTIALS") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home)
        .join(".config")
        .join("tiktok_reup")
        .join("credentials.toml")
}

/// Load credentials from the default location
/// Returns None if the file doesn't exist
pub fn load_credentials() -> Result<Option<Credentials>, Box<dyn std::error::Error + Send + Sync>> {
    let creds_path = get_credentials_path();

    if !creds_path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(&creds_path)?;
    let credentials: Credentials = toml::from_str(&content)?;

    Ok(Some(credentials))
}

/// Get the Telegram bot token stored under a profile
pub fn telegram_token(credentials: &Option<Credentials>, profile: &str) -> Result<String, String> {
    match credentials {
        Some(creds) => creds
            .telegram
            .get(profile)
            .map(|p| p.bot_token.clone())
            .ok_or_else(|| {
                format!(
                    "Credential profile '[telegram.{}]' not found in credentials file",
                    profile
                )
            }),
        None => Err(format!(
            "Credentials file not found. Expected at: {}",
            get_credentials_path().display()
        )),
    }
}

/// Build the `Cookie` header value TikTok requests carry
///
/// Without a profile only the data center cookie is sent.
pub fn tiktok_cookies(
    credentials: &Option<Credentials>,
    profile: Option<&str>,
) -> Result<String, String> {
    let profile = match profile {
        Some(p) => p,
        None => return Ok(format!("tt-target-idc={}", DEFAULT_TARGET_IDC)),
    };

    let creds = credentials.as_ref().ok_or_else(|| {
        format!(
            "Credentials file not found. Expected at: {}",
            get_credentials_path().display()
        )
    })?;
    let tiktok = creds.tiktok.get(profile).ok_or_else(|| {
        format!(
            "Credential profile '[tiktok.{}]' not found in credentials file",
            profile
        )
    })?;

    let idc = tiktok
        .tt_target_idc
        .as_deref()
        .unwrap_or(DEFAULT_TARGET_IDC);
    let mut cookie = format!("tt-target-idc={}", idc);
    if !tiktok.sessionid_ss.is_empty() {
        cookie.push_str(&format!("; sessionid_ss={}", tiktok.sessionid_ss));
    }
    Ok(cookie)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Option<Credentials> {
        Some(
            toml::from_str(
                r#"
                [telegram.main]
                bot_token = "123:abc"

                [tiktok.main]
                sessionid_ss = "s3ss10n"

                [tiktok.anon]
                tt_target_idc = "alisg"
                "#,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_telegram_token_lookup() {
        assert_eq!(telegram_token(&sample(), "main").unwrap(), "123:abc");
        assert!(telegram_token(&sample(), "other")
            .unwrap_err()
            .contains("[telegram.other]"));
        assert!(telegram_token(&None, "main").is_err());
    }

    #[test]
    fn test_tiktok_cookie_header() {
        assert_eq!(
            tiktok_cookies(&sample(), Some("main")).unwrap(),
            "tt-target-idc=useast2a; sessionid_ss=s3ss10n"
        );
        assert_eq!(
            tiktok_cookies(&sample(), Some("anon")).unwrap(),
            "tt-target-idc=alisg"
        );
        assert_eq!(
            tiktok_cookies(&None, None).unwrap(),
            "tt-target-idc=useast2a"
        );
        assert!(tiktok_cookies(&None, Some("main")).is_err());
    }
}
