use async_trait::async_trait;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, COOKIE, REFERER, USER_AGENT};
use serde_json::Value;
use std::time::Duration;

use crate::config::TikTokConfig;
use crate::constants::TIKTOK_AID;
use crate::db::DynError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Stream qualities in order of preference
const FLV_QUALITIES: [&str; 4] = ["FULL_HD1", "HD1", "SD1", "SD2"];

/// Room status reported while a broadcast is running
const ROOM_STATUS_LIVE: i64 = 2;

lazy_static! {
    static ref ROOM_ID_RE: Regex = Regex::new(r#""roomId":"(\d+)""#).unwrap();
}

/// Liveness checker used by the monitor loop
#[async_trait]
pub trait LiveProbe: Send + Sync {
    /// Look up the current room id of an account; None when it has none
    async fn resolve_room_id(&self, username: &str) -> Result<Option<String>, DynError>;

    async fn is_live(&self, room_id: &str) -> Result<bool, DynError>;

    /// Pull URL of a running broadcast
    async fn stream_url(&self, room_id: &str) -> Result<String, DynError>;
}

/// Split operator input into a username and, when the input carries one, a room id
///
/// Accepts `name`, `@name` and profile or live URLs such as
/// `https://www.tiktok.com/@name/live?room_id=123`.
pub fn parse_user_input(input: &str) -> Result<(String, Option<String>), String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("Username is required".to_string());
    }

    let (username, room_id) = if input.contains("tiktok.com") {
        let with_scheme = if input.contains("://") {
            input.to_string()
        } else {
            format!("https://{}", input)
        };
        let url = url::Url::parse(&with_scheme)
            .map_err(|e| format!("Invalid TikTok URL '{}': {}", input, e))?;
        let username = url
            .path_segments()
            .and_then(|mut segments| segments.find(|s| s.starts_with('@')))
            .map(|s| s.trim_start_matches('@').to_string())
            .ok_or_else(|| format!("Could not extract username from '{}'", input))?;
        let room_id = url
            .query_pairs()
            .find(|(k, _)| k == "room_id")
            .map(|(_, v)| v.to_string())
            .filter(|v| !v.is_empty() && v.chars().all(|c| c.is_ascii_digit()));
        (username, room_id)
    } else {
        (input.replace('@', ""), None)
    };

    if username.is_empty() {
        return Err("Could not extract username from input".to_string());
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        return Err(format!("Invalid TikTok username '{}'", username));
    }
    Ok((username, room_id))
}

/// Room id embedded in the SIGI state of a live page
pub fn extract_room_id_from_html(html: &str) -> Option<String> {
    ROOM_ID_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// `data.user.roomId` of the api-live room lookup
pub fn extract_room_id_from_api(json: &Value) -> Option<String> {
    match json.pointer("/data/user/roomId")? {
        Value::String(s) if !s.is_empty() && s != "0" => Some(s.clone()),
        Value::Number(n) if n.as_u64().unwrap_or(0) > 0 => Some(n.to_string()),
        _ => None,
    }
}

/// `data[0].alive` of a check_alive response, missing means offline
pub fn parse_alive(json: &Value) -> bool {
    json.pointer("/data/0/alive")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Best pull URL from a room/info response
pub fn select_stream_url(json: &Value) -> Result<String, String> {
    let data = json
        .get("data")
        .ok_or_else(|| "Room info response has no data".to_string())?;
    let status = data.get("status").and_then(Value::as_i64).unwrap_or(0);
    if status != ROOM_STATUS_LIVE {
        return Err(format!("Room is not broadcasting (status {})", status));
    }

    let stream = data
        .get("stream_url")
        .ok_or_else(|| "Room info response has no stream_url".to_string())?;
    let non_empty = |v: Option<&Value>| {
        v.and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    if let Some(flv) = stream.get("flv_pull_url") {
        for quality in FLV_QUALITIES {
            if let Some(url) = non_empty(flv.get(quality)) {
                return Ok(url);
            }
        }
    }
    non_empty(stream.get("rtmp_pull_url"))
        .or_else(|| non_empty(stream.get("hls_pull_url")))
        .ok_or_else(|| "No stream URL available for room".to_string())
}

pub struct TikTokClient {
    client: reqwest::Client,
    base_url: String,
    webcast_url: String,
}

impl TikTokClient {
    /// Build a client sending browser headers and the given `Cookie` header value
    pub fn new(config: &TikTokConfig, cookies: &str) -> Result<Self, DynError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_str(&config.user_agent)?);
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/json;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert(REFERER, HeaderValue::from_str(&format!("{}/", config.base_url))?);
        headers.insert(COOKIE, HeaderValue::from_str(cookies)?);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            webcast_url: config.webcast_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value, DynError> {
        let response = self.client.get(url).query(query).send().await?;
        if !response.status().is_success() {
            return Err(format!("HTTP {} from {}", response.status(), url).into());
        }
        Ok(response.json::<Value>().await?)
    }
}

#[async_trait]
impl LiveProbe for TikTokClient {
    async fn resolve_room_id(&self, username: &str) -> Result<Option<String>, DynError> {
        let page_url = format!("{}/@{}/live", self.base_url, username);
        match self.client.get(&page_url).send().await {
            Ok(response) if response.status().is_success() => {
                let html = response.text().await?;
                if let Some(room_id) = extract_room_id_from_html(&html) {
                    return Ok(Some(room_id));
                }
            }
            Ok(response) => debug!("Live page for {} returned {}", username, response.status()),
            Err(e) => debug!("Live page for {} failed: {}", username, e),
        }

        let api_url = format!("{}/api-live/user/room/", self.base_url);
        let json = self
            .get_json(&api_url, &[("uniqueId", username), ("aid", TIKTOK_AID)])
            .await?;
        Ok(extract_room_id_from_api(&json))
    }

    async fn is_live(&self, room_id: &str) -> Result<bool, DynError> {
        let url = format!("{}/webcast/room/check_alive/", self.webcast_url);
        let json = self
            .get_json(
                &url,
                &[
                    ("aid", TIKTOK_AID),
                    ("region", "CH"),
                    ("room_ids", room_id),
                    ("user_is_login", "true"),
                ],
            )
            .await?;
        Ok(parse_alive(&json))
    }

    async fn stream_url(&self, room_id: &str) -> Result<String, DynError> {
        let url = format!("{}/webcast/room/info/", self.webcast_url);
        let json = self
            .get_json(&url, &[("aid", TIKTOK_AID), ("room_id", room_id)])
            .await?;
        Ok(select_stream_url(&json)?)
    }
}
