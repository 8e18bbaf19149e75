//! Redis-compatible cache reached over a REST endpoint.
//!
//! Each command is POSTed as a JSON array (`["SET", key, value, "EX", "300"]`) with a bearer
//! token; the reply is `{"result": ...}` or `{"error": "..."}`.

use crate::cache::CacheBackend;
use crate::error::CacheError;
use crate::http::HttpBridge;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct CommandReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

pub struct RestCacheBackend {
    http: HttpBridge,
    url: String,
    token: Option<String>,
}

impl RestCacheBackend {
    pub fn new(
        url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, CacheError> {
        let http = HttpBridge::new(timeout).map_err(CacheError::Unavailable)?;
        Ok(Self {
            http,
            url: url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn command(&self, args: Vec<String>) -> Result<Option<Value>, CacheError> {
        let mut builder = self.http.client().post(&self.url).json(&args);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        let reply = self.http.block_on(async {
            let response = builder.send().await.map_err(map_http_error)?;
            let status = response.status();
            if status.is_server_error() {
                return Err(CacheError::Unavailable(format!(
                    "Cache endpoint returned {}",
                    status
                )));
            }
            response
                .json::<CommandReply>()
                .await
                .map_err(|e| CacheError::Protocol(format!("Unexpected cache reply: {}", e)))
        })?;

        match reply.error {
            Some(error) => Err(CacheError::Protocol(error)),
            None => Ok(reply.result.filter(|v| !v.is_null())),
        }
    }
}

fn map_http_error(error: reqwest::Error) -> CacheError {
    if error.is_timeout() {
        CacheError::Unavailable(format!("Cache timeout: {}", error))
    } else if error.is_connect() {
        CacheError::Unavailable(format!("Cache connection error: {}", error))
    } else {
        CacheError::Unavailable(format!("Cache HTTP error: {}", error))
    }
}

impl CacheBackend for RestCacheBackend {
    fn name(&self) -> &'static str {
        "rest"
    }

    fn ping(&self) -> Result<(), CacheError> {
        self.command(vec!["PING".to_string()]).map(|_| ())
    }

    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        match self.command(vec!["GET".to_string(), key.to_string()])? {
            None => Ok(None),
            Some(Value::String(raw)) => Ok(Some(raw)),
            Some(other) => Err(CacheError::Protocol(format!(
                "GET returned a non-string value: {}",
                other
            ))),
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let seconds = ttl.as_secs().max(1);
        self.command(vec![
            "SET".to_string(),
            key.to_string(),
            value.to_string(),
            "EX".to_string(),
            seconds.to_string(),
        ])
        .map(|_| ())
    }

    fn delete(&self, keys: &[String]) -> Result<(), CacheError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut args = Vec::with_capacity(keys.len() + 1);
        args.push("DEL".to_string());
        args.extend(keys.iter().cloned());
        self.command(args).map(|_| ())
    }
}
