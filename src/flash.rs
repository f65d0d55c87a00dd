//! One-shot messages carried across a redirect in a cookie. The page that shows
//! the message clears the cookie.

use actix_web::{
    cookie::{time::Duration, Cookie, SameSite},
    http::header,
    HttpRequest, HttpResponse,
};

pub const FLASH_COOKIE: &str = "ms_flash";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Success,
    Error,
    Info,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Level::Success => "success",
            Level::Error => "error",
            Level::Info => "info",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Flash {
    pub level: Level,
    pub message: String,
}

impl Flash {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: Level::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: Level::Error,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: Level::Info,
            message: message.into(),
        }
    }

    /// CSS modifier used by the templates.
    pub fn kind(&self) -> &'static str {
        self.level.as_str()
    }

    fn encode(&self) -> String {
        format!("{}:{}", self.level.as_str(), self.message)
    }

    fn decode(value: &str) -> Option<Self> {
        let (level, message) = value.split_once(':')?;
        let level = match level {
            "success" => Level::Success,
            "error" => Level::Error,
            "info" => Level::Info,
            _ => return None,
        };
        Some(Self {
            level,
            message: message.to_string(),
        })
    }

    pub fn cookie(&self) -> Cookie<'static> {
        Cookie::build(FLASH_COOKIE, self.encode())
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .finish()
    }
}

/// Message left by the previous response, if any.
pub fn take(req: &HttpRequest) -> Option<Flash> {
    req.cookie(FLASH_COOKIE)
        .and_then(|cookie| Flash::decode(cookie.value()))
}

pub fn removal_cookie() -> Cookie<'static> {
    Cookie::build(FLASH_COOKIE, "")
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(Duration::seconds(0))
        .finish()
}

pub fn redirect(location: &str) -> HttpResponse {
    HttpResponse::Found()
        .append_header((header::LOCATION, location))
        .finish()
}

pub fn redirect_with(location: &str, flash: Flash) -> HttpResponse {
    HttpResponse::Found()
        .append_header((header::LOCATION, location))
        .cookie(flash.cookie())
        .finish()
}
