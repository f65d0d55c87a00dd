use actix_web::{HttpRequest, HttpResponse};
use askama::Template;

use crate::{
    auth::AuthUser,
    flash::{self, Flash},
    state::AppState,
};

/// Chrome shared by every page: title, navigation for the signed-in role and
/// the pending flash message.
#[derive(Clone, Debug, Default)]
pub struct Page {
    pub title: String,
    pub shop_name: String,
    pub user_name: String,
    pub role: String,
    pub flash: Option<Flash>,
}

impl Page {
    pub fn new(state: &AppState, req: &HttpRequest, user: &AuthUser, title: &str) -> Self {
        Self {
            title: title.to_string(),
            shop_name: state.settings.current().shop_name,
            user_name: user.display_name.clone(),
            role: user.role.as_str().to_string(),
            flash: flash::take(req),
        }
    }

    pub fn public(state: &AppState, req: &HttpRequest, title: &str) -> Self {
        Self {
            title: title.to_string(),
            shop_name: state.settings.current().shop_name,
            flash: flash::take(req),
            ..Self::default()
        }
    }
}

pub fn render<T: Template>(template: T) -> HttpResponse {
    match template.render() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/html; charset=utf-8")
            .body(body),
        Err(err) => {
            log::error!("Template render error: {err}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Renders the page and drops the flash cookie the page just displayed.
pub fn render_page<T: Template>(req: &HttpRequest, template: T) -> HttpResponse {
    let mut response = render(template);
    if req.cookie(flash::FLASH_COOKIE).is_some() {
        if let Err(err) = response.add_cookie(&flash::removal_cookie()) {
            log::warn!("Could not clear flash cookie: {err}");
        }
    }
    response
}
