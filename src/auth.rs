use rocket::form::Form;
use rocket::http::{Cookie, CookieJar, Status};
use rocket::request::{FromRequest, Outcome, Request};
use rocket::response::Redirect;
use rocket::{Route, State};
use rocket_dyn_templates::Template;
use serde::Deserialize;
use serde_json::json;

use crate::store::Store;
use crate::SiteState;

const SESSION_COOKIE: &str = "tidings_session";
const DEFAULT_SESSION_HOURS: i64 = 24;

pub fn hash_password(password: &str) -> Result<String, String> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|e| e.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// Returns true while the site still needs the installer: no config-backed
/// store, the installed flag unset, or no accounts yet.
pub fn needs_setup(store: &dyn Store) -> bool {
    store.option_get("installed").as_deref() != Some("true") || store.user_count() == 0
}

fn session_hours(store: &dyn Store) -> i64 {
    store
        .option_get("session_expiry_hours")
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_SESSION_HOURS)
        .max(1)
}

/// Guard that ensures the request is from an authenticated admin
pub struct AdminUser;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminUser {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let state = match request.guard::<&State<SiteState>>().await {
            Outcome::Success(s) => s,
            _ => return Outcome::Forward(Status::Unauthorized),
        };
        let store = match state.store() {
            Some(s) => s,
            None => return Outcome::Forward(Status::Unauthorized),
        };

        let cookies = request.cookies();
        let session_id = match cookies.get_private(SESSION_COOKIE) {
            Some(c) => c.value().to_string(),
            None => return Outcome::Forward(Status::Unauthorized),
        };

        if store.session_valid(&session_id) {
            Outcome::Success(AdminUser)
        } else {
            cookies.remove_private(Cookie::from(SESSION_COOKIE));
            Outcome::Forward(Status::Unauthorized)
        }
    }
}

fn set_session_cookie(cookies: &CookieJar<'_>, session_id: &str) {
    let mut cookie = Cookie::new(SESSION_COOKIE, session_id.to_string());
    cookie.set_http_only(true);
    cookie.set_same_site(rocket::http::SameSite::Strict);
    cookie.set_path("/");
    cookies.add_private(cookie);
}

// ── Routes ──────────────────────────────────────────────

#[derive(Debug, FromForm, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[get("/login")]
pub fn login_page(state: &State<SiteState>) -> Result<Template, Redirect> {
    let store = match state.store() {
        Some(s) => s,
        None => return Err(Redirect::to("/install")),
    };
    if needs_setup(&*store) {
        return Err(Redirect::to("/install"));
    }
    Ok(Template::render(
        "admin/login",
        &json!({
            "error": null,
            "site_title": store.option_get("title"),
        }),
    ))
}

#[post("/login", data = "<form>")]
pub fn login_submit(
    form: Form<LoginForm>,
    state: &State<SiteState>,
    cookies: &CookieJar<'_>,
) -> Result<Redirect, Template> {
    let store = match state.store() {
        Some(s) => s,
        None => return Ok(Redirect::to("/install")),
    };
    if needs_setup(&*store) {
        return Ok(Redirect::to("/install"));
    }

    let make_err = |msg: &str| {
        Template::render(
            "admin/login",
            &json!({
                "error": msg,
                "site_title": store.option_get("title"),
            }),
        )
    };

    let user = match store.user_get_by_name(form.username.trim()) {
        Some(u) => u,
        None => return Err(make_err("Invalid username or password.")),
    };
    if !verify_password(&form.password, &user.password_hash) {
        store.event_log(
            &format!("Failed login for {}.", user.username),
            "warning",
            "authentication",
            "tidings",
        );
        return Err(make_err("Invalid username or password."));
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    if let Err(e) = store.session_create(&session_id, session_hours(&*store)) {
        log::error!("Could not create session: {}", e);
        return Err(make_err("Could not create a session. Try again."));
    }
    set_session_cookie(cookies, &session_id);
    store.event_log(
        &format!("{} logged in.", user.username),
        "info",
        "authentication",
        "tidings",
    );
    Ok(Redirect::to("/admin"))
}

#[post("/logout")]
pub fn logout(state: &State<SiteState>, cookies: &CookieJar<'_>) -> Redirect {
    if let Some(store) = state.store() {
        if let Some(cookie) = cookies.get_private(SESSION_COOKIE) {
            let _ = store.session_destroy(cookie.value());
        }
    }
    cookies.remove_private(Cookie::from(SESSION_COOKIE));
    Redirect::to("/admin/login")
}

pub fn routes() -> Vec<Route> {
    routes![login_page, login_submit, logout]
}
