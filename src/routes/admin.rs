use rocket::response::Redirect;
use rocket::{Route, State};
use rocket_dyn_templates::Template;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::admin::menu::{and_list, main_menu};
use crate::auth::{self, AdminUser};
use crate::store::Store;
use crate::SiteState;

/// Every admin page needs an installed site and a logged-in admin; anything
/// else bounces to the installer or the login form.
fn gate(
    state: &State<SiteState>,
    admin: &Option<AdminUser>,
) -> Result<Arc<dyn Store>, Redirect> {
    let store = match state.store() {
        Some(s) => s,
        None => return Err(Redirect::to("/install")),
    };
    if auth::needs_setup(&*store) {
        return Err(Redirect::to("/install"));
    }
    if admin.is_none() {
        return Err(Redirect::to("/admin/login"));
    }
    Ok(store)
}

fn chrome(store: &dyn Store, page: &str, page_title: &str) -> Value {
    json!({
        "site_title": store.option_get("title"),
        "admin_page": page,
        "page_title": page_title,
        "mainmenu": main_menu(page),
    })
}

// ── Dashboard ──────────────────────────────────────────

#[get("/")]
pub fn dashboard(
    admin: Option<AdminUser>,
    state: &State<SiteState>,
) -> Result<Template, Redirect> {
    let store = gate(state, &admin)?;

    let mut context = chrome(&*store, "dashboard", "Dashboard");
    context["posts_count"] = json!(store.post_count());
    context["users_count"] = json!(store.user_count());
    context["events_count"] = json!(store.event_count());
    context["recent_posts"] = json!(store.post_recent(5));
    context["recent_events"] = json!(store.event_recent(10));

    Ok(Template::render("admin/dashboard", &context))
}

// ── Groups ─────────────────────────────────────────────

#[get("/groups")]
pub fn groups(
    admin: Option<AdminUser>,
    state: &State<SiteState>,
) -> Result<Template, Redirect> {
    let store = gate(state, &admin)?;

    let items: Vec<Value> = store
        .group_list()
        .into_iter()
        .map(|group| {
            let members: Vec<String> = store
                .group_members(group.id)
                .into_iter()
                .map(|u| u.username)
                .collect();
            json!({
                "id": group.id,
                "name": group.name,
                "permission_count": store.group_permission_count(group.id),
                "members": and_list(&members),
                "actions": [
                    {
                        "url": format!("/admin/groups/{}", group.id),
                        "title": "Edit group",
                        "label": "Edit",
                    },
                    {
                        "url": format!("/admin/groups/{}/delete", group.id),
                        "title": "Delete this group",
                        "label": "Delete",
                    },
                ],
            })
        })
        .collect();

    let mut context = chrome(&*store, "manage-groups", "Groups");
    context["groups"] = json!(items);
    Ok(Template::render("admin/groups", &context))
}

#[post("/groups/<id>/delete")]
pub fn groups_delete(
    admin: Option<AdminUser>,
    state: &State<SiteState>,
    id: i64,
) -> Result<Redirect, Redirect> {
    let store = gate(state, &admin)?;
    if let Err(e) = store.group_delete(id) {
        log::error!("Could not delete group {}: {}", id, e);
    } else {
        store.event_log(
            &format!("Group {} deleted.", id),
            "info",
            "user",
            "tidings",
        );
    }
    Ok(Redirect::to("/admin/groups"))
}

// ── Event log ──────────────────────────────────────────

#[get("/logs")]
pub fn logs(
    admin: Option<AdminUser>,
    state: &State<SiteState>,
) -> Result<Template, Redirect> {
    let store = gate(state, &admin)?;

    let mut context = chrome(&*store, "manage-logs", "Event Log");
    context["events"] = json!(store.event_recent(50));
    context["events_count"] = json!(store.event_count());
    Ok(Template::render("admin/logs", &context))
}

// ── Options ────────────────────────────────────────────

#[get("/options")]
pub fn options(
    admin: Option<AdminUser>,
    state: &State<SiteState>,
) -> Result<Template, Redirect> {
    let store = gate(state, &admin)?;

    // sorted for a stable listing
    let all: BTreeMap<String, String> = store.option_all().into_iter().collect();

    let mut context = chrome(&*store, "options", "Options");
    context["options"] = json!(all);
    Ok(Template::render("admin/options", &context))
}

pub fn routes() -> Vec<Route> {
    routes![dashboard, groups, groups_delete, logs, options]
}
