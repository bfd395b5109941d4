use serde::Serialize;

/// One entry of the admin main menu. `hotkey` is the single-key shortcut
/// shown next to the label; `selected` marks the page being viewed.
#[derive(Debug, Clone, Serialize)]
pub struct MenuItem {
    pub id: String,
    pub title: String,
    pub text: String,
    pub url: String,
    pub hotkey: Option<char>,
    pub selected: bool,
    pub submenu: Vec<MenuItem>,
}

impl MenuItem {
    fn new(id: &str, title: &str, text: &str, url: &str, hotkey: char) -> MenuItem {
        MenuItem {
            id: id.to_string(),
            title: title.to_string(),
            text: text.to_string(),
            url: url.to_string(),
            hotkey: Some(hotkey),
            selected: false,
            submenu: Vec::new(),
        }
    }

    fn with_submenu(mut self, submenu: Vec<MenuItem>) -> MenuItem {
        self.submenu = submenu;
        self
    }
}

/// Builds the admin main menu, marking `current` (a menu id) as selected.
/// Selection propagates from a submenu entry to its parent.
pub fn main_menu(current: &str) -> Vec<MenuItem> {
    let mut menu = vec![
        MenuItem::new("dashboard", "View the dashboard", "Dashboard", "/admin", '1'),
        MenuItem::new("manage", "Manage the site", "Manage", "/admin/groups", '2')
            .with_submenu(vec![
                MenuItem::new("manage-groups", "Manage user groups", "Groups", "/admin/groups", '3'),
                MenuItem::new("manage-logs", "View the event log", "Logs", "/admin/logs", '4'),
            ]),
        MenuItem::new("options", "Site options", "Options", "/admin/options", '5'),
    ];

    for item in &mut menu {
        for sub in &mut item.submenu {
            if sub.id == current {
                sub.selected = true;
                item.selected = true;
            }
        }
        if item.id == current {
            item.selected = true;
        }
    }
    menu
}

/// Joins names into an English list: "A", "A and B", "A, B and C".
pub fn and_list(items: &[String]) -> String {
    match items.len() {
        0 => String::new(),
        1 => items[0].clone(),
        _ => format!(
            "{} and {}",
            items[..items.len() - 1].join(", "),
            items[items.len() - 1]
        ),
    }
}
