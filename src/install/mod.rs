use rocket::Route;

pub mod checks;
pub mod wizard;

pub fn routes() -> Vec<Route> {
    routes![
        wizard::begin_install,
        wizard::submit_install,
        checks::check_mysql,
        checks::check_sqlite,
    ]
}
