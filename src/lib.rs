#[macro_use]
extern crate rocket;

pub mod auth;
pub mod config;
pub mod data;
pub mod error;
pub mod kanban;

use rocket::fs::FileServer;
use rocket::serde::json::Json;
use rocket::{Build, Rocket};

use std::path::Path;

use config::AppConfig;
use data::DBConnection;
use error::ErrorBody;
use kanban::endpoints;

#[catch(400)]
fn bad_request() -> Json<ErrorBody> {
    Json(ErrorBody::new("Bad request", "validation"))
}

#[catch(401)]
fn unauthorized() -> Json<ErrorBody> {
    Json(ErrorBody::new("Authentication required", "unauthenticated"))
}

#[catch(404)]
fn not_found() -> Json<ErrorBody> {
    Json(ErrorBody::new("Not found", "not_found"))
}

#[catch(422)]
fn unprocessable() -> Json<ErrorBody> {
    Json(ErrorBody::new("Unprocessable request", "validation"))
}

#[catch(500)]
fn internal_error() -> Json<ErrorBody> {
    Json(ErrorBody::new("Internal server error", "server_error"))
}

pub fn build_rocket(
    rocket: Rocket<Build>,
    db_connection: DBConnection,
    config: &AppConfig,
) -> Rocket<Build> {
    let rocket = rocket
        .manage(db_connection)
        .mount(
            "/api",
            routes![endpoints::get_board_data, endpoints::save_board_data],
        )
        .register(
            "/",
            catchers![bad_request, unauthorized, not_found, unprocessable, internal_error],
        );

    let static_dir = Path::new(&config.static_dir);
    if static_dir.is_dir() {
        rocket.mount("/", FileServer::from(static_dir).rank(15))
    } else {
        log::warn!(
            "Static directory {} does not exist, serving the API only",
            static_dir.display()
        );
        rocket
    }
}
