use dayplan::config::AppConfig;
use dayplan::{build_rocket, data};

use std::error::Error;

#[rocket::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let figment = rocket::Config::figment();
    let config: AppConfig = figment.extract()?;
    let server = rocket::custom(figment);

    let connection = data::open_database(&config.database)?;
    log::info!("Using database {}", config.database);

    build_rocket(server, data::shared(connection), &config)
        .launch()
        .await?;

    Ok(())
}
