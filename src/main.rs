#[macro_use]
extern crate lazy_static;

use actix_files::{Files, NamedFile};
use actix_web::{
    http::{Method, StatusCode},
    middleware,
    web::{self, Data},
    App, Either, HttpResponse, HttpServer, Responder,
};
use log::info;
use sqlx::SqlitePool;
use tera::Tera;

mod amounts;
mod config;
mod db;
mod errors;
mod import;
mod routes;
mod structs;
mod utils;

use config::Config;

/// Largest upload accepted by the import endpoints.
const MAX_IMPORT_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct AppState {
    db_pool: SqlitePool,
}

lazy_static! {
    pub static ref TEMPLATES: Tera = {
        let mut tera = match Tera::new("templates/**/*") {
            Ok(t) => t,
            Err(e) => {
                log::error!("Parsing error(s): {}", e);
                ::std::process::exit(1);
            }
        };
        tera.autoescape_on(vec![".html"]);
        tera.register_filter("money", routes::money_filter);
        tera.register_filter("weight", routes::weight_filter);
        tera
    };
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::from_env()?;
    let state = db::initialize(&config.database_url).await?;

    let args: Vec<String> = std::env::args().collect();
    if let [_, command, path] = args.as_slice() {
        if command == "import" {
            let report = import::import_file(&state, std::path::Path::new(path)).await;
            db::close(&state).await;
            println!("{}", report?.summary().join("\n"));
            return Ok(());
        }
    }

    info!(
        "Starting HTTP server on http://{}:{}/",
        config.host, config.port
    );

    let app_state = state.clone();
    let result = HttpServer::new(move || {
        App::new()
            .wrap(middleware::Compress::default())
            .wrap(middleware::Logger::default())
            .app_data(Data::new(app_state.clone()))
            .app_data(web::PayloadConfig::new(MAX_IMPORT_BYTES))
            .service(Files::new("/static", "static"))
            .configure(routes::configure)
            .default_service(web::to(default_handler))
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await;

    db::close(&state).await;
    result
}

async fn default_handler(req_method: Method) -> Result<impl Responder, std::io::Error> {
    match req_method {
        Method::GET => {
            let file = NamedFile::open("static/404.html")?
                .customize()
                .with_status(StatusCode::NOT_FOUND);
            Ok(Either::Left(file))
        }
        _ => Ok(Either::Right(HttpResponse::MethodNotAllowed().finish())),
    }
}
