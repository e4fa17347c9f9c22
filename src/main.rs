use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use std::sync::Arc;

mod ai;
mod auth;
mod config;
mod controllers;
mod dispatcher;
mod hub;
mod memory;
mod rag;

use ai::{GeminiPlanner, OllamaSynthesizer};
use auth::{ActionResolver, PendingRegistry, TokenCache};
use config::Config;
use dispatcher::AskDispatcher;
use hub::{BankGateway, HubClient};
use memory::TranscriptStore;
use rag::RagClient;

pub struct AppState {
    pub config: Config,
    pub gateway: Arc<dyn BankGateway>,
    pub dispatcher: Arc<AskDispatcher>,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env();
    let port = config.port;

    log::info!("Connecting to open-banking hub at {}", config.hub_url);
    let gateway: Arc<dyn BankGateway> =
        Arc::new(HubClient::new(&config.hub_url).expect("Failed to create hub client"));

    let tokens = Arc::new(TokenCache::new());
    let pending = Arc::new(PendingRegistry::new());
    let resolver = Arc::new(ActionResolver::new(
        tokens.clone(),
        pending.clone(),
        gateway.clone(),
    ));

    let planner = Arc::new(
        GeminiPlanner::new(
            &config.planner_endpoint,
            &config.planner_model,
            &config.planner_api_key,
        )
        .expect("Failed to create planner client"),
    );
    let synthesizer = Arc::new(
        OllamaSynthesizer::new(&config.synth_endpoint, &config.synth_model)
            .expect("Failed to create synthesizer client"),
    );
    let search = Arc::new(RagClient::new(&config.rag_url).expect("Failed to create RAG client"));

    let transcripts = Arc::new(TranscriptStore::new(config.transcript_ttl_secs));

    let dispatcher = Arc::new(AskDispatcher::new(
        gateway.clone(),
        resolver,
        pending,
        planner,
        synthesizer,
        search,
        transcripts,
    ));

    log::info!("Starting bankbot server on port {}", port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(AppState {
                config: config.clone(),
                gateway: Arc::clone(&gateway),
                dispatcher: Arc::clone(&dispatcher),
            }))
            .wrap(Logger::default())
            .wrap(cors)
            .configure(controllers::health::config)
            .configure(controllers::ask::config)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
