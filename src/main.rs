use actix_web::{middleware, web, App, HttpServer};
use fanout_service::services::{
    FanoutOptions, FcmClient, FirestoreClient, GoogleAuthenticator, NotificationFanoutService,
    PayloadStyle, ServiceAccountKey,
};
use fanout_service::{handlers, Config};
use std::io;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> io::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    tracing::info!("Starting message fanout service");

    let config = Config::from_env()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("config: {}", e)))?;

    let credentials = ServiceAccountKey::from_file(&config.firebase.credentials_path)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
    let auth = Arc::new(GoogleAuthenticator::new(credentials));

    let store = Arc::new(FirestoreClient::new(
        config.firebase.project_id.clone(),
        config.fanout.users_collection.clone(),
        config.fanout.token_field.clone(),
        auth.clone(),
    ));
    let push = Arc::new(FcmClient::new(config.firebase.project_id.clone(), auth));

    let options = FanoutOptions {
        dm_prefix: config.fanout.dm_prefix.clone(),
        payload_style: PayloadStyle::parse(&config.fanout.payload_style),
    };
    let service = Arc::new(NotificationFanoutService::new(store, push, options));

    let addr = format!("0.0.0.0:{}", config.app.port);
    tracing::info!("Listening for message events on {}", addr);

    let app_config = config.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(web::Data::new(service.clone()))
            .app_data(web::Data::new(app_config.clone()))
            .configure(handlers::register_routes)
    })
    .bind(&addr)?
    .run()
    .await
}
