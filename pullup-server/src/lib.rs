use std::{
    env,
    net::{Ipv6Addr, SocketAddr},
    sync::Arc,
};

use axum::{routing::get, Router as AxumRouter};
use log::info;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};

use pullup_core::Config;
use pullup_domain::Domain;

mod auth;
mod comments;
mod context;
mod docs;
mod errors;
mod logging;
mod markers;
mod reports;
mod schemas;
mod serialized;
mod stories;
mod users;
mod ws;

pub use context::ServerContext;
pub use logging::init_logger;

/// The default port the server will listen on.
pub const DEFAULT_PORT: u16 = 9452;

type Router = AxumRouter<ServerContext>;

/// Starts the pullup server
pub async fn run_server(domain: Domain, config: Config) {
    let context = ServerContext {
        domain: Arc::new(domain),
        config,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    context.domain.run_background_tasks(shutdown_rx);

    let port = env::var("PULLUP_SERVER_PORT")
        .map(|x| x.parse::<u16>().expect("Port must be a number"))
        .unwrap_or(DEFAULT_PORT);

    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, port).into();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let version_one_router = Router::new()
        .nest("/auth", auth::router())
        .nest("/markers", markers::router())
        .nest("/comments", comments::router())
        .nest("/reports", reports::router())
        .nest("/users", users::router());

    let root_router = Router::new()
        .nest("/api/v1", version_one_router)
        .merge(ws::router())
        .route("/api.json", get(docs::docs))
        .with_state(context)
        .layer(CatchPanicLayer::new())
        .layer(cors);

    let listener = TcpListener::bind(&addr).await.expect("listens on address");

    info!("Listening on port {port}");

    axum::serve(listener, root_router.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .unwrap();

    // Flip the background loops off so buffered work flushes.
    let _ = shutdown_tx.send(true);
}
