use std::{convert::Infallible, sync::Arc};

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use pullup_core::Config;
use pullup_domain::Domain;

#[derive(Clone, FromRef)]
pub struct ServerContext {
    pub domain: Arc<Domain>,
    pub config: Config,
}

#[async_trait]
impl FromRequestParts<ServerContext> for ServerContext {
    type Rejection = Infallible;

    async fn from_request_parts(
        _parts: &mut Parts,
        state: &ServerContext,
    ) -> Result<Self, Self::Rejection> {
        let context = ServerContext::from_ref(state);

        Ok(context)
    }
}
