// JSON body extractor whose rejections use the API error shape
use axum::async_trait;
use axum::extract::{FromRequest, Request};
use axum::response::Response;
use axum::Json;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::handlers::error_response;

/// `Json<T>`, except a bad body comes back as `{"error": "..."}` with the
/// status axum would have used (400, 415 or 422).
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => {
                debug!(status = %rejection.status(), reason = %rejection.body_text(), "Request body rejected");
                Err(error_response(rejection.status(), rejection.body_text()))
            }
        }
    }
}
