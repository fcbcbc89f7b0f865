use flare_invocation::{HttpHandler, Response};
use flare_log::LogError;
use flare_request::HttpRequest;
use http::StatusCode;

/// A minimal function host for wrapped HTTP handlers.
///
/// Failed invocations are answered with `500 Internal Server Error` and the error message as
/// body, unless the handler has already ended the response.
#[derive(Clone, Debug)]
pub struct MiniHost {
    handler: HttpHandler,
}

impl MiniHost {
    /// Creates a host serving `handler`.
    pub fn new(handler: HttpHandler) -> Self {
        Self { handler }
    }

    /// Dispatches one request and returns the written response.
    pub async fn request(&self, request: HttpRequest) -> http::Response<Vec<u8>> {
        let response = Response::new();

        if let Err(error) = self.handler.call(request, response.clone()).await {
            flare_log::debug!("invocation failed: {}", LogError(&*error));

            if !response.is_finished() {
                response.send(StatusCode::INTERNAL_SERVER_ERROR, error.to_string());
            }
        }

        response.to_http()
    }
}
