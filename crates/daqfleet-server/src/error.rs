use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use daqfleet_core::DaqError;

// ---------------------------------------------------------------------------
// AppError — unified error type for HTTP responses
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        match self.0.downcast_ref::<DaqError>() {
            Some(e) => match e {
                DaqError::EmptyHostList
                | DaqError::UnknownVerb(_)
                | DaqError::UnknownDirection(_)
                | DaqError::InvalidCommand { .. }
                | DaqError::UnknownHost(_) => StatusCode::BAD_REQUEST,
                DaqError::RunNotFound(_) | DaqError::TopologyNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                DaqError::InvalidTopology(_)
                | DaqError::Launch(_)
                | DaqError::Io(_)
                | DaqError::Yaml(_)
                | DaqError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn run_not_found_maps_to_404() {
        let err = AppError(DaqError::RunNotFound(Uuid::new_v4()).into());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unknown_host_maps_to_400() {
        let err = AppError(DaqError::UnknownHost("node42".into()).into());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn empty_host_list_maps_to_400() {
        let err = AppError(DaqError::EmptyHostList.into());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn invalid_command_maps_to_400() {
        let err = AppError(
            DaqError::InvalidCommand {
                verb: "init".into(),
                reason: "target 'pwcs' is not valid for this verb".into(),
            }
            .into(),
        );
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn unknown_direction_maps_to_400() {
        let err = AppError(DaqError::UnknownDirection("sideways".into()).into());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn launch_failure_maps_to_500() {
        let err = AppError(DaqError::Launch("ssh: not found".into()).into());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn io_error_maps_to_500() {
        let io_err = std::io::Error::other("disk full");
        let err = AppError(DaqError::Io(io_err).into());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn non_daq_error_maps_to_500() {
        let err = AppError(anyhow::anyhow!("something unexpected"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn response_body_contains_error_field() {
        let err = AppError(DaqError::UnknownVerb("reboot".into()).into());
        let response = err.into_response();
        let ct = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .expect("should have content-type");
        assert!(
            ct.to_str().unwrap().contains("application/json"),
            "expected JSON content type, got {:?}",
            ct
        );
    }
}
