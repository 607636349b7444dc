use keypost_lib::errors::ServiceError;
use rocket::http::Status;
use rocket::response::Responder;
use rocket::Request;
use tracing::error;

/// Maps the typed service failures onto HTTP responses. Bodies stay
/// terse; the full error goes to the log only.
pub struct ApiError(ServiceError);

impl ApiError {
    fn status(&self) -> Status {
        match &self.0 {
            e if e.is_input_error() => Status::BadRequest,
            ServiceError::NotFound => Status::NotFound,
            ServiceError::AlreadyExists => Status::Conflict,
            _ => Status::InternalServerError,
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for ApiError {
    fn respond_to(self, request: &'r Request<'_>) -> rocket::response::Result<'o> {
        error!("ERROR_RESPONSE: {:#?}", self.0);
        let status = self.status();
        let message = if status == Status::InternalServerError {
            "internal server error".to_string()
        } else {
            self.0.to_string()
        };
        rocket::response::status::Custom(status, message).respond_to(request)
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        ApiError(e)
    }
}
