use crate::api::ApiRequest;
use crate::session::Session;

/// Attach the session's access token as the bearer credential.
///
/// With no session the request goes out anonymously, unchanged.
pub fn authorize(mut request: ApiRequest, session: Option<&Session>) -> ApiRequest {
    if let Some(session) = session {
        request.bearer = Some(session.access_token().to_string());
    }
    request
}
