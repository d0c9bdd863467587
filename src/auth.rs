use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};

use crate::data::UserID;
use crate::error::BoardError;

/// Private cookie set by the login flow, holding the numeric user id.
pub const SESSION_COOKIE: &str = "user_id";

/// The user every board request acts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: UserID,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for CurrentUser {
    type Error = BoardError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let user_id = request
            .cookies()
            .get_private(SESSION_COOKIE)
            .and_then(|cookie| cookie.value().parse::<UserID>().ok());

        match user_id {
            Some(id) => Outcome::Success(CurrentUser { id }),
            None => Outcome::Error((Status::Unauthorized, BoardError::Unauthenticated)),
        }
    }
}
