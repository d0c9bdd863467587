use rocket::data::{self, Data, FromData, Limits};
use rocket::http::{Header, Status};
use rocket::request::{FromRequest, Outcome, Request};
use rocket::response::content::RawJson;
use rocket::serde::json::Json;
use rocket::{get, post, Responder, State};
use serde::{Deserialize, Serialize};

use crate::auth::CurrentUser;
use crate::data::DBConnection;
use crate::error::{BoardError, BoardResult};

use super::data::*;
use super::gateway::BoardSync;

#[derive(Responder)]
pub struct BoardResponse {
    inner: RawJson<String>,
    etag: Header<'static>,
}

#[derive(Responder)]
pub struct SaveResponse {
    inner: Json<SaveBoardResult>,
    etag: Header<'static>,
}

pub fn etag(revision: Revision) -> String {
    format!("\"{}\"", revision)
}

pub fn parse_etag(value: &str) -> Option<Revision> {
    let value = value.trim();
    let value = value.strip_prefix("W/").unwrap_or(value);
    value.trim_matches('"').parse().ok()
}

fn etag_header(revision: Revision) -> Header<'static> {
    Header::new("ETag", etag(revision))
}

/// Parses a board of any nesting depth. The stack grows on demand instead of
/// serde_json's fixed recursion limit.
pub fn parse_board(body: &str) -> BoardResult<Board> {
    let mut json = serde_json::Deserializer::from_str(body);
    json.disable_recursion_limit();

    Board::deserialize(serde_stacker::Deserializer::new(&mut json))
        .and_then(|board| json.end().map(|()| board))
        .map_err(|e| BoardError::validation("board", e.to_string()))
}

pub fn board_json(board: &Board) -> BoardResult<String> {
    let mut body = Vec::new();
    let mut json = serde_json::Serializer::new(&mut body);
    board
        .serialize(serde_stacker::Serializer::new(&mut json))
        .map_err(|e| BoardError::Persistence(e.to_string()))?;

    String::from_utf8(body).map_err(|e| BoardError::Persistence(e.to_string()))
}

/// A JSON board body, bounded by the `json` size limit.
pub struct BoardPayload(pub Board);

#[rocket::async_trait]
impl<'r> FromData<'r> for BoardPayload {
    type Error = BoardError;

    async fn from_data(request: &'r Request<'_>, body: Data<'r>) -> data::Outcome<'r, Self> {
        let limit = request.limits().get("json").unwrap_or(Limits::JSON);
        let text = match body.open(limit).into_string().await {
            Ok(text) if text.is_complete() => text.into_inner(),
            Ok(_) => {
                return data::Outcome::Error((
                    Status::PayloadTooLarge,
                    BoardError::validation("board", format!("body is larger than {}", limit)),
                ))
            }
            Err(e) => {
                return data::Outcome::Error((
                    Status::BadRequest,
                    BoardError::validation("board", e.to_string()),
                ))
            }
        };

        match parse_board(&text) {
            Ok(board) => data::Outcome::Success(BoardPayload(board)),
            Err(e) => data::Outcome::Error((Status::BadRequest, e)),
        }
    }
}

/// Revision named by `If-Match`. Absent or `*` means the save overwrites whatever is stored.
pub struct ExpectedRevision(pub Option<Revision>);

fn expected_revision(if_match: Option<&str>) -> BoardResult<Option<Revision>> {
    match if_match.map(str::trim) {
        None | Some("*") => Ok(None),
        Some(value) => parse_etag(value).map(Some).ok_or_else(|| {
            BoardError::validation("If-Match", format!("{} is not a board revision", value))
        }),
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ExpectedRevision {
    type Error = BoardError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match expected_revision(request.headers().get_one("If-Match")) {
            Ok(revision) => Outcome::Success(ExpectedRevision(revision)),
            Err(e) => Outcome::Error((Status::BadRequest, e)),
        }
    }
}

#[get("/kanban/data")]
pub fn get_board_data(
    user: CurrentUser,
    db_connection: &State<DBConnection>,
) -> BoardResult<BoardResponse> {
    let mut db_connection = db_connection.lock()?;

    let snapshot = db_connection.load_board(user.id)?;

    Ok(BoardResponse {
        inner: RawJson(board_json(&snapshot.board)?),
        etag: etag_header(snapshot.revision),
    })
}

#[post("/kanban/data", format = "json", data = "<board>")]
pub fn save_board_data(
    user: CurrentUser,
    expected_revision: Result<ExpectedRevision, BoardError>,
    board: Result<BoardPayload, BoardError>,
    db_connection: &State<DBConnection>,
) -> BoardResult<SaveResponse> {
    let ExpectedRevision(expected_revision) = expected_revision?;
    let BoardPayload(board) = board?;

    let mut db_connection = db_connection.lock()?;
    let revision = db_connection.save_board(user.id, &board, expected_revision)?;

    Ok(SaveResponse {
        inner: Json(SaveBoardResult {
            success: true,
            revision,
        }),
        etag: etag_header(revision),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etags_round_trip_through_the_header_format() {
        assert_eq!(etag(7), "\"7\"");
        assert_eq!(parse_etag(&etag(7)), Some(7));
        assert_eq!(parse_etag("W/\"3\""), Some(3));
        assert_eq!(parse_etag(" 12 "), Some(12));
        assert_eq!(parse_etag("\"abc\""), None);
        assert_eq!(parse_etag("*"), None);
    }

    #[test]
    fn wildcard_if_match_accepts_any_revision() {
        assert_eq!(expected_revision(None).unwrap(), None);
        assert_eq!(expected_revision(Some("*")).unwrap(), None);
        assert_eq!(expected_revision(Some("\"4\"")).unwrap(), Some(4));

        let error = expected_revision(Some("\"v2\"")).unwrap_err();
        assert_eq!(error.kind(), "validation");
        assert!(error.to_string().contains("If-Match"));
    }

    #[test]
    fn deeply_nested_boards_parse_and_serialize() {
        let depth = 1000;
        let mut body = String::from(r#"{"tasks": ["#);
        for level in 0..depth {
            body.push_str(&format!(
                r#"{{"id": "n{}", "title": "Level {}", "subtasks": ["#,
                level, level
            ));
        }
        for _ in 0..depth {
            body.push_str("]}");
        }
        body.push_str("]}");

        let board = parse_board(&body).unwrap();
        let deepest = board.find_task(&format!("n{}", depth - 1)).unwrap();
        assert_eq!(deepest.title, format!("Level {}", depth - 1));

        let reparsed = parse_board(&board_json(&board).unwrap()).unwrap();
        assert_eq!(reparsed, board);
    }

    #[test]
    fn trailing_input_is_rejected() {
        let error = parse_board(r#"{"tasks": []} {}"#).unwrap_err();

        assert_eq!(error.kind(), "validation");
    }
}
