//! Command response framing and error-code mapping
//!
//! Every command response is `( success ( ... ) )` or
//! `( failure ( ( code message file line ) ) )`. The code numbers follow
//! svn_error_codes.h so stock clients print their usual messages.

use svngit_core::BridgeError;

use crate::items::{encode, Item};

pub const SVN_ERR_FS_NO_SUCH_REVISION: u64 = 160006;
pub const SVN_ERR_FS_NOT_FOUND: u64 = 160013;
pub const SVN_ERR_FS_CONFLICT: u64 = 160024;
pub const SVN_ERR_FS_TXN_OUT_OF_DATE: u64 = 160028;
pub const SVN_ERR_FS_PATH_ALREADY_LOCKED: u64 = 160035;
pub const SVN_ERR_FS_BAD_LOCK_TOKEN: u64 = 160037;
pub const SVN_ERR_FS_NO_SUCH_LOCK: u64 = 160040;
pub const SVN_ERR_RA_NOT_AUTHORIZED: u64 = 170001;
pub const SVN_ERR_UNSUPPORTED_FEATURE: u64 = 200007;
pub const SVN_ERR_RA_SVN_MALFORMED_DATA: u64 = 210004;
pub const SVN_ERR_BASE: u64 = 200000;

/// Numeric code a `BridgeError` maps to in a failure response
pub fn error_code(error: &BridgeError) -> u64 {
    match error {
        BridgeError::NoSuchRevision(_) => SVN_ERR_FS_NO_SUCH_REVISION,
        BridgeError::NotFound(_) => SVN_ERR_FS_NOT_FOUND,
        BridgeError::OutOfDate { .. } => SVN_ERR_FS_TXN_OUT_OF_DATE,
        BridgeError::ConcurrentModification => SVN_ERR_FS_CONFLICT,
        BridgeError::AlreadyLocked { .. } => SVN_ERR_FS_PATH_ALREADY_LOCKED,
        BridgeError::InvalidToken { .. } => SVN_ERR_FS_BAD_LOCK_TOKEN,
        BridgeError::NotLocked { .. } => SVN_ERR_FS_NO_SUCH_LOCK,
        BridgeError::LockMismatch { .. } => SVN_ERR_FS_BAD_LOCK_TOKEN,
        BridgeError::LockTimeout => SVN_ERR_FS_PATH_ALREADY_LOCKED,
        BridgeError::AuthFailure(_) => SVN_ERR_RA_NOT_AUTHORIZED,
        BridgeError::ProtocolViolation(_) => SVN_ERR_RA_SVN_MALFORMED_DATA,
        BridgeError::PropertyUnsupported { .. } => SVN_ERR_UNSUPPORTED_FEATURE,
        _ => SVN_ERR_BASE,
    }
}

/// `( success ( body... ) )`
pub fn success(body: Vec<Item>) -> Vec<u8> {
    encode(&Item::list(vec![Item::word("success"), Item::list(body)]))
}

/// `( failure ( ( code message file line ) ) )`
pub fn failure(error: &BridgeError) -> Vec<u8> {
    let detail = Item::list(vec![
        Item::Number(error_code(error)),
        Item::str(&error.to_string()),
        Item::str(""),
        Item::Number(0),
    ]);
    encode(&Item::list(vec![
        Item::word("failure"),
        Item::list(vec![detail]),
    ]))
}

/// Auth request: `( success ( ( mechs... ) realm ) )`
///
/// An empty mechanism list is the re-auth point marker meaning "nothing
/// further required".
pub fn auth_request(mechanisms: &[&str], realm: &str) -> Vec<u8> {
    let mechs = mechanisms.iter().map(|m| Item::word(m)).collect();
    success(vec![Item::List(mechs), Item::str(realm)])
}

/// Optional value encoded as a zero-or-one element list
pub fn optional(value: Option<Item>) -> Item {
    Item::List(value.into_iter().collect())
}

/// Timestamps on the wire use SVN's ISO-8601 form with microseconds
pub fn svn_date(timestamp: i64) -> String {
    use chrono::TimeZone;
    match chrono::Utc.timestamp_opt(timestamp, 0) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%dT%H:%M:%S.%6fZ").to_string(),
        _ => "1970-01-01T00:00:00.000000Z".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::parse_item;

    #[test]
    fn test_success_framing() {
        let bytes = success(vec![Item::Number(7)]);
        let (item, _) = parse_item(&bytes).unwrap().unwrap();
        let outer = item.as_list().unwrap();
        assert_eq!(outer[0].as_word().unwrap(), "success");
        assert_eq!(outer[1].as_list().unwrap()[0].as_number().unwrap(), 7);
    }

    #[test]
    fn test_failure_carries_code() {
        let err = BridgeError::NoSuchRevision(9);
        let bytes = failure(&err);
        let (item, _) = parse_item(&bytes).unwrap().unwrap();
        let outer = item.as_list().unwrap();
        assert_eq!(outer[0].as_word().unwrap(), "failure");
        let detail = outer[1].as_list().unwrap()[0].as_list().unwrap();
        assert_eq!(detail[0].as_number().unwrap(), SVN_ERR_FS_NO_SUCH_REVISION);
    }

    #[test]
    fn test_svn_date_format() {
        assert_eq!(svn_date(0), "1970-01-01T00:00:00.000000Z");
        assert_eq!(svn_date(1_700_000_000), "2023-11-14T22:13:20.000000Z");
    }
}
