use tracing::error;

use crate::server::response::ApiError;
use crate::types::FileTag;

const MAX_LOGIN_NAME_LEN: usize = 100;

/// File tags end up in paths; a malformed one never comes from a
/// well-behaved client and is logged as such.
pub fn parse_file_tag(raw: &str, acting: &str) -> Result<FileTag, ApiError> {
    FileTag::parse(raw).map_err(|_| {
        error!("Malformed file tag from {acting}: {raw:?}");
        ApiError::bad_request("Invalid file tag")
    })
}

pub fn validate_login_name(name: &str) -> Result<(), ApiError> {
    if name.is_empty() {
        return Err(ApiError::bad_request("User name cannot be empty"));
    }
    if name.len() > MAX_LOGIN_NAME_LEN {
        return Err(ApiError::bad_request(format!(
            "User name cannot exceed {MAX_LOGIN_NAME_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_tag() {
        let tag = FileTag::generate();
        assert_eq!(parse_file_tag(tag.as_str(), "alice").unwrap(), tag);
        assert!(parse_file_tag("../alice", "alice").is_err());
    }

    #[test]
    fn test_validate_login_name() {
        assert!(validate_login_name("alice").is_ok());
        assert!(validate_login_name("").is_err());
        assert!(validate_login_name(&"a".repeat(101)).is_err());
    }
}
