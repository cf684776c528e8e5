use serde::{Deserialize, Serialize};

use crate::types::{Account, Uid};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(alias = "user_name")]
    pub login_name: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub uid: Uid,
    pub user_name: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub uid: Uid,
    pub user_name: String,
    pub email: String,
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            uid: account.uid,
            user_name: account.user_name,
            email: account.email,
            locked: account.locked,
            expires: account.expires,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub account: AccountResponse,
    pub email_sent: bool,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetRequest {
    #[serde(alias = "user_name")]
    pub login_name: String,
}

#[derive(Debug, Serialize)]
pub struct PasswordResetResponse {
    pub email_sent: bool,
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteRequest {
    pub file_tags: Vec<String>,
}
