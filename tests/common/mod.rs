#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use axum::Router;
use kbasix::auth::{NoDirectory, SessionCheck};
use kbasix::cms::{Cms, Credentials, Registration};
use kbasix::config::Config;
use kbasix::mail::MemoryMailer;
use kbasix::server::{AppState, create_router};
use kbasix::types::{Account, FileMeta, Session, UploadFields};
use tempfile::TempDir;

pub const PASSWORD: &str = "Secret1234";
pub const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

pub struct TestSite {
    pub temp_dir: TempDir,
    pub cms: Cms,
    pub mailer: Arc<MemoryMailer>,
}

/// A site behind the HTTP router.
pub struct TestApp {
    pub temp_dir: TempDir,
    pub router: Router,
    pub mailer: Arc<MemoryMailer>,
}

impl TestSite {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        Self::build(adjust, MemoryMailer::default())
    }

    pub fn with_failing_mail() -> Self {
        Self::build(|_| {}, MemoryMailer::failing())
    }

    fn build(adjust: impl FnOnce(&mut Config), mailer: MemoryMailer) -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let mut config = Config::default();
        config.server.data_dir = temp_dir.path().to_path_buf();
        config.server.public_base_url = Some("https://files.example.com".to_string());
        config.server.require_secure_transport = false;
        adjust(&mut config);

        let mailer = Arc::new(mailer);
        let cms = Cms::open(config, mailer.clone(), Arc::new(NoDirectory)).expect("open cms");
        Self {
            temp_dir,
            cms,
            mailer,
        }
    }

    pub fn into_app(self) -> TestApp {
        TestApp {
            router: create_router(Arc::new(AppState::new(self.cms))),
            temp_dir: self.temp_dir,
            mailer: self.mailer,
        }
    }

    pub fn registration(name: &str) -> Registration {
        Registration {
            user_name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            first_name: String::new(),
            last_name: String::new(),
            credentials: Credentials::Internal {
                password: PASSWORD.to_string(),
                password_confirmation: PASSWORD.to_string(),
            },
        }
    }

    /// Registers and confirms an account through the mailed link.
    pub fn register(&self, name: &str) -> Account {
        self.cms
            .register(Self::registration(name))
            .expect("register");
        let mail = self.mailer.last().expect("confirmation mail");
        self.cms
            .confirm(&token_from_mail(&mail.body))
            .expect("confirm")
    }

    pub fn login(&self, name: &str) -> Session {
        let success = self
            .cms
            .login(name, PASSWORD, Some(CLIENT))
            .expect("login")
            .expect("credentials accepted");
        self.session(&success.token, "file_manager")
            .expect("fresh token validates")
    }

    pub fn session(&self, token: &str, module: &str) -> Option<Session> {
        self.cms
            .sessions()
            .validate(token, &SessionCheck::new(module, Some(CLIENT)))
            .expect("validate")
    }

    pub async fn upload(&self, session: &Session, title: &str, content: &[u8]) -> FileMeta {
        let mut upload = self.cms.begin_upload(session).await.expect("begin upload");
        upload.write_chunk(content).await.expect("write chunk");
        self.cms
            .finish_upload(
                session,
                upload,
                UploadFields {
                    title: title.to_string(),
                    file_name: format!("{title}.txt"),
                    ..UploadFields::default()
                },
            )
            .await
            .expect("finish upload")
            .file
    }
}

/// Pulls the token out of a mailed `...?token=<token>` link.
pub fn token_from_mail(body: &str) -> String {
    let start = body.find("token=").expect("link in mail") + "token=".len();
    let encoded: String = body[start..]
        .chars()
        .take_while(|c| !c.is_whitespace())
        .collect();
    urlencoding::decode(&encoded).expect("decode token").into_owned()
}
