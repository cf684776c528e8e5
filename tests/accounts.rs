//! Account flows: registration, confirmation, login and password reset.

mod common;

use common::{CLIENT, PASSWORD, TestSite, token_from_mail};
use kbasix::auth::AuthFailure;
use kbasix::cms::ProfileUpdate;
use kbasix::error::Error;

#[test]
fn test_register_confirm_login() {
    let site = TestSite::new();

    let registered = site
        .cms
        .register(TestSite::registration("Alice"))
        .expect("register");
    assert!(registered.email_sent);
    assert!(registered.account.locked);
    assert!(registered.account.expires.is_some());
    assert_eq!(registered.account.login_name, "alice");

    let mail = site.mailer.last().expect("confirmation mail");
    assert_eq!(mail.to, "alice@example.com");
    assert!(mail.body.contains("https://files.example.com/confirm?token="));

    let refused = site.cms.login("alice", PASSWORD, Some(CLIENT)).unwrap();
    assert_eq!(refused.err(), Some(AuthFailure::Locked));

    // The mailed token only confirms; it opens nothing else.
    let token = token_from_mail(&mail.body);
    assert!(site.session(&token, "file_manager").is_none());
    assert!(site.session(&token, "profile").is_none());

    let account = site.cms.confirm(&token).expect("confirm");
    assert!(!account.locked);
    assert!(account.expires.is_none());

    // The confirmation token is spent.
    assert!(matches!(site.cms.confirm(&token), Err(Error::Unauthorized)));

    let success = site
        .cms
        .login("ALICE", PASSWORD, Some(CLIENT))
        .unwrap()
        .expect("login accepted");
    assert_eq!(success.account.uid, account.uid);
    assert!(site.session(&success.token, "file_manager").is_some());

    let profile = site
        .cms
        .profile(&site.session(&success.token, "profile").unwrap())
        .unwrap();
    assert_eq!(profile.user_name, "Alice");
    assert_eq!(profile.auth_method, "internal");
    assert!(profile.last_login.is_some());
}

#[test]
fn test_login_failures_are_reported() {
    let site = TestSite::new();
    site.register("bob");

    let bad_password = site.cms.login("bob", "Wrong9876", Some(CLIENT)).unwrap();
    assert_eq!(bad_password.err(), Some(AuthFailure::BadPassword));

    let no_user = site.cms.login("nobody", PASSWORD, Some(CLIENT)).unwrap();
    assert_eq!(no_user.err(), Some(AuthFailure::NoSuchUser));
}

#[test]
fn test_banned_login_refused() {
    let site = TestSite::with_config(|config| {
        config.login.banned_logins = vec!["mallory".to_string()];
    });
    site.register("mallory");

    let refused = site.cms.login("mallory", PASSWORD, Some(CLIENT)).unwrap();
    assert_eq!(refused.err(), Some(AuthFailure::Banned));
    assert!(matches!(
        site.cms.request_password_reset("mallory"),
        Err(Error::Forbidden)
    ));
}

#[test]
fn test_registration_rejects_taken_and_reserved_names() {
    let site = TestSite::new();
    site.register("carol");

    let Err(Error::Validation(problems)) = site.cms.register(TestSite::registration("Carol"))
    else {
        panic!("duplicate name accepted");
    };
    assert!(problems.iter().any(|p| p.contains("already taken")));

    let Err(Error::Validation(problems)) = site.cms.register(TestSite::registration("admin"))
    else {
        panic!("reserved name accepted");
    };
    assert!(problems.iter().any(|p| p.contains("already taken")));
}

#[test]
fn test_registration_collects_every_problem() {
    let site = TestSite::new();
    let mut registration = TestSite::registration("9lives");
    registration.email = "not-an-address".to_string();
    registration.credentials = kbasix::cms::Credentials::Internal {
        password: "short".to_string(),
        password_confirmation: "other".to_string(),
    };

    let Err(Error::Validation(problems)) = site.cms.register(registration) else {
        panic!("bad registration accepted");
    };
    assert!(problems.len() >= 3, "{problems:?}");
    assert!(site.mailer.sent().is_empty());
}

#[test]
fn test_expired_unconfirmed_name_can_be_reused() {
    let site = TestSite::with_config(|config| config.session.confirmation_timeout = 1);
    site.cms
        .register(TestSite::registration("dave"))
        .expect("first registration");

    std::thread::sleep(std::time::Duration::from_millis(1100));

    let again = site
        .cms
        .register(TestSite::registration("dave"))
        .expect("name of an expired registration is free");
    assert!(again.account.locked);
    assert_eq!(site.mailer.sent().len(), 2);
}

#[test]
fn test_failed_confirmation_mail_keeps_account() {
    let site = TestSite::with_failing_mail();
    let registered = site
        .cms
        .register(TestSite::registration("erin"))
        .expect("register");

    assert!(!registered.email_sent);
    assert!(
        site.cms
            .accounts()
            .lookup("erin")
            .unwrap()
            .is_some_and(|account| account.locked)
    );
}

#[test]
fn test_password_reset_opens_profile_only() {
    let site = TestSite::new();
    site.register("frank");

    assert!(site.cms.request_password_reset("Frank").unwrap());
    let mail = site.mailer.last().expect("reset mail");
    assert!(mail.body.contains("/profile?token="));
    let token = token_from_mail(&mail.body);

    assert!(site.session(&token, "file_manager").is_none());
    let session = site.session(&token, "profile").expect("profile opens");

    site.cms
        .update_profile(
            &session,
            ProfileUpdate {
                password: Some("Changed5678".to_string()),
                password_confirmation: Some("Changed5678".to_string()),
                ..ProfileUpdate::default()
            },
        )
        .expect("password changed");

    let old = site.cms.login("frank", PASSWORD, Some(CLIENT)).unwrap();
    assert_eq!(old.err(), Some(AuthFailure::BadPassword));
    assert!(
        site.cms
            .login("frank", "Changed5678", Some(CLIENT))
            .unwrap()
            .is_ok()
    );
}

#[test]
fn test_password_reset_refused_for_unconfirmed_account() {
    let site = TestSite::new();
    site.cms
        .register(TestSite::registration("gina"))
        .expect("register");

    assert!(matches!(
        site.cms.request_password_reset("gina"),
        Err(Error::Forbidden)
    ));
    assert!(matches!(
        site.cms.request_password_reset("nobody"),
        Err(Error::Forbidden)
    ));
}

#[test]
fn test_logout_revokes_token() {
    let site = TestSite::new();
    site.register("hank");
    let session = site.login("hank");

    site.cms.logout(&session).expect("logout");
    assert!(site.session(&session.token, "file_manager").is_none());
}
