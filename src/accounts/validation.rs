use crate::config::RegistrationConfig;

const EMAIL_PART_MAX_LEN: usize = 50;

fn is_email_local_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '%' | '+' | '-')
}

fn is_email_domain_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-')
}

/// Problems with a requested user name, in the order they are reported.
/// Reserved names are answered as taken.
pub fn check_user_name(config: &RegistrationConfig, user_name: &str) -> Vec<String> {
    let login_name = user_name.to_lowercase();
    let mut problems = Vec::new();

    if !user_name.is_ascii() {
        problems.push("Your user name must be ASCII".to_string());
    }
    if config.reserved_login_names.contains(&login_name) {
        problems.push("That user name is already taken".to_string());
    }
    if config.blacklisted_login_names.contains(&login_name) {
        problems.push("That user name is not permitted".to_string());
    }
    if login_name.len() > config.login_name_max_length {
        problems.push("That user name is too long".to_string());
    }
    if login_name.is_empty() || !login_name.chars().all(|c| c.is_ascii_alphanumeric()) {
        problems.push("Your user name can only contain letters and/or numbers".to_string());
    }
    if config.alpha_start_login_name
        && login_name
            .chars()
            .next()
            .is_some_and(|c| !c.is_ascii_alphabetic())
    {
        problems.push("The user name must begin with a letter".to_string());
    }
    problems
}

pub fn check_email(config: &RegistrationConfig, email: &str) -> Vec<String> {
    let mut problems = Vec::new();
    if !email.is_ascii() {
        problems.push("Your email address must be ASCII".to_string());
    }
    if email.len() > config.email_max_length {
        problems.push("That email address is too long".to_string());
    }
    if !is_valid_email(email) {
        problems.push("Please input a valid email address".to_string());
    }
    problems
}

/// `local@domain.tld`: each of local and domain 1-50 characters, a 2-4
/// letter top-level domain.
#[must_use]
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, host)) = email.split_once('@') else {
        return false;
    };
    let Some((domain, tld)) = host.rsplit_once('.') else {
        return false;
    };

    (1..=EMAIL_PART_MAX_LEN).contains(&local.len())
        && local.chars().all(is_email_local_char)
        && (1..=EMAIL_PART_MAX_LEN).contains(&domain.len())
        && domain.chars().all(is_email_domain_char)
        && (2..=4).contains(&tld.len())
        && tld.chars().all(|c| c.is_ascii_alphabetic())
}

pub fn check_password(config: &RegistrationConfig, password: &str, confirmation: &str) -> Vec<String> {
    let mut problems = Vec::new();
    if password.is_empty() || confirmation.is_empty() {
        problems.push("Please type in your password twice".to_string());
    }
    if password != confirmation {
        problems.push("The passwords do not match".to_string());
    }

    let letters = password.chars().filter(|c| c.is_ascii_alphabetic()).count();
    let digits = password.chars().filter(|c| c.is_ascii_digit()).count();
    if password.chars().count() < config.password_min_length
        || letters < config.password_min_letters
        || digits < config.password_min_digits
    {
        problems.push(format!(
            "Passwords need at least {} characters, including {} letters and {} digits",
            config.password_min_length, config.password_min_letters, config.password_min_digits
        ));
    }
    problems
}
