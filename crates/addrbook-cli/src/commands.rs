use std::io::{self, BufRead, Write};

use anyhow::{anyhow, bail, Context, Result};
use tracing::warn;

use addrbook_core::api::Method;
use addrbook_core::{ApiClient, ApiError, ApiRequest, Config, Registration};

/// Environment variables consulted before prompting
const USERNAME_ENV: &str = "ADDRBOOK_USERNAME";
const PASSWORD_ENV: &str = "ADDRBOOK_PASSWORD";

/// Maximum length for username input.
const MAX_USERNAME_LENGTH: usize = 50;

/// Maximum length for password input.
/// 128 chars accommodates password managers and passphrases.
const MAX_PASSWORD_LENGTH: usize = 128;

pub async fn login(client: &ApiClient, mut config: Config, username: Option<String>) -> Result<()> {
    let username = match username
        .or_else(|| std::env::var(USERNAME_ENV).ok())
        .filter(|u| !u.trim().is_empty())
    {
        Some(username) => username,
        None => prompt_username(config.last_username.as_deref())?,
    };
    let password = match std::env::var(PASSWORD_ENV) {
        Ok(password) if !password.is_empty() => password,
        _ => rpassword::prompt_password("Password: ")?,
    };
    validate_input(&username, &password)?;

    let session = client
        .controller()
        .login(username.trim(), &password)
        .await
        .map_err(|e| anyhow!(e.user_message()))?;

    config.last_username = Some(username.trim().to_string());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    let name = session
        .identity()
        .map(|i| i.display_name().to_string())
        .unwrap_or_else(|| username.trim().to_string());
    println!("Logged in as {}", name);
    Ok(())
}

pub async fn register(
    client: &ApiClient,
    full_name: String,
    email: String,
    username: String,
) -> Result<()> {
    let password = rpassword::prompt_password("Password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if password != confirm {
        bail!("Passwords do not match");
    }
    validate_input(&username, &password)?;

    let registration = Registration {
        full_name,
        email,
        username,
        password,
    };
    client
        .controller()
        .register(&registration)
        .await
        .map_err(|e| anyhow!(e.user_message()))?;

    println!("Account created. Run `addrbook login` to sign in.");
    Ok(())
}

pub async fn logout(client: &ApiClient) -> Result<()> {
    if !client.controller().is_authenticated() {
        println!("Not logged in");
        return Ok(());
    }
    client.controller().logout().await;
    Ok(())
}

pub fn whoami(client: &ApiClient) -> Result<()> {
    match client.controller().current() {
        Some(session) => match session.identity() {
            Some(identity) => {
                println!("{}", identity.display_name());
                if let Some(ref email) = identity.email {
                    println!("  email: {}", email);
                }
                if let Some(ref id) = identity.id {
                    println!("  id:    {}", id);
                }
            }
            None => println!("Logged in (no cached profile)"),
        },
        None => println!("Not logged in"),
    }
    Ok(())
}

pub async fn call(
    client: &ApiClient,
    method: &str,
    path: String,
    params: Vec<(String, String)>,
) -> Result<()> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method: {}", method))?;

    let as_query = method == Method::GET || method == Method::DELETE;
    let request = params
        .into_iter()
        .fold(ApiRequest::new(method, path), |request, (key, value)| {
            if as_query {
                request.query(key, value)
            } else {
                request.form(key, value)
            }
        });

    let response = match client.send(request).await {
        Ok(response) => response,
        Err(ApiError::SessionExpired) => bail!("Session expired - please log in again"),
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_str::<serde_json::Value>(&response.body) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{}", response.body),
    }
    Ok(())
}

/// Parse a `key=value` command line parameter
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{}`", s))?;
    if key.is_empty() {
        return Err(format!("empty key in `{}`", s));
    }
    Ok((key.to_string(), value.to_string()))
}

fn prompt_username(last: Option<&str>) -> Result<String> {
    match last {
        Some(last) => print!("Username [{}]: ", last),
        None => print!("Username: "),
    }
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let entered = line.trim();
    match (entered.is_empty(), last) {
        (true, Some(last)) => Ok(last.to_string()),
        _ => Ok(entered.to_string()),
    }
}

fn validate_input(username: &str, password: &str) -> Result<()> {
    let username = username.trim();
    if username.is_empty() || password.is_empty() {
        bail!("Username and password required");
    }
    if username.chars().count() > MAX_USERNAME_LENGTH {
        bail!("Username must be at most {} characters", MAX_USERNAME_LENGTH);
    }
    if password.chars().count() > MAX_PASSWORD_LENGTH {
        bail!("Password must be at most {} characters", MAX_PASSWORD_LENGTH);
    }
    Ok(())
}
