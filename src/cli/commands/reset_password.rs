//! Reset password command handler

use anyhow::Context;
use dialoguer::Password;

use crate::services::AuthService;

pub async fn cmd_reset_password(auth: &dyn AuthService, username: &str) -> anyhow::Result<()> {
    let prompt = format!("New password for {username}");
    let password = tokio::task::spawn_blocking(move || {
        Password::new()
            .with_prompt(prompt)
            .with_confirmation("Confirm new password", "Passwords do not match")
            .validate_with(|input: &String| validate_new_password(input))
            .interact()
    })
    .await
    .context("Password prompt panicked")?
    .context("Failed to read password")?;

    auth.reset_password(username, &password).await?;

    println!("✓ Password for '{username}' reset. All of their sessions were signed out.");
    Ok(())
}

/// Rules applied to the prompted password before it is confirmed.
pub fn validate_new_password(password: &str) -> Result<(), &'static str> {
    if password.trim().is_empty() {
        return Err("Password must not be empty");
    }
    Ok(())
}
