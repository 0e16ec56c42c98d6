//! List users command handler

use std::io::Write;

use crate::models::user::User;
use crate::services::AuthService;

pub async fn cmd_list_users(auth: &dyn AuthService) -> anyhow::Result<()> {
    let users = auth.list_all_users().await?;
    let mut out = std::io::stdout().lock();
    write_user_table(&mut out, &users)?;
    Ok(())
}

pub(crate) fn write_user_table(out: &mut impl Write, users: &[User]) -> std::io::Result<()> {
    if users.is_empty() {
        writeln!(out, "No users found.")?;
        return Ok(());
    }

    writeln!(
        out,
        "{:<6} {:<20} {:<32} {:<7} {:<5} {:<20}",
        "ID", "USERNAME", "EMAIL", "ACTIVE", "TOTP", "LAST LOGIN"
    )?;
    writeln!(out, "{:-<95}", "")?;

    for user in users {
        let last_login = user
            .last_login_at
            .map_or_else(|| "never".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string());
        writeln!(
            out,
            "{:<6} {:<20} {:<32} {:<7} {:<5} {:<20}",
            user.id,
            user.username,
            user.email,
            if user.is_active { "yes" } else { "no" },
            if user.totp_enabled { "on" } else { "off" },
            last_login
        )?;
    }

    writeln!(out)?;
    writeln!(out, "{} user(s)", users.len())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn renders_one_row_per_user() {
        let user = User {
            id: 7,
            username: "alice".to_string(),
            email: "alice@x".to_string(),
            totp_enabled: true,
            is_active: false,
            last_login_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let mut buf = Vec::new();
        write_user_table(&mut buf, &[user]).unwrap();
        let text = String::from_utf8(buf).unwrap();

        let row = text.lines().nth(2).unwrap();
        assert!(row.starts_with("7 "));
        assert!(row.contains("alice@x"));
        assert!(row.contains("no"));
        assert!(row.contains("never"));
        assert!(text.ends_with("1 user(s)\n"));
    }

    #[test]
    fn empty_table() {
        let mut buf = Vec::new();
        write_user_table(&mut buf, &[]).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "No users found.\n");
    }
}
