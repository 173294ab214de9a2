//! Landing pages seeded into an empty document root.

use log::{debug, info};
use std::fs;
use std::io;
use std::path::Path;

const STYLE: &str = "<style>
        body { font-family: sans-serif; background: #f4f4f4; color: #222; }
        .container { max-width: 420px; margin: 80px auto; padding: 24px; background: #fff; border-radius: 6px; }
        h1 { font-size: 1.6em; }
        input { display: block; width: 100%; margin: 8px 0; padding: 6px; }
        button, .button { display: inline-block; margin-top: 8px; padding: 6px 16px; }
    </style>";

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>
<html lang=\"en\">
<head>
    <meta charset=\"UTF-8\">
    <title>{title}</title>
    {STYLE}
</head>
<body>
    <div class=\"container\">
{body}
    </div>
</body>
</html>
"
    )
}

fn credentials_form(action: &str, submit: &str) -> String {
    format!(
        "        <form action=\"{action}\" method=\"post\">
            <input type=\"text\" name=\"user\" placeholder=\"Name\" required>
            <input type=\"password\" name=\"password\" placeholder=\"Password\" required>
            <button type=\"submit\">{submit}</button>
        </form>"
    )
}

pub fn judge_html() -> String {
    page(
        "Welcome",
        "        <h1>Welcome</h1>
        <p>Sign in to continue, or create a new account.</p>
        <a class=\"button\" href=\"/login\">Log in</a>
        <a class=\"button\" href=\"/register\">Register</a>",
    )
}

pub fn log_html() -> String {
    let body = format!(
        "        <h1>Log in</h1>\n{}",
        credentials_form("/login", "Log in")
    );
    page("Log in", &body)
}

pub fn register_html() -> String {
    let body = format!(
        "        <h1>Register</h1>\n{}",
        credentials_form("/register", "Register")
    );
    page("Register", &body)
}

pub fn welcome_html() -> String {
    page(
        "Signed in",
        "        <h1>Signed in</h1>
        <p>You are logged in.</p>
        <a class=\"button\" href=\"/\">Back</a>",
    )
}

pub fn log_error_html() -> String {
    let body = format!(
        "        <h1>Log in failed</h1>
        <p>Unknown user or wrong password.</p>\n{}",
        credentials_form("/login", "Try again")
    );
    page("Log in failed", &body)
}

pub fn register_error_html() -> String {
    let body = format!(
        "        <h1>Registration failed</h1>
        <p>That name is already taken.</p>\n{}",
        credentials_form("/register", "Try again")
    );
    page("Registration failed", &body)
}

/// Creates `document_root` if needed and writes every landing page that
/// does not exist yet. Existing files are left untouched.
pub fn create_default_files(document_root: &Path) -> io::Result<()> {
    fs::create_dir_all(document_root)?;

    let pages: [(&str, fn() -> String); 6] = [
        ("judge.html", judge_html),
        ("log.html", log_html),
        ("register.html", register_html),
        ("welcome.html", welcome_html),
        ("logError.html", log_error_html),
        ("registerError.html", register_error_html),
    ];

    let mut created = 0;
    for (name, content) in pages {
        let path = document_root.join(name);
        if path.exists() {
            debug!("Keeping existing {:?}", path);
            continue;
        }
        fs::write(&path, content())?;
        created += 1;
    }

    if created > 0 {
        info!("Created {} default pages in {:?}", created, document_root);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeds_missing_pages_only() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("judge.html"), "custom").unwrap();

        create_default_files(&root).unwrap();

        assert_eq!(fs::read_to_string(root.join("judge.html")).unwrap(), "custom");
        let log = fs::read_to_string(root.join("log.html")).unwrap();
        assert!(log.contains("action=\"/login\""));
        assert!(root.join("registerError.html").is_file());
    }
}
