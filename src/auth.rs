use anyhow::{bail, Result};
use std::io::{self, BufRead, IsTerminal, Write};
use zeroize::Zeroizing;

pub const PASSWORD_ENV: &str = "BITWILL_PASSWORD";

/// Environment variable, then piped stdin, then an interactive prompt.
pub fn read_password(prompt: &str) -> Result<Zeroizing<String>> {
    //  BITWILL_PASSWORD="supersecret" bitwill backup export-json out.json
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        if !pw.is_empty() {
            return Ok(Zeroizing::new(pw));
        }
    }

    //  printf "%s" "$PW" | bitwill qr decode <payload>
    if !io::stdin().is_terminal() {
        let mut buf = Zeroizing::new(String::new());
        io::stdin().read_line(&mut buf)?;
        trim_newline(&mut buf);

        if !buf.is_empty() {
            return Ok(buf);
        }
    }

    if io::stdin().is_terminal() {
        let pw = Zeroizing::new(rpassword::prompt_password(prompt)?);
        if !pw.is_empty() {
            return Ok(pw);
        }
    }

    bail!("no password provided (set {PASSWORD_ENV}, pipe it on stdin, or run interactively)")
}

/// Like [`read_password`], but an interactive user types it twice.
pub fn read_new_password(prompt: &str) -> Result<Zeroizing<String>> {
    if std::env::var(PASSWORD_ENV).is_ok_and(|pw| !pw.is_empty()) || !io::stdin().is_terminal() {
        return read_password(prompt);
    }

    let pw1 = Zeroizing::new(rpassword::prompt_password(prompt)?);
    let pw2 = Zeroizing::new(rpassword::prompt_password("Confirm password: ")?);

    if pw1.is_empty() {
        bail!("password cannot be empty");
    }
    if pw1 != pw2 {
        bail!("passwords do not match");
    }
    Ok(pw1)
}

/// One line from stdin, used for challenge answers and confirmations.
pub fn read_line(prompt: &str) -> Result<String> {
    eprint!("{prompt}");
    io::stderr().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    trim_newline(&mut line);
    Ok(line)
}

pub fn is_interactive() -> bool {
    io::stdin().is_terminal()
}

fn trim_newline(s: &mut String) {
    while s.ends_with('\n') || s.ends_with('\r') {
        s.pop();
    }
}
