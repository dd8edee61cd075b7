use anyhow::{Result, bail};
use std::io::{self, IsTerminal};
use zeroize::Zeroizing;

pub const PASSWORD_ENV: &str = "PWCRYPT_PASSWORD";

/// Password for decrypting: environment, then piped stdin, then a prompt.
pub fn read_password() -> Result<Zeroizing<String>> {
    if let Some(pw) = from_env() {
        return Ok(pw);
    }
    if let Some(pw) = from_pipe()? {
        return Ok(pw);
    }

    if io::stdin().is_terminal() {
        let pw = Zeroizing::new(rpassword::prompt_password("Password: ")?);
        if !pw.is_empty() {
            return Ok(pw);
        }
    }

    bail!("no password provided (set {PASSWORD_ENV}, pipe it on stdin or run interactively)")
}

/// Password for encrypting. Interactive entry must be typed twice.
pub fn read_new_password() -> Result<Zeroizing<String>> {
    if let Some(pw) = from_env() {
        return Ok(pw);
    }
    if let Some(pw) = from_pipe()? {
        return Ok(pw);
    }
    if !io::stdin().is_terminal() {
        bail!("no password provided (set {PASSWORD_ENV} or pipe it on stdin)");
    }

    let pw1 = Zeroizing::new(rpassword::prompt_password("New password: ")?);
    let pw2 = Zeroizing::new(rpassword::prompt_password("Confirm password: ")?);

    if pw1.is_empty() {
        bail!("password cannot be empty");
    }

    if pw1 != pw2 {
        bail!("passwords do not match");
    }

    Ok(pw1)
}

//  PWCRYPT_PASSWORD="supersecret" pwcrypt decrypt in.pwcr out
fn from_env() -> Option<Zeroizing<String>> {
    std::env::var(PASSWORD_ENV)
        .ok()
        .filter(|pw| !pw.is_empty())
        .map(Zeroizing::new)
}

//  printf "%s" "$SECRET" | pwcrypt encrypt in out
fn from_pipe() -> Result<Option<Zeroizing<String>>> {
    if io::stdin().is_terminal() {
        return Ok(None);
    }

    let mut buf = Zeroizing::new(String::new());
    io::stdin().read_line(&mut buf)?;
    trim_newline(&mut buf);

    Ok((!buf.is_empty()).then_some(buf))
}

fn trim_newline(s: &mut String) {
    while s.ends_with('\n') || s.ends_with('\r') {
        s.pop();
    }
}
