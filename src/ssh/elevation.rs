//! Privilege escalation command wrapping
//!
//! Each escalated command is wrapped so that it:
//! - prints a per-invocation success key before running the real command,
//!   letting the negotiator tell escalation noise from command output
//! - uses a per-invocation password prompt where the method allows it

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use rand::Rng;
use regex::Regex;

use super::sanitize::shell_quote;
use crate::error::TransportError;

/// Localized `su` password prompts
const SU_PROMPT_LOCALIZATIONS: &[&str] = &[
    "Password",
    "암호",
    "パスワード",
    "Adgangskode",
    "Contraseña",
    "Contrasenya",
    "Hasło",
    "Heslo",
    "Jelszó",
    "Lösenord",
    "Mật khẩu",
    "Mot de passe",
    "Parola",
    "Parool",
    "Pasahitza",
    "Passord",
    "Passwort",
    "Salasana",
    "Sandi",
    "Senha",
    "Wachtwoord",
    "ססמה",
    "Лозинка",
    "Парола",
    "Пароль",
    "गुप्तशब्द",
    "शब्दकूट",
    "సంకేతపదము",
    "හස්පදය",
    "密码",
    "密碼",
];

static SU_PROMPT_RE: LazyLock<Regex> = LazyLock::new(|| {
    let alternatives = SU_PROMPT_LOCALIZATIONS
        .iter()
        .map(|p| regex::escape(p))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)^(\w+'s )?({}) ?(:|：) ?$", alternatives))
        .expect("su prompt pattern is valid")
});

/// Returns true when the last line of `text` is a (localized) su prompt
pub fn is_su_prompt(text: &str) -> bool {
    let last_line = text.rsplit(['\n', '\r']).next().unwrap_or(text);
    SU_PROMPT_RE.is_match(last_line.trim_start())
}

/// Escalation methods this transport can drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BecomeMethod {
    Sudo,
    Su,
    Pbrun,
}

impl BecomeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BecomeMethod::Sudo => "sudo",
            BecomeMethod::Su => "su",
            BecomeMethod::Pbrun => "pbrun",
        }
    }

    /// Phrase the method prints after a rejected password
    pub fn incorrect_password_phrase(&self) -> &'static str {
        match self {
            BecomeMethod::Sudo => "Sorry, try again.",
            BecomeMethod::Su => "Authentication failure",
            BecomeMethod::Pbrun => "",
        }
    }
}

impl fmt::Display for BecomeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BecomeMethod {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sudo" => Ok(BecomeMethod::Sudo),
            "su" => Ok(BecomeMethod::Su),
            "pbrun" => Ok(BecomeMethod::Pbrun),
            other => Err(TransportError::setup(format!(
                "Internal Error: this module does not support running commands via {}",
                other
            ))),
        }
    }
}

/// A wrapped escalation command and what to look for in its output
#[derive(Debug, Clone)]
pub struct BecomeCommand {
    /// Full remote command string, ready to append to the ssh argv
    pub command: String,

    /// Password prompt to wait for; `None` means detect localized su prompts
    pub prompt: Option<String>,

    /// Printed by the remote side once escalation succeeded
    pub success_key: String,
}

fn random_key() -> String {
    let mut rng = rand::thread_rng();
    (0..32)
        .map(|_| rng.gen_range(b'a'..=b'z') as char)
        .collect()
}

/// Wraps `cmd` for execution as `user` through `method`.
///
/// `shell` runs both the escalation program and the wrapped command.
/// `exe` overrides the method's default program.
pub fn make_become_cmd(
    cmd: &str,
    user: &str,
    shell: &str,
    method: BecomeMethod,
    exe: Option<&str>,
) -> BecomeCommand {
    make_become_cmd_with_key(cmd, user, shell, method, exe, &random_key())
}

fn make_become_cmd_with_key(
    cmd: &str,
    user: &str,
    shell: &str,
    method: BecomeMethod,
    exe: Option<&str>,
    randbits: &str,
) -> BecomeCommand {
    let success_key = format!("BECOME-SUCCESS-{}", randbits);
    let payload = shell_quote(&format!("echo {}; {}", success_key, cmd));

    let (becomecmd, prompt) = match method {
        BecomeMethod::Sudo => {
            // -k forces a prompt whenever a password is required
            let prompt = format!("[sudo via ssh-transport, key={}] password: ", randbits);
            let exe = exe.unwrap_or("sudo");
            let becomecmd = format!(
                "{exe} -k && {exe} -H -S -p \"{prompt}\" -u {user} {shell} -c {payload}"
            );
            (becomecmd, Some(prompt))
        }
        BecomeMethod::Su => {
            let exe = exe.unwrap_or("su");
            (format!("{exe}  {user} -c \"{shell} -c {payload}\""), None)
        }
        BecomeMethod::Pbrun => {
            let exe = exe.unwrap_or("pbrun");
            (
                format!("{exe} -b -l  -u {user} \"{payload}\""),
                Some("assword:".to_string()),
            )
        }
    };

    BecomeCommand {
        command: format!("{} -c {}", shell, shell_quote(&becomecmd)),
        prompt,
        success_key,
    }
}
