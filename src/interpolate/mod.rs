//! Post-render interpolation of `@type:name[.prop]@` spans.
//!
//! A second, independent substitution pass from the VM's own `EMIT`-time
//! `interpolate()`: this one runs once over the fully rendered body and
//! talks to external collaborators (secrets, the process environment, a
//! local `setting.sh`), grounded on `template_secrets.py`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::report::ErrorReport;

static VARIABLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"@([A-Za-z_.-]+):([A-Za-z_.-]+)@").unwrap());

static SETTING_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*([A-Za-z][A-Za-z0-9]*)="(.*)"$"#).unwrap());

pub const NODATA: &str = "NODATA";

/// External secret lookup (container-runtime detection, keyring, HTTP
/// fetch, all out of scope here). `prop` selection happens on the
/// implementor's side so callers don't need to hand back a whole mapping
/// just to read one field, unlike `secret.py`'s `Secret.get_secret()`.
pub trait SecretProvider {
    fn get_secret(&self, name: &str, prop: &str) -> Option<String>;
}

/// A `SecretProvider` that never has anything, for templates that don't use
/// `@secret:...@` spans.
pub struct NoSecrets;

impl SecretProvider for NoSecrets {
    fn get_secret(&self, _name: &str, _prop: &str) -> Option<String> {
        None
    }
}

/// `@env:NAME@` lookups against the process environment.
#[derive(Debug, Default)]
pub struct EnvProvider;

impl EnvProvider {
    pub fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// `@setting.sh:NAME@` lookups, parsed lazily from a local `setting.sh` file
/// on first use and cached for the rest of the run.
#[derive(Debug)]
pub struct SettingsFileProvider {
    path: PathBuf,
    cache: RefCell<Option<HashMap<String, String>>>,
}

impl SettingsFileProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: RefCell::new(None),
        }
    }

    pub fn get(&self, name: &str) -> std::io::Result<Option<String>> {
        if self.cache.borrow().is_none() {
            let contents = std::fs::read_to_string(&self.path)?;
            let mut map = HashMap::new();
            for line in contents.lines() {
                if let Some(caps) = SETTING_LINE.captures(line) {
                    map.insert(caps[1].to_owned(), caps[2].to_owned());
                }
            }
            *self.cache.borrow_mut() = Some(map);
        }
        Ok(self.cache.borrow().as_ref().unwrap().get(name).cloned())
    }
}

impl Default for SettingsFileProvider {
    fn default() -> Self {
        Self::new("setting.sh")
    }
}

/// Repeatedly substitutes `@type:name[.prop]@` spans in `body` until none
/// remain. Problems (missing env var, unknown type, unreadable settings
/// file) are recorded in `report` rather than aborting; the offending span
/// is still replaced with [`NODATA`] so the scan is guaranteed to terminate.
pub fn interpolate(
    body: &str,
    secrets: &dyn SecretProvider,
    env: &EnvProvider,
    settings: &SettingsFileProvider,
    report: &mut ErrorReport,
) -> String {
    let mut body = body.to_owned();
    while let Some(caps) = VARIABLE.captures(&body) {
        let span = caps[0].to_owned();
        let vartype = caps[1].to_owned();
        let varname = caps[2].to_owned();

        let value = resolve(&vartype, &varname, secrets, env, settings, report);
        body = body.replace(&span, &value);
    }
    body
}

fn resolve(
    vartype: &str,
    varname: &str,
    secrets: &dyn SecretProvider,
    env: &EnvProvider,
    settings: &SettingsFileProvider,
    report: &mut ErrorReport,
) -> String {
    match vartype {
        "secret" => match varname.split_once('.') {
            Some((name, prop)) => secrets.get_secret(name, prop).unwrap_or_else(|| NODATA.to_owned()),
            None => {
                report.error(format!("secret reference '{varname}' is missing a .property"));
                NODATA.to_owned()
            }
        },
        "env" => env.get(varname).unwrap_or_else(|| {
            report.error(format!("Value error: Unable to get env '{varname}'"));
            NODATA.to_owned()
        }),
        "setting.sh" => match settings.get(varname) {
            Ok(Some(value)) => value,
            Ok(None) => {
                report.error(format!("setting.sh has no entry for '{varname}'"));
                NODATA.to_owned()
            }
            Err(e) => {
                report.error(format!("failed to read setting.sh: {e}"));
                NODATA.to_owned()
            }
        },
        other => {
            report.error(format!("Unknown variable type: '{other}'"));
            NODATA.to_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSecret;
    impl SecretProvider for FixedSecret {
        fn get_secret(&self, name: &str, prop: &str) -> Option<String> {
            if name == "db" && prop == "password" {
                Some("hunter2".to_owned())
            } else {
                None
            }
        }
    }

    #[test]
    fn secret_lookup_substitutes_prop() {
        let mut report = ErrorReport::new();
        let out = interpolate(
            "pw=@secret:db.password@",
            &FixedSecret,
            &EnvProvider,
            &SettingsFileProvider::default(),
            &mut report,
        );
        assert_eq!(out, "pw=hunter2");
    }

    #[test]
    fn missing_secret_renders_nodata() {
        let mut report = ErrorReport::new();
        let out = interpolate(
            "pw=@secret:missing.password@",
            &FixedSecret,
            &EnvProvider,
            &SettingsFileProvider::default(),
            &mut report,
        );
        assert_eq!(out, "pw=NODATA");
    }

    #[test]
    fn env_lookup_uses_process_environment() {
        std::env::set_var("TMPLC_TEST_VAR", "value123");
        let mut report = ErrorReport::new();
        let out = interpolate(
            "v=@env:TMPLC_TEST_VAR@",
            &NoSecrets,
            &EnvProvider,
            &SettingsFileProvider::default(),
            &mut report,
        );
        assert_eq!(out, "v=value123");
        std::env::remove_var("TMPLC_TEST_VAR");
    }

    #[test]
    fn missing_env_is_reported_as_error_and_replaced_with_nodata() {
        std::env::remove_var("TMPLC_DEFINITELY_MISSING");
        let mut report = ErrorReport::new();
        let out = interpolate(
            "v=@env:TMPLC_DEFINITELY_MISSING@",
            &NoSecrets,
            &EnvProvider,
            &SettingsFileProvider::default(),
            &mut report,
        );
        assert_eq!(out, "v=NODATA");
        assert!(report.into_result().is_err());
    }

    #[test]
    fn unknown_type_is_an_error() {
        let mut report = ErrorReport::new();
        let out = interpolate(
            "v=@bogus:X@",
            &NoSecrets,
            &EnvProvider,
            &SettingsFileProvider::default(),
            &mut report,
        );
        assert_eq!(out, "v=NODATA");
        assert!(report.into_result().is_err());
    }

    #[test]
    fn repeated_spans_all_resolve() {
        std::env::set_var("TMPLC_REPEAT", "x");
        let mut report = ErrorReport::new();
        let out = interpolate(
            "@env:TMPLC_REPEAT@ and @env:TMPLC_REPEAT@",
            &NoSecrets,
            &EnvProvider,
            &SettingsFileProvider::default(),
            &mut report,
        );
        assert_eq!(out, "x and x");
        std::env::remove_var("TMPLC_REPEAT");
    }
}
