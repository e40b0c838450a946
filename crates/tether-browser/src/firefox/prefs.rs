//! `user.js` handling. Values are kept as raw JS literals; only keys are
//! decoded.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;

lazy_static! {
    static ref USER_PREF: Regex =
        Regex::new(r#"^\s*user_pref\(\s*("(?:[^"\\]|\\.)*")\s*,\s*(.+?)\s*\)\s*;"#).unwrap();
}

/// Flat pref map, key to literal
pub type Prefs = BTreeMap<String, String>;

/// Set by every launch regardless of what the user put in `user.js`
const REQUIRED_OVERRIDES: &[(&str, &str)] = &[
    ("app.update.enabled", "false"),
    ("app.update.auto", "false"),
    ("app.update.checkInstallTime", "false"),
    ("browser.shell.checkDefaultBrowser", "false"),
    ("network.captive-portal-service.enabled", "false"),
    ("captivedetect.canonicalURL", r#""""#),
    ("toolkit.telemetry.enabled", "false"),
    ("toolkit.telemetry.reportingpolicy.firstRun", "false"),
    ("datareporting.policy.dataSubmissionEnabled", "false"),
    ("datareporting.healthreport.uploadEnabled", "false"),
    ("browser.startup.homepage_override.mstone", r#""ignore""#),
    ("startup.homepage_welcome_url", r#""""#),
    ("browser.aboutwelcome.enabled", "false"),
    ("browser.uitour.enabled", "false"),
    ("browser.warnOnQuit", "false"),
    ("browser.showQuitWarning", "false"),
    ("browser.tabs.warnOnClose", "false"),
    ("browser.tabs.warnOnCloseOtherTabs", "false"),
    ("privacy.sanitize.sanitizeOnShutdown", "true"),
    ("privacy.clearOnShutdown.history", "true"),
    ("privacy.clearOnShutdown.cache", "true"),
    ("privacy.clearOnShutdown.cookies", "true"),
    ("privacy.clearOnShutdown.downloads", "true"),
    ("privacy.clearOnShutdown.sessions", "true"),
    ("privacy.clearOnShutdown.openWindows", "false"),
];

/// Parse `user_pref("key", value);` lines. Anything else is dropped.
pub fn parse_user_js(contents: &str) -> Prefs {
    contents
        .lines()
        .filter_map(|line| {
            let captures = USER_PREF.captures(line)?;
            let key: String = serde_json::from_str(&captures[1]).ok()?;
            Some((key, captures[2].to_string()))
        })
        .collect()
}

pub fn serialize_user_js(prefs: &Prefs) -> String {
    prefs
        .iter()
        .map(|(key, value)| format!("user_pref({}, {});\n", string_literal(key), value))
        .collect()
}

pub fn string_literal(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

pub fn proxy_prefs(host: &str, port: u16) -> Prefs {
    let host = string_literal(host);
    let port = port.to_string();
    [
        ("network.proxy.type", "1".to_string()),
        ("network.proxy.http", host.clone()),
        ("network.proxy.http_port", port.clone()),
        ("network.proxy.ssl", host),
        ("network.proxy.ssl_port", port),
        ("network.proxy.no_proxies_on", string_literal("")),
        ("network.proxy.allow_hijacking_localhost", "true".to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Existing prefs with the proxy settings and required overrides on top
pub fn merged_prefs(existing: Prefs, host: &str, port: u16) -> Prefs {
    let mut prefs = existing;
    prefs.extend(proxy_prefs(host, port));
    prefs.extend(
        REQUIRED_OVERRIDES
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string())),
    );
    prefs
}
