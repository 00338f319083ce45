// Child process environment (allow-list only)

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};

pub const INSTALL_METHOD_KEY: &str = "INSTALL_METHOD";
pub const INSTALL_METHOD_LOCAL: &str = "local";
pub const PATH_KEY: &str = "PATH";

/// Environment handed to a plugin process
///
/// This is the complete environment of the child: the launcher clears
/// everything it would otherwise inherit and applies only these variables.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChildEnvironment {
    vars: BTreeMap<String, OsString>,
}

impl ChildEnvironment {
    /// Environment for a locally installed plugin: `INSTALL_METHOD=local`
    /// plus the given `PATH`
    pub fn local(path: impl Into<OsString>) -> Self {
        let mut vars = BTreeMap::new();
        vars.insert(INSTALL_METHOD_KEY.to_string(), OsString::from(INSTALL_METHOD_LOCAL));
        vars.insert(PATH_KEY.to_string(), path.into());
        Self { vars }
    }

    /// Same as [`ChildEnvironment::local`], with `PATH` read from the current
    /// process. The value is passed through as raw bytes; an unset `PATH` is
    /// forwarded as empty.
    pub fn local_from_process() -> Self {
        Self::local(std::env::var_os(PATH_KEY).unwrap_or_default())
    }

    pub fn get(&self, key: &str) -> Option<&OsStr> {
        self.vars.get(key).map(OsString::as_os_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OsStr)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_os_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}
