//! Runtime acquisition: from the hosting root to a started host.

use std::fmt;

use log::{debug, info};

use crate::{
    config::LoaderConfig,
    runtime::{CurrentHost, ExecutionDomain, LegacyHost, Platform, RuntimeInfo, RuntimeRoot},
    Error, Result,
};

/// Which host generation to acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostMode {
    /// `ICorRuntimeHost`: explicit default domain, images from memory
    Legacy,
    /// `ICLRRuntimeHost`: implicit default domain, images by path only
    Current,
}

enum Host {
    Legacy(Box<dyn LegacyHost>),
    Current(Box<dyn CurrentHost>),
}

/// A started runtime and every handle acquired on the way to it.
///
/// Fields are declared in reverse acquisition order, so dropping a `Runtime` releases the
/// domain, then the host, then the version info, then the root.
pub struct Runtime {
    domain: Option<Box<dyn ExecutionDomain>>,
    host: Host,
    info: Box<dyn RuntimeInfo>,
    root: Box<dyn RuntimeRoot>,
    version: String,
}

impl Runtime {
    /// The version string of the acquired runtime.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The host generation that was acquired.
    pub fn mode(&self) -> HostMode {
        match self.host {
            Host::Legacy(_) => HostMode::Legacy,
            Host::Current(_) => HostMode::Current,
        }
    }

    /// The default execution domain; only present for [`HostMode::Legacy`].
    pub fn domain(&self) -> Option<&dyn ExecutionDomain> {
        self.domain.as_deref()
    }

    /// The current-generation host; only present for [`HostMode::Current`].
    pub fn current_host(&self) -> Option<&dyn CurrentHost> {
        match &self.host {
            Host::Current(host) => Some(host.as_ref()),
            Host::Legacy(_) => None,
        }
    }

    /// The version info the host was obtained from.
    pub fn info(&self) -> &dyn RuntimeInfo {
        self.info.as_ref()
    }

    /// The hosting root the runtime was selected from.
    pub fn root(&self) -> &dyn RuntimeRoot {
        self.root.as_ref()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("version", &self.version)
            .field("mode", &self.mode())
            .field("domain", &self.domain.is_some())
            .finish()
    }
}

/// Picks the runtime version to host.
///
/// The first version containing `requested` wins; if none does, the last enumerated version
/// is used. Returns `None` only for an empty list.
pub fn select_version<'a>(installed: &'a [String], requested: &str) -> Option<&'a str> {
    installed
        .iter()
        .find(|version| version.contains(requested))
        .or_else(|| installed.last())
        .map(String::as_str)
}

/// Acquires and starts a runtime host.
///
/// For [`HostMode::Legacy`] the default execution domain is acquired as well. Every handle
/// obtained before a failure is released, in reverse order, before the error is returned.
///
/// # Errors
/// - [`Error::NoRuntimeFound`] if no runtime is installed
/// - [`Error::RuntimeNotLoadable`] if the selected runtime cannot be loaded
/// - [`Error::LegacyBindFailed`] if legacy binding is configured and fails
/// - [`Error::HostStartFailed`] if the host cannot be obtained or started
/// - [`Error::Native`] for failures of the root, enumeration, lookup or domain calls
pub fn acquire_runtime(
    platform: &dyn Platform,
    config: &LoaderConfig,
    mode: HostMode,
) -> Result<Runtime> {
    let root = platform.create_root().map_err(|hr| Error::Native {
        call: "CLRCreateInstance",
        hr,
    })?;
    debug!("Created the runtime-hosting root");

    let installed = root
        .installed_runtimes(config.version_buffer_len)
        .map_err(|hr| Error::Native {
            call: "ICLRMetaHost::EnumerateInstalledRuntimes",
            hr,
        })?;
    debug!("Installed runtimes: {installed:?}");

    let version = select_version(&installed, &config.requested_version)
        .ok_or(Error::NoRuntimeFound)?
        .to_string();
    info!("Selected runtime {version}");

    let info = root.runtime(&version).map_err(|hr| Error::Native {
        call: "ICLRMetaHost::GetRuntime",
        hr,
    })?;

    let loadable = info.is_loadable().map_err(|hr| Error::Native {
        call: "ICLRRuntimeInfo::IsLoadable",
        hr,
    })?;
    if !loadable {
        return Err(Error::RuntimeNotLoadable { version });
    }

    let (host, domain) = match mode {
        HostMode::Legacy => {
            if config.bind_legacy_v2 {
                info.bind_as_legacy_v2().map_err(Error::LegacyBindFailed)?;
                debug!("Bound {version} as the legacy runtime");
            }

            let host = info.legacy_host().map_err(|hr| Error::HostStartFailed {
                call: "ICLRRuntimeInfo::GetInterface",
                hr,
            })?;
            host.start().map_err(|hr| Error::HostStartFailed {
                call: "ICorRuntimeHost::Start",
                hr,
            })?;

            let domain = host.default_domain().map_err(|hr| Error::Native {
                call: "ICorRuntimeHost::GetDefaultDomain",
                hr,
            })?;
            debug!("Acquired the default domain");

            (Host::Legacy(host), Some(domain))
        }
        HostMode::Current => {
            let host = info.current_host().map_err(|hr| Error::HostStartFailed {
                call: "ICLRRuntimeInfo::GetInterface",
                hr,
            })?;
            host.start().map_err(|hr| Error::HostStartFailed {
                call: "ICLRRuntimeHost::Start",
                hr,
            })?;

            (Host::Current(host), None)
        }
    };
    info!("Started runtime {version} ({mode:?} host)");

    Ok(Runtime {
        domain,
        host,
        info,
        root,
        version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn versions(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn first_match_wins() {
        let installed = versions(&["v2.0.50727", "v4.0.30319", "v4.8"]);
        assert_eq!(select_version(&installed, "v4"), Some("v4.0.30319"));
    }

    #[test]
    fn falls_back_to_last() {
        let installed = versions(&["v1.1.4322", "v2.0.50727"]);
        assert_eq!(select_version(&installed, "v4"), Some("v2.0.50727"));
    }

    #[test]
    fn empty_list_selects_nothing() {
        assert_eq!(select_version(&[], "v4"), None);
        assert_eq!(select_version(&[], ""), None);
    }

    #[test]
    fn any_non_empty_list_selects_something() {
        for requested in ["", "v4", "v9", "x"] {
            for count in 1..5 {
                let installed: Vec<String> = (0..count).map(|i| format!("v{i}.0")).collect();
                assert!(select_version(&installed, requested).is_some());
            }
        }
    }
}
