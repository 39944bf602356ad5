//! Platform adapters and detection.
//!
//! Detection probes a host once for its platform facts (uname, os-release
//! fields, a PowerShell marker) and then evaluates an ordered, closed list of
//! adapters against those facts. The first adapter whose checks all pass
//! becomes the machine's primary adapter; every passing adapter contributes
//! its tag to the machine's platform list. Ordering goes from most to least
//! specific so `debian-11` wins over plain `debian` or `linux`.

use super::path::PathFlavor;

/// Node provisioning strategy per platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupKind {
    /// apt-get update/upgrade/install, then engine deployment.
    DebianLike,
    /// Engine deployment only.
    LinuxGeneric,
    /// Engine deployment only, PowerShell flavor.
    Windows,
}

/// A single predicate over the gathered platform facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformCheck {
    IsLinux,
    IsDebianLike,
    IsDebian,
    DebianVersion(&'static str),
    IsWindows,
    WindowsCaption(&'static str),
}

/// Facts probed once per connection; adapter checks evaluate against these.
#[derive(Debug, Clone, Default)]
pub struct PlatformFacts {
    pub is_linux: bool,
    pub os_id: Option<String>,
    pub os_id_like: Option<String>,
    pub os_version_id: Option<String>,
    pub is_windows: bool,
    pub windows_caption: Option<String>,
}

impl PlatformFacts {
    /// Parse the `ID@@@ID_LIKE@@@VERSION_ID` probe output of /etc/os-release.
    pub fn apply_os_release(&mut self, probe: &str) {
        let mut parts = probe.trim().splitn(3, "@@@");
        self.os_id = parts.next().map(str::trim).map(str::to_string);
        self.os_id_like = parts.next().map(str::trim).map(str::to_string);
        self.os_version_id = parts
            .next()
            .map(|s| s.trim().trim_matches('"').to_string());
    }
}

impl PlatformCheck {
    pub fn passes(&self, facts: &PlatformFacts) -> bool {
        match self {
            PlatformCheck::IsLinux => facts.is_linux,
            PlatformCheck::IsDebianLike => {
                let id = facts.os_id.as_deref().unwrap_or("");
                let id_like = facts.os_id_like.as_deref().unwrap_or("");
                id == "debian" || id_like.split_whitespace().any(|x| x == "debian")
            }
            PlatformCheck::IsDebian => facts.os_id.as_deref() == Some("debian"),
            PlatformCheck::DebianVersion(v) => facts.os_version_id.as_deref() == Some(*v),
            PlatformCheck::IsWindows => facts.is_windows,
            PlatformCheck::WindowsCaption(marker) => facts
                .windows_caption
                .as_deref()
                .map(|c| c.contains(marker))
                .unwrap_or(false),
        }
    }
}

/// Static description of one supported platform.
#[derive(Debug)]
pub struct PlatformAdapter {
    pub platform: &'static str,
    pub flavor: PathFlavor,
    pub setup: SetupKind,
    pub checks: &'static [PlatformCheck],
}

impl PlatformAdapter {
    pub fn matches(&self, facts: &PlatformFacts) -> bool {
        self.checks.iter().all(|c| c.passes(facts))
    }
}

/// Ordered adapter battery, most specific first.
pub const ADAPTERS: &[PlatformAdapter] = &[
    PlatformAdapter {
        platform: "debian-12",
        flavor: PathFlavor::Posix,
        setup: SetupKind::DebianLike,
        checks: &[
            PlatformCheck::IsLinux,
            PlatformCheck::IsDebianLike,
            PlatformCheck::IsDebian,
            PlatformCheck::DebianVersion("12"),
        ],
    },
    PlatformAdapter {
        platform: "debian-11",
        flavor: PathFlavor::Posix,
        setup: SetupKind::DebianLike,
        checks: &[
            PlatformCheck::IsLinux,
            PlatformCheck::IsDebianLike,
            PlatformCheck::IsDebian,
            PlatformCheck::DebianVersion("11"),
        ],
    },
    PlatformAdapter {
        platform: "debian-10",
        flavor: PathFlavor::Posix,
        setup: SetupKind::DebianLike,
        checks: &[
            PlatformCheck::IsLinux,
            PlatformCheck::IsDebianLike,
            PlatformCheck::IsDebian,
            PlatformCheck::DebianVersion("10"),
        ],
    },
    PlatformAdapter {
        platform: "debian",
        flavor: PathFlavor::Posix,
        setup: SetupKind::DebianLike,
        checks: &[
            PlatformCheck::IsLinux,
            PlatformCheck::IsDebianLike,
            PlatformCheck::IsDebian,
        ],
    },
    PlatformAdapter {
        platform: "debian-like",
        flavor: PathFlavor::Posix,
        setup: SetupKind::DebianLike,
        checks: &[PlatformCheck::IsLinux, PlatformCheck::IsDebianLike],
    },
    PlatformAdapter {
        platform: "linux",
        flavor: PathFlavor::Posix,
        setup: SetupKind::LinuxGeneric,
        checks: &[PlatformCheck::IsLinux],
    },
    PlatformAdapter {
        platform: "windows-11",
        flavor: PathFlavor::Windows,
        setup: SetupKind::Windows,
        checks: &[
            PlatformCheck::IsWindows,
            PlatformCheck::WindowsCaption("11"),
        ],
    },
    PlatformAdapter {
        platform: "windows-10",
        flavor: PathFlavor::Windows,
        setup: SetupKind::Windows,
        checks: &[
            PlatformCheck::IsWindows,
            PlatformCheck::WindowsCaption("10"),
        ],
    },
    PlatformAdapter {
        platform: "windows-8",
        flavor: PathFlavor::Windows,
        setup: SetupKind::Windows,
        checks: &[
            PlatformCheck::IsWindows,
            PlatformCheck::WindowsCaption("8"),
        ],
    },
    PlatformAdapter {
        platform: "windows-7",
        flavor: PathFlavor::Windows,
        setup: SetupKind::Windows,
        checks: &[
            PlatformCheck::IsWindows,
            PlatformCheck::WindowsCaption("7"),
        ],
    },
    PlatformAdapter {
        platform: "windows",
        flavor: PathFlavor::Windows,
        setup: SetupKind::Windows,
        checks: &[PlatformCheck::IsWindows],
    },
];

/// Pick the primary adapter and the full platform tag list for a host.
pub fn detect(facts: &PlatformFacts) -> (Option<&'static PlatformAdapter>, Vec<String>) {
    let mut primary = None;
    let mut platforms = Vec::new();
    for adapter in ADAPTERS {
        if adapter.matches(facts) {
            platforms.push(adapter.platform.to_string());
            if primary.is_none() {
                primary = Some(adapter);
            }
        }
    }
    (primary, platforms)
}
